use crate::cache::StateCache;
use crate::dispatcher::dispatch_text;
use crate::loops::{refresh_all, send_logged};
use crate::sender::CommandSender;
use fill_protocol::Command;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) struct SessionParams {
    pub url: String,
    pub session: u64,
    pub reconnect_delay: Duration,
    pub outbound_capacity: usize,
    pub initial_poll_spacing: Duration,
}

enum SessionEnd {
    Lost,
    Stopped,
}

/// Connect, serve, and on loss wait `reconnect_delay` and try again, until
/// the stop flag is raised. Flapping links only ever spin this loop.
pub(crate) async fn run(
    params: SessionParams,
    sender: Arc<CommandSender>,
    cache: Arc<StateCache>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() || !sender.session_active(params.session) {
            break;
        }

        sender.set_connecting(params.session);
        info!("connecting to {}", params.url);
        let connected = tokio::select! {
            r = tokio_tungstenite::connect_async(params.url.as_str()) => Some(r),
            // Either the stop flag was raised or its owner is gone.
            _ = stop.changed() => None,
        };

        match connected {
            None => break,
            Some(Ok((socket, _))) => {
                let (out_tx, out_rx) = mpsc::channel(params.outbound_capacity);
                if !sender.attach(params.session, out_tx) {
                    break;
                }
                info!("connected to {}", params.url);

                send_logged(sender.as_ref(), &Command::StartAdcStream);
                let refresher = Arc::clone(&sender);
                let spacing = params.initial_poll_spacing;
                tokio::spawn(async move {
                    refresh_all(refresher.as_ref(), spacing).await;
                });

                let end = serve(socket, out_rx, &cache, &mut stop).await;
                sender.detach(params.session);
                match end {
                    SessionEnd::Stopped => break,
                    SessionEnd::Lost => warn!("connection to {} lost", params.url),
                }
            }
            Some(Err(e)) => {
                sender.detach(params.session);
                warn!("connect to {} failed: {e}", params.url);
            }
        }

        if *stop.borrow() {
            break;
        }
        info!("reconnecting in {:?}", params.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(params.reconnect_delay) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("connection manager for session {} exited", params.session);
}

async fn serve(
    mut socket: WsStream,
    mut out_rx: mpsc::Receiver<Message>,
    cache: &StateCache,
    stop: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(msg) = outgoing else { return SessionEnd::Lost };
                if let Err(e) = socket.send(msg).await {
                    warn!("send failed: {e}");
                    return SessionEnd::Lost;
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(cache, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("receive failed: {e}");
                        return SessionEnd::Lost;
                    }
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    let _ = socket.close(None).await;
                    return SessionEnd::Stopped;
                }
            }
        }
    }
}
