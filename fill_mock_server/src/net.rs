use crate::station::{sample_adc, MockStation, StationOptions};
use crossbeam_channel::{bounded, Receiver, Sender};
use fill_protocol::{decode_command, encode_message, Command, ServerMessage, ValveName};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message;

pub const RECEIVED_CAP: usize = 1024;
const ADC_PERIOD: Duration = Duration::from_millis(100);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_millis(30);
const WRITE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum MockServerError {
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct ActiveClient {
    ws: tungstenite::WebSocket<TcpStream>,
    socket_addr: SocketAddr,
    last_frame: Instant,
}

/// Reference station on a background thread. One client at a time; a new
/// connection replaces the previous one.
pub struct MockServer {
    shutdown: Arc<AtomicBool>,
    kick: Arc<AtomicBool>,
    station: Arc<Mutex<MockStation>>,
    received_rx: Receiver<Command>,
    listen_addr: SocketAddr,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

fn lock(station: &Mutex<MockStation>) -> MutexGuard<'_, MockStation> {
    station.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockServer {
    pub fn spawn(addr: &str, options: StationOptions) -> Result<Self, MockServerError> {
        let listener = TcpListener::bind(addr).map_err(|source| MockServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let listen_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let kick = Arc::new(AtomicBool::new(false));
        let station = Arc::new(Mutex::new(MockStation::new(options)));
        let (received_tx, received_rx) = bounded(RECEIVED_CAP);

        let worker = Worker {
            listener,
            station: Arc::clone(&station),
            received_tx,
            shutdown: Arc::clone(&shutdown),
            kick: Arc::clone(&kick),
        };
        let join_handle = thread::spawn(move || worker.run());

        Ok(Self {
            shutdown,
            kick,
            station,
            received_rx,
            listen_addr,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.listen_addr)
    }

    /// Every command the station decoded, in arrival order.
    pub fn received(&self) -> &Receiver<Command> {
        &self.received_rx
    }

    pub fn drain_received(&self) -> Vec<Command> {
        self.received_rx.try_iter().collect()
    }

    /// Drops the active client's socket without a close handshake.
    pub fn drop_client(&self) {
        self.kick.store(true, Ordering::Relaxed);
    }

    pub fn set_valve(&self, valve: ValveName, actuated: bool, continuity: bool) {
        lock(&self.station).set_valve(valve, actuated, continuity);
    }

    pub fn station(&self) -> MutexGuard<'_, MockStation> {
        lock(&self.station)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    listener: TcpListener,
    station: Arc<Mutex<MockStation>>,
    received_tx: Sender<Command>,
    shutdown: Arc<AtomicBool>,
    kick: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let mut rng = rand::thread_rng();
        let mut active: Option<ActiveClient> = None;

        while !self.shutdown.load(Ordering::Relaxed) {
            self.accept_pending(&mut active);

            if self.kick.swap(false, Ordering::Relaxed) {
                if let Some(client) = active.take() {
                    info!("dropping client {}", client.socket_addr);
                    self.client_left();
                }
            }

            let Some(client) = active.as_mut() else {
                thread::sleep(Duration::from_millis(25));
                continue;
            };

            if lock(&self.station).stream_active() && client.last_frame.elapsed() >= ADC_PERIOD {
                client.last_frame = Instant::now();
                let frame = ServerMessage::AdcData(sample_adc(&mut rng));
                if send_server_message(&mut client.ws, &frame).is_err() {
                    active = None;
                    self.client_left();
                    continue;
                }
            }

            // At most one inbound message per pass; the read timeout keeps the loop moving.
            match client.ws.read() {
                Ok(msg) => {
                    if self.handle_inbound(client, msg).is_err() {
                        let _ = client.ws.close(None);
                        active = None;
                        self.client_left();
                    }
                }
                Err(tungstenite::Error::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    debug!("client read ended: {e}");
                    active = None;
                    self.client_left();
                }
            }
        }

        if let Some(mut client) = active {
            let _ = client.ws.close(None);
        }
    }

    fn accept_pending(&self, active: &mut Option<ActiveClient>) {
        loop {
            match self.listener.accept() {
                Ok((stream, socket_addr)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = stream.set_nodelay(true);
                    let _ = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(WRITE_TIMEOUT));

                    let ws = match tungstenite::accept(stream) {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!("ws handshake failed: {e}");
                            continue;
                        }
                    };
                    let _ = ws.get_ref().set_read_timeout(Some(READ_TIMEOUT));

                    if let Some(mut prev) = active.take() {
                        let _ = prev.ws.close(None);
                        self.client_left();
                    }
                    info!("client connected: {socket_addr}");
                    *active = Some(ActiveClient {
                        ws,
                        socket_addr,
                        last_frame: Instant::now(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("ws accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn client_left(&self) {
        lock(&self.station).client_left();
    }

    fn handle_inbound(&self, client: &mut ActiveClient, msg: Message) -> Result<(), ()> {
        let text = match msg {
            Message::Text(s) => s,
            Message::Binary(_) | Message::Pong(_) | Message::Frame(_) => return Ok(()),
            Message::Ping(payload) => {
                let _ = client.ws.send(Message::Pong(payload));
                return Ok(());
            }
            Message::Close(_) => return Err(()),
        };

        let reply = match decode_command(text.as_str()) {
            Ok(cmd) => {
                debug!("received {cmd:?}");
                let reply = lock(&self.station).execute(&cmd);
                let _ = self.received_tx.try_send(cmd);
                reply
            }
            Err(e) => {
                warn!("invalid command: {e}");
                ServerMessage::Error {
                    message: Some(format!("invalid command: {e}")),
                }
            }
        };
        send_server_message(&mut client.ws, &reply)
    }
}

fn send_server_message(
    ws: &mut tungstenite::WebSocket<TcpStream>,
    msg: &ServerMessage,
) -> Result<(), ()> {
    let payload = encode_message(msg).map_err(|_| ())?;
    ws.send(Message::Text(payload.into())).map_err(|_| ())
}
