use crate::error::ClientError;
use fill_protocol::{encode_command, Command};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Anything that can push a command towards the station. The sequencer and
/// the polling loops only see this, which keeps them testable without a socket.
pub trait CommandSink: Send + Sync {
    fn send(&self, cmd: &Command) -> Result<(), ClientError>;
    fn is_connected(&self) -> bool;
}

struct Link {
    /// Session currently allowed to drive the link; 0 means none.
    owner: u64,
    next_id: u64,
    outbound: Option<mpsc::Sender<Message>>,
}

/// Fire-and-forget writer. Commands are queued to the connection task, which
/// is the only place frames are written, so two commands never interleave.
pub struct CommandSender {
    link: Mutex<Link>,
    state: watch::Sender<ConnectionState>,
}

impl Default for CommandSender {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSender {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            link: Mutex::new(Link {
                owner: 0,
                next_id: 1,
                outbound: None,
            }),
            state,
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Hands the link to a new session; any previous session loses it.
    pub(crate) fn begin_session(&self) -> u64 {
        let mut link = self.link();
        let id = link.next_id;
        link.next_id += 1;
        link.owner = id;
        link.outbound = None;
        self.state.send_replace(ConnectionState::Disconnected);
        id
    }

    /// Releases the link no matter which session holds it.
    pub(crate) fn end_session(&self) {
        let mut link = self.link();
        link.owner = 0;
        link.outbound = None;
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub(crate) fn set_connecting(&self, session: u64) {
        let link = self.link();
        if link.owner == session {
            self.state.send_replace(ConnectionState::Connecting);
        }
    }

    pub(crate) fn attach(&self, session: u64, outbound: mpsc::Sender<Message>) -> bool {
        let mut link = self.link();
        if link.owner != session {
            return false;
        }
        link.outbound = Some(outbound);
        self.state.send_replace(ConnectionState::Connected);
        true
    }

    pub(crate) fn detach(&self, session: u64) {
        let mut link = self.link();
        if link.owner != session {
            return;
        }
        link.outbound = None;
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub(crate) fn session_active(&self, session: u64) -> bool {
        self.link().owner == session
    }
}

impl CommandSink for CommandSender {
    fn send(&self, cmd: &Command) -> Result<(), ClientError> {
        let Some(outbound) = self.link().outbound.clone() else {
            trace!("not connected, dropping {}", cmd.name());
            return Ok(());
        };
        let payload = encode_command(cmd)?;
        debug!("-> {payload}");
        outbound
            .try_send(Message::Text(payload.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ClientError::OutboundFull,
                mpsc::error::TrySendError::Closed(_) => ClientError::ConnectionClosed,
            })
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}
