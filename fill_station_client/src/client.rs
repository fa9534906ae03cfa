use crate::cache::{CacheSnapshot, StateCache};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::loops::{heartbeat_loop, poll_loop};
use crate::net::{self, SessionParams};
use crate::sender::{CommandSender, CommandSink, ConnectionState};
use crate::sequencer::Sequencer;
use fill_protocol::{Command, IgniterId, ValveName};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

struct Session {
    url: String,
    stop: watch::Sender<bool>,
}

/// Operator-side session with the fill station. Owns the cache, the command
/// path and the background loops; a rendering layer reads [`snapshot`] and
/// calls the action methods.
///
/// [`snapshot`]: FillStationClient::snapshot
pub struct FillStationClient {
    config: ClientConfig,
    cache: Arc<StateCache>,
    sender: Arc<CommandSender>,
    sequencer: Sequencer,
    session: Mutex<Option<Session>>,
}

impl FillStationClient {
    pub fn new(config: ClientConfig) -> Self {
        let cache = Arc::new(StateCache::new());
        let sender = Arc::new(CommandSender::new());
        let sink: Arc<dyn CommandSink> = sender.clone();
        let sequencer = Sequencer::new(sink, Arc::clone(&cache), config.valve_policies.clone());
        Self {
            config,
            cache,
            sender,
            sequencer,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the connection manager plus heartbeat and poll loops. Calling
    /// it while a session is already running does nothing. Must be called
    /// from inside a tokio runtime.
    pub fn connect(&self, url: &str) -> Result<(), ClientError> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ClientError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut session = self.session();
        if let Some(active) = session.as_ref() {
            debug!("connect({url}) ignored, session to {} already running", active.url);
            return Ok(());
        }

        let id = self.sender.begin_session();
        let (stop_tx, stop_rx) = watch::channel(false);
        let sink: Arc<dyn CommandSink> = self.sender.clone();

        runtime.spawn(net::run(
            SessionParams {
                url: url.to_string(),
                session: id,
                reconnect_delay: self.config.reconnect_delay,
                outbound_capacity: self.config.outbound_capacity,
                initial_poll_spacing: self.config.initial_poll_spacing,
            },
            Arc::clone(&self.sender),
            Arc::clone(&self.cache),
            stop_rx.clone(),
        ));
        runtime.spawn(heartbeat_loop(
            Arc::clone(&sink),
            self.config.heartbeat_interval,
            stop_rx.clone(),
        ));
        runtime.spawn(poll_loop(
            sink,
            self.config.poll_interval,
            self.config.poll_spacing,
            stop_rx,
        ));

        info!("session {id} started for {url}");
        *session = Some(Session {
            url: url.to_string(),
            stop: stop_tx,
        });
        Ok(())
    }

    /// Stops reconnecting, closes the socket and halts the loops. Sequences
    /// already running keep going; their sends become no-ops.
    pub fn disconnect(&self) {
        let Some(session) = self.session().take() else {
            return;
        };
        session.stop.send_replace(true);
        self.sender.end_session();
        info!("disconnected from {}", session.url);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.sender.state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.cache.snapshot()
    }

    pub fn is_stale(&self) -> bool {
        self.cache.snapshot().is_stale(self.config.stale_after)
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Fire-and-forget; dropped silently while not connected.
    pub fn send(&self, cmd: &Command) -> Result<(), ClientError> {
        self.sender.send(cmd)
    }

    pub fn actuate_valve(&self, valve: ValveName, state: bool) {
        self.sequencer.actuate_valve(valve, state);
    }

    pub fn toggle_valve(&self, valve: ValveName) -> bool {
        self.sequencer.toggle_valve(valve)
    }

    pub fn open_mav(&self) -> Result<(), ClientError> {
        self.sequencer.open_mav();
        self.send(&Command::GetMavState)
    }

    pub fn close_mav(&self) -> Result<(), ClientError> {
        self.sequencer.close_mav();
        self.send(&Command::GetMavState)
    }

    pub fn set_mav_angle(&self, angle: f32) -> Result<(), ClientError> {
        if !angle.is_finite() || !(0.0..=90.0).contains(&angle) {
            return Err(ClientError::InvalidAngle(angle));
        }
        self.send(&Command::set_mav_angle(angle))?;
        self.send(&Command::GetMavState)
    }

    pub fn query_igniters(&self) -> Result<(), ClientError> {
        for id in IgniterId::ALL {
            self.send(&Command::GetIgniterContinuity { id })?;
        }
        Ok(())
    }

    /// Fires both igniters. Continuity is only ever updated from the station.
    pub fn ignite(&self) -> Result<(), ClientError> {
        self.send(&Command::Ignite)
    }

    pub fn start_sensor_stream(&self) -> Result<(), ClientError> {
        self.send(&Command::StartAdcStream)
    }

    pub fn stop_sensor_stream(&self) -> Result<(), ClientError> {
        self.send(&Command::StopAdcStream)
    }

    pub fn run_timed_pulse(&self, valve: ValveName, duration: Duration) -> JoinHandle<()> {
        self.sequencer.spawn_timed_pulse(valve, duration)
    }

    pub fn run_vent_ignite_launch(&self) -> JoinHandle<()> {
        self.sequencer.spawn_vent_ignite_launch()
    }
}

impl Drop for FillStationClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
