use crate::cache::StateCache;
use crate::loops::send_logged;
use crate::sender::CommandSink;
use crate::valve_policy::ValvePolicies;
use fill_protocol::{Command, ValveName};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// The valve whose signal line is cycled low/high to vent before ignition.
pub const VENT_VALVE: ValveName = ValveName::Sv5;

pub const VENT_LOW_HOLD: Duration = Duration::from_millis(1000);
pub const IGNITION_HOLD: Duration = Duration::from_millis(4000);
pub const MAV_OPEN_HOLD: Duration = Duration::from_millis(7880);
pub const COMPLETE_SETTLE: Duration = Duration::from_millis(1000);
pub const PULSE_SETTLE: Duration = Duration::from_millis(200);

pub const MAV_OPEN_ANGLE: f32 = 90.0;
pub const MAV_CLOSED_ANGLE: f32 = 0.0;

/// Timed actuation scripts. Every step writes through the sink and updates
/// the cache optimistically; nothing waits for the station to confirm, and a
/// started script always runs to the end.
#[derive(Clone)]
pub struct Sequencer {
    sink: Arc<dyn CommandSink>,
    cache: Arc<StateCache>,
    policies: ValvePolicies,
}

impl Sequencer {
    pub fn new(sink: Arc<dyn CommandSink>, cache: Arc<StateCache>, policies: ValvePolicies) -> Self {
        Self {
            sink,
            cache,
            policies,
        }
    }

    pub fn policies(&self) -> &ValvePolicies {
        &self.policies
    }

    /// Drives a valve to an explicit state and records it in the cache.
    pub fn actuate_valve(&self, valve: ValveName, state: bool) {
        send_logged(self.sink.as_ref(), &Command::ActuateValve { valve, state });
        self.cache.set_valve_actuated(valve, state);
    }

    /// Toggles a valve according to its policy, flips the cached flag, and
    /// asks for the authoritative state straight away. Returns the new
    /// cached flag.
    pub fn toggle_valve(&self, valve: ValveName) -> bool {
        let current = self.cache.flip_valve_actuated(valve);
        let state = self.policies.get(valve).toggle_command(current);
        send_logged(self.sink.as_ref(), &Command::ActuateValve { valve, state });
        send_logged(self.sink.as_ref(), &Command::GetValveState { valve });
        !current
    }

    pub fn open_mav(&self) {
        send_logged(self.sink.as_ref(), &Command::MAV_OPEN);
        self.cache.set_mav_angle(MAV_OPEN_ANGLE);
    }

    pub fn close_mav(&self) {
        send_logged(self.sink.as_ref(), &Command::MAV_CLOSE);
        self.cache.set_mav_angle(MAV_CLOSED_ANGLE);
    }

    /// Toggle, hold for `duration`, toggle back.
    pub async fn timed_pulse(&self, valve: ValveName, duration: Duration) {
        info!("pulsing {valve} for {duration:?}");
        self.toggle_valve(valve);
        tokio::time::sleep(PULSE_SETTLE + duration).await;
        self.toggle_valve(valve);
        info!("pulse of {valve} finished");
    }

    pub async fn vent_ignite_launch(&self) {
        self.publish("Step 1: setting SV5 signal LOW");
        self.actuate_valve(VENT_VALVE, false);
        tokio::time::sleep(VENT_LOW_HOLD).await;

        self.publish("Step 2: setting SV5 signal HIGH and firing igniters");
        self.actuate_valve(VENT_VALVE, true);
        send_logged(self.sink.as_ref(), &Command::Ignite);
        tokio::time::sleep(IGNITION_HOLD).await;

        self.publish("Step 3: opening MAV");
        self.open_mav();
        tokio::time::sleep(MAV_OPEN_HOLD).await;

        self.publish("Step 4: closing MAV and setting valves to their safe state");
        self.close_mav();
        for (valve, policy) in self.policies.iter() {
            self.actuate_valve(valve, policy.after_launch);
        }

        self.publish("Sequence complete, verifying states");
        tokio::time::sleep(COMPLETE_SETTLE).await;
        self.cache.set_sequence_status(None);
    }

    /// Runs [`Sequencer::timed_pulse`] on its own task.
    pub fn spawn_timed_pulse(&self, valve: ValveName, duration: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.timed_pulse(valve, duration).await })
    }

    pub fn spawn_vent_ignite_launch(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.vent_ignite_launch().await })
    }

    fn publish(&self, status: &str) {
        info!("launch sequence: {status}");
        self.cache.set_sequence_status(Some(status.to_string()));
    }
}
