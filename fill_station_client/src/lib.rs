mod cache;
mod client;
mod config;
mod dispatcher;
mod error;
mod loops;
mod net;
mod sender;
mod sequencer;
mod valve_policy;

pub use cache::{CacheSnapshot, IgniterState, MavState, StateCache, ValveState};
pub use client::FillStationClient;
pub use config::{ClientConfig, DEFAULT_URL, OUTBOUND_CAP, URL_ENV};
pub use dispatcher::{apply, dispatch_text, Dispatch};
pub use error::ClientError;
pub use loops::{heartbeat_loop, poll_loop, refresh_all};
pub use sender::{CommandSender, CommandSink, ConnectionState};
pub use sequencer::{
    Sequencer, COMPLETE_SETTLE, IGNITION_HOLD, MAV_CLOSED_ANGLE, MAV_OPEN_ANGLE, MAV_OPEN_HOLD,
    PULSE_SETTLE, VENT_LOW_HOLD, VENT_VALVE,
};
pub use valve_policy::{ToggleMode, ValvePolicies, ValvePolicy};

pub use fill_protocol::{
    ChannelReading, Command, IgniterId, MavTarget, ProtocolError, SensorSnapshot, ServerMessage,
    ValveName,
};
