use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("invalid igniter id: {0} (expected 1 or 2)")]
    InvalidIgniterId(u8),
    #[error("unknown valve name: {0:?}")]
    UnknownValve(String),
}

/// Solenoid valves wired to the fill station. The set is fixed by the hardware.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValveName {
    #[serde(rename = "SV1")]
    Sv1,
    #[serde(rename = "SV2")]
    Sv2,
    #[serde(rename = "SV3")]
    Sv3,
    #[serde(rename = "SV4")]
    Sv4,
    #[serde(rename = "SV5")]
    Sv5,
}

impl ValveName {
    pub const COUNT: usize = 5;
    pub const ALL: [ValveName; Self::COUNT] = [
        ValveName::Sv1,
        ValveName::Sv2,
        ValveName::Sv3,
        ValveName::Sv4,
        ValveName::Sv5,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ValveName::Sv1 => "SV1",
            ValveName::Sv2 => "SV2",
            ValveName::Sv3 => "SV3",
            ValveName::Sv4 => "SV4",
            ValveName::Sv5 => "SV5",
        }
    }

    /// Position in [`ValveName::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ValveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ValveName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValveName::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ProtocolError::UnknownValve(s.to_string()))
    }
}

/// The `valve` label carried by MAV commands. Always written as `"MAV"`;
/// any label (or none) is accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MavTarget;

impl MavTarget {
    pub const NAME: &'static str = "MAV";
}

impl Serialize for MavTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(Self::NAME)
    }
}

impl<'de> Deserialize<'de> for MavTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|_| MavTarget)
    }
}

/// Igniter channel. Only 1 and 2 exist on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct IgniterId(u8);

impl IgniterId {
    pub const ONE: IgniterId = IgniterId(1);
    pub const TWO: IgniterId = IgniterId(2);
    pub const ALL: [IgniterId; 2] = [IgniterId::ONE, IgniterId::TWO];

    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based slot for per-igniter storage.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for IgniterId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 | 2 => Ok(IgniterId(value)),
            other => Err(ProtocolError::InvalidIgniterId(other)),
        }
    }
}

impl From<IgniterId> for u8 {
    fn from(id: IgniterId) -> Self {
        id.0
    }
}

impl fmt::Display for IgniterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commands sent from the operator client to the fill station.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum Command {
    Heartbeat,
    StartAdcStream,
    StopAdcStream,
    GetValveState { valve: ValveName },
    ActuateValve { valve: ValveName, state: bool },
    GetMavState,
    SetMavAngle {
        #[serde(default)]
        valve: MavTarget,
        angle: f32,
    },
    MavOpen {
        #[serde(default)]
        valve: MavTarget,
    },
    MavClose {
        #[serde(default)]
        valve: MavTarget,
    },
    MavNeutral {
        #[serde(default)]
        valve: MavTarget,
    },
    GetIgniterContinuity { id: IgniterId },
    Ignite,
}

impl Command {
    pub fn set_mav_angle(angle: f32) -> Self {
        Command::SetMavAngle {
            valve: MavTarget,
            angle,
        }
    }

    pub const MAV_OPEN: Command = Command::MavOpen { valve: MavTarget };
    pub const MAV_CLOSE: Command = Command::MavClose { valve: MavTarget };
    pub const MAV_NEUTRAL: Command = Command::MavNeutral { valve: MavTarget };

    pub fn name(&self) -> &'static str {
        match self {
            Command::Heartbeat => "heartbeat",
            Command::StartAdcStream => "start_adc_stream",
            Command::StopAdcStream => "stop_adc_stream",
            Command::GetValveState { .. } => "get_valve_state",
            Command::ActuateValve { .. } => "actuate_valve",
            Command::GetMavState => "get_mav_state",
            Command::SetMavAngle { .. } => "set_mav_angle",
            Command::MavOpen { .. } => "mav_open",
            Command::MavClose { .. } => "mav_close",
            Command::MavNeutral { .. } => "mav_neutral",
            Command::GetIgniterContinuity { .. } => "get_igniter_continuity",
            Command::Ignite => "ignite",
        }
    }

    /// True for commands that move hardware rather than query it.
    pub fn is_actuation(&self) -> bool {
        matches!(
            self,
            Command::ActuateValve { .. }
                | Command::SetMavAngle { .. }
                | Command::MavOpen { .. }
                | Command::MavClose { .. }
                | Command::MavNeutral { .. }
                | Command::Ignite
        )
    }
}

/// One ADC channel: raw counts, converted voltage and, for calibrated
/// transducers, the scaled engineering value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelReading {
    pub raw: i16,
    pub voltage: f32,
    #[serde(default)]
    pub scaled: Option<f32>,
}

pub const CHANNELS_PER_ADC: usize = 4;

const ADC1_LABELS: [Option<&str>; CHANNELS_PER_ADC] =
    [Some("PT5"), Some("PT2"), Some("PT7"), Some("PT8")];
const ADC2_LABELS: [Option<&str>; CHANNELS_PER_ADC] = [Some("PT6"), Some("Load Cell"), None, None];

fn default_valid() -> bool {
    true
}

/// A full sensor frame as streamed by the station.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SensorSnapshot {
    pub timestamp_ms: u64,
    #[serde(default = "default_valid")]
    pub valid: bool,
    pub adc1: [ChannelReading; CHANNELS_PER_ADC],
    pub adc2: [ChannelReading; CHANNELS_PER_ADC],
}

impl SensorSnapshot {
    /// Channels that have an instrument attached, in display order.
    pub fn labeled_channels(&self) -> Vec<(&'static str, ChannelReading)> {
        let adc1 = ADC1_LABELS.iter().zip(self.adc1.iter());
        let adc2 = ADC2_LABELS.iter().zip(self.adc2.iter());
        adc1.chain(adc2)
            .filter_map(|(label, reading)| label.map(|l| (l, *reading)))
            .collect()
    }
}

/// Messages pushed or returned by the fill station.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ServerMessage {
    AdcData(SensorSnapshot),
    ValveState {
        /// Older firmware omits this; such responses cannot be attributed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        valve: Option<String>,
        actuated: bool,
        continuity: bool,
    },
    MavState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        angle: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pulse_width_us: Option<u32>,
    },
    IgniterContinuity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<IgniterId>,
        continuity: bool,
    },
    Success,
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

pub fn encode_command(cmd: &Command) -> Result<String, ProtocolError> {
    serde_json::to_string(cmd).map_err(ProtocolError::Encode)
}

pub fn decode_command(text: &str) -> Result<Command, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

pub fn encode_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(ProtocolError::Encode)
}

pub fn decode_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}
