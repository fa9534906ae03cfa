use fill_protocol::{ChannelReading, Command, SensorSnapshot, ServerMessage, ValveName};
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

const MAV_CLOSED_US: u32 = 1000;
const MAV_OPEN_US: u32 = 2000;
const MAV_NEUTRAL_US: u32 = 1300;
const MAV_NEUTRAL_ANGLE: f32 = 27.0;

#[derive(Debug, Clone)]
pub struct StationOptions {
    /// Include the `valve` field in `valve_state` replies. Older firmware
    /// left it out.
    pub echo_valve_identifier: bool,
    /// Valves whose driver flips on a repeated command instead of holding.
    pub repeat_toggles: Vec<ValveName>,
}

impl Default for StationOptions {
    fn default() -> Self {
        Self {
            echo_valve_identifier: true,
            repeat_toggles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockValve {
    pub actuated: bool,
    pub continuity: bool,
}

/// Simulated station hardware.
#[derive(Debug, Clone)]
pub struct MockStation {
    options: StationOptions,
    valves: [MockValve; ValveName::COUNT],
    mav_angle: f32,
    mav_pulse_width_us: u32,
    igniter_continuity: [bool; 2],
    stream_active: bool,
    ignitions: u32,
}

impl MockStation {
    pub fn new(options: StationOptions) -> Self {
        Self {
            options,
            valves: [MockValve {
                actuated: false,
                continuity: true,
            }; ValveName::COUNT],
            mav_angle: 0.0,
            mav_pulse_width_us: MAV_CLOSED_US,
            igniter_continuity: [true, true],
            stream_active: false,
            ignitions: 0,
        }
    }

    pub fn valve(&self, valve: ValveName) -> MockValve {
        self.valves[valve.index()]
    }

    pub fn set_valve(&mut self, valve: ValveName, actuated: bool, continuity: bool) {
        self.valves[valve.index()] = MockValve {
            actuated,
            continuity,
        };
    }

    pub fn set_igniter_continuity(&mut self, index: usize, continuity: bool) {
        if let Some(slot) = self.igniter_continuity.get_mut(index) {
            *slot = continuity;
        }
    }

    pub fn mav(&self) -> (f32, u32) {
        (self.mav_angle, self.mav_pulse_width_us)
    }

    pub fn stream_active(&self) -> bool {
        self.stream_active
    }

    pub fn ignitions(&self) -> u32 {
        self.ignitions
    }

    /// Called when the client goes away; the stream belongs to the connection.
    pub fn client_left(&mut self) {
        self.stream_active = false;
    }

    pub fn execute(&mut self, cmd: &Command) -> ServerMessage {
        match *cmd {
            Command::Heartbeat => ServerMessage::Success,
            Command::StartAdcStream => {
                self.stream_active = true;
                ServerMessage::Success
            }
            Command::StopAdcStream => {
                self.stream_active = false;
                ServerMessage::Success
            }
            Command::GetValveState { valve } => {
                let v = self.valve(valve);
                ServerMessage::ValveState {
                    valve: self
                        .options
                        .echo_valve_identifier
                        .then(|| valve.as_str().to_string()),
                    actuated: v.actuated,
                    continuity: v.continuity,
                }
            }
            Command::ActuateValve { valve, state } => {
                let slot = &mut self.valves[valve.index()];
                if self.options.repeat_toggles.contains(&valve) && slot.actuated == state {
                    slot.actuated = !state;
                } else {
                    slot.actuated = state;
                }
                ServerMessage::Success
            }
            Command::GetMavState => ServerMessage::MavState {
                angle: Some(self.mav_angle),
                pulse_width_us: Some(self.mav_pulse_width_us),
            },
            Command::SetMavAngle { angle, .. } => {
                if !angle.is_finite() || !(0.0..=90.0).contains(&angle) {
                    return ServerMessage::Error {
                        message: Some(format!("angle out of range: {angle}")),
                    };
                }
                self.mav_angle = angle;
                self.mav_pulse_width_us = MAV_CLOSED_US
                    + ((angle / 90.0) * (MAV_OPEN_US - MAV_CLOSED_US) as f32).round() as u32;
                ServerMessage::Success
            }
            Command::MavOpen { .. } => {
                self.mav_angle = 90.0;
                self.mav_pulse_width_us = MAV_OPEN_US;
                ServerMessage::Success
            }
            Command::MavClose { .. } => {
                self.mav_angle = 0.0;
                self.mav_pulse_width_us = MAV_CLOSED_US;
                ServerMessage::Success
            }
            Command::MavNeutral { .. } => {
                self.mav_angle = MAV_NEUTRAL_ANGLE;
                self.mav_pulse_width_us = MAV_NEUTRAL_US;
                ServerMessage::Success
            }
            Command::GetIgniterContinuity { id } => ServerMessage::IgniterContinuity {
                id: Some(id),
                continuity: self.igniter_continuity[id.index()],
            },
            Command::Ignite => {
                self.ignitions += 1;
                info!("igniters fired ({} total)", self.ignitions);
                ServerMessage::Success
            }
        }
    }
}

/// One synthetic ADC frame: a live-ish pressure on PT5, a small reading on
/// PT2, a rail voltage on ADC2 channel 0, everything else idle.
pub fn sample_adc(rng: &mut impl Rng) -> SensorSnapshot {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let idle = ChannelReading::default();
    SensorSnapshot {
        timestamp_ms,
        valid: true,
        adc1: [
            ChannelReading {
                raw: rng.gen_range(1000..=1050),
                voltage: 2.5,
                scaled: Some(500.0 + rng.gen_range(-1.0..1.0)),
            },
            ChannelReading {
                raw: rng.gen_range(0..=50),
                voltage: 0.1,
                scaled: Some(10.0),
            },
            idle,
            idle,
        ],
        adc2: [
            ChannelReading {
                raw: rng.gen_range(2000..=2047),
                voltage: 3.3,
                scaled: None,
            },
            idle,
            idle,
            idle,
        ],
    }
}
