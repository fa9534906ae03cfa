use fill_protocol::{IgniterId, SensorSnapshot, ValveName};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveState {
    pub valve: ValveName,
    pub actuated: bool,
    pub continuity: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MavState {
    pub angle: f32,
    pub pulse_width_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgniterState {
    pub id: IgniterId,
    pub continuity: bool,
}

/// Read-only copy of the cache handed to whatever renders it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub valves: [ValveState; ValveName::COUNT],
    pub mav: MavState,
    pub igniters: [IgniterState; 2],
    pub sensors: Option<SensorSnapshot>,
    pub last_activity: Option<Instant>,
    pub sequence_status: Option<String>,
}

impl CacheSnapshot {
    pub fn valve(&self, valve: ValveName) -> ValveState {
        self.valves[valve.index()]
    }

    pub fn igniter(&self, id: IgniterId) -> IgniterState {
        self.igniters[id.index()]
    }

    /// No inbound traffic within `window` (or none at all yet).
    pub fn is_stale(&self, window: Duration) -> bool {
        self.last_activity
            .map_or(true, |at| at.elapsed() > window)
    }
}

/// Cached station state. Each field group sits behind its own lock, so a
/// reader never sees half of a valve update, but two groups may be observed
/// at different moments.
pub struct StateCache {
    valves: [Mutex<ValveState>; ValveName::COUNT],
    mav: Mutex<MavState>,
    igniters: [Mutex<IgniterState>; 2],
    sensors: Mutex<Option<SensorSnapshot>>,
    last_activity: Mutex<Option<Instant>>,
    sequence_status: Mutex<Option<String>>,
}

// Every guarded value is a plain overwrite-only record; a panic mid-write
// cannot leave it half-updated, so poisoning carries no information here.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            valves: ValveName::ALL.map(|valve| {
                Mutex::new(ValveState {
                    valve,
                    actuated: false,
                    continuity: false,
                })
            }),
            mav: Mutex::new(MavState::default()),
            igniters: IgniterId::ALL.map(|id| {
                Mutex::new(IgniterState {
                    id,
                    continuity: false,
                })
            }),
            sensors: Mutex::new(None),
            last_activity: Mutex::new(None),
            sequence_status: Mutex::new(None),
        }
    }

    pub fn valve(&self, valve: ValveName) -> ValveState {
        *lock(&self.valves[valve.index()])
    }

    /// Authoritative update from a `valve_state` response.
    pub fn set_valve(&self, valve: ValveName, actuated: bool, continuity: bool) {
        let mut guard = lock(&self.valves[valve.index()]);
        guard.actuated = actuated;
        guard.continuity = continuity;
    }

    /// Optimistic update after an actuation command; continuity is left alone.
    pub fn set_valve_actuated(&self, valve: ValveName, actuated: bool) {
        lock(&self.valves[valve.index()]).actuated = actuated;
    }

    /// Flips the cached flag and returns the value it held before.
    pub fn flip_valve_actuated(&self, valve: ValveName) -> bool {
        let mut guard = lock(&self.valves[valve.index()]);
        let before = guard.actuated;
        guard.actuated = !before;
        before
    }

    pub fn mav(&self) -> MavState {
        *lock(&self.mav)
    }

    /// Fields absent from the message keep their cached value.
    pub fn merge_mav(&self, angle: Option<f32>, pulse_width_us: Option<u32>) {
        let mut guard = lock(&self.mav);
        if let Some(angle) = angle {
            guard.angle = angle;
        }
        if let Some(pw) = pulse_width_us {
            guard.pulse_width_us = pw;
        }
    }

    pub fn set_mav_angle(&self, angle: f32) {
        lock(&self.mav).angle = angle;
    }

    pub fn igniter(&self, id: IgniterId) -> IgniterState {
        *lock(&self.igniters[id.index()])
    }

    pub fn set_igniter_continuity(&self, id: IgniterId, continuity: bool) {
        lock(&self.igniters[id.index()]).continuity = continuity;
    }

    pub fn sensors(&self) -> Option<SensorSnapshot> {
        lock(&self.sensors).clone()
    }

    pub fn replace_sensors(&self, snapshot: SensorSnapshot) {
        *lock(&self.sensors) = Some(snapshot);
    }

    pub fn touch(&self) {
        *lock(&self.last_activity) = Some(Instant::now());
    }

    pub fn last_activity(&self) -> Option<Instant> {
        *lock(&self.last_activity)
    }

    pub fn sequence_status(&self) -> Option<String> {
        lock(&self.sequence_status).clone()
    }

    pub fn set_sequence_status(&self, status: Option<String>) {
        *lock(&self.sequence_status) = status;
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            valves: ValveName::ALL.map(|v| self.valve(v)),
            mav: self.mav(),
            igniters: IgniterId::ALL.map(|id| self.igniter(id)),
            sensors: self.sensors(),
            last_activity: self.last_activity(),
            sequence_status: self.sequence_status(),
        }
    }
}
