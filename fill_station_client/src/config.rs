use crate::valve_policy::ValvePolicies;
use std::time::Duration;

pub const DEFAULT_URL: &str = "ws://localhost:9000";
pub const URL_ENV: &str = "FILL_STATION_URL";
pub const OUTBOUND_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    /// Gap between consecutive queries inside one poll sweep.
    pub poll_spacing: Duration,
    /// Gap used by the sweep issued right after a connection opens.
    pub initial_poll_spacing: Duration,
    pub reconnect_delay: Duration,
    pub outbound_capacity: usize,
    /// Cache is reported stale after this long without inbound traffic.
    pub stale_after: Duration,
    pub valve_policies: ValvePolicies,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let poll_interval = Duration::from_secs(3);
        Self {
            url: DEFAULT_URL.to_string(),
            heartbeat_interval: Duration::from_secs(5),
            poll_interval,
            poll_spacing: Duration::from_millis(50),
            initial_poll_spacing: Duration::from_millis(20),
            reconnect_delay: Duration::from_secs(2),
            outbound_capacity: OUTBOUND_CAP,
            stale_after: poll_interval * 2,
            valve_policies: ValvePolicies::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults, with the server url taken from `FILL_STATION_URL` when set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var(URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                cfg.url = url.to_string();
            }
        }
        cfg
    }
}
