mod net;
mod station;

pub use net::{MockServer, MockServerError, RECEIVED_CAP};
pub use station::{sample_adc, MockStation, MockValve, StationOptions};
