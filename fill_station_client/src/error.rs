use fill_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported url scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("outbound queue full")]
    OutboundFull,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("mav angle {0} outside 0..=90 degrees")]
    InvalidAngle(f32),
    #[error("no tokio runtime available to run the session")]
    NoRuntime,
}
