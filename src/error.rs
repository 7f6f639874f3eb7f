//! Error types for the greenhouse node
//!
//! Link and session errors are recovered by the supervisor through state
//! regression; dispatch and sensor errors abort only the item they belong to.

use alloc::string::String;
use thiserror::Error;

/// Radio attach failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Association not reported within the attempt budget
    #[error("attach exhausted after {attempts} attempts")]
    AttachExhausted { attempts: u32 },
    /// The radio driver refused the configuration or connect request
    #[error("radio driver rejected the request")]
    Radio,
}

/// Failures reported by the transport collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection to peer failed")]
    Connect,
    #[error("write to peer failed")]
    Write,
    #[error("connection closed by peer")]
    Closed,
}

/// Session lifecycle failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `open` requested while the link is not up
    #[error("link is not up")]
    LinkDown,
    /// Handshake or registration did not complete
    #[error("session open failed: {0}")]
    OpenFailed(TransportError),
    /// Send or heartbeat requested on a session that is not open
    #[error("session is not open")]
    NotOpen,
    /// No inbound frame arrived within the heartbeat window
    #[error("heartbeat timed out")]
    HeartbeatTimeout,
    /// The transport failed while the session was open
    #[error("transport failure: {0}")]
    Transport(TransportError),
}

/// Wire decoding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed JSON at line {line}, column {column}")]
    Json { line: usize, column: usize },
    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Json {
            line: err.line(),
            column: err.column(),
        }
    }
}

/// Inbound command failures, each aborts only the command in question
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] ParseError),
    #[error("unknown device {device:?}")]
    UnknownDevice { device: String, status: bool },
    #[error("sector name too long")]
    SectorTooLong,
}

/// Sensor read failures, each drops only the affected quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    /// I2C or ADC transaction failed
    #[error("sensor bus error")]
    Bus,
    /// Sensor still busy after the conversion wait
    #[error("sensor not ready")]
    NotReady,
    #[error("sensor checksum mismatch")]
    Checksum,
    #[error("sensor returned NaN")]
    NotANumber,
    /// Unexpected chip id or missing calibration
    #[error("sensor unavailable")]
    Unavailable,
}

/// Build-time configuration problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("server host is not an IPv4 address")]
    InvalidPeerAddress,
    #[error("server port is not a valid port number")]
    InvalidPort,
    #[error("WiFi credential too long")]
    CredentialTooLong,
    #[error("device id too long")]
    DeviceIdTooLong,
}
