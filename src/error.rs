//! Error kinds per the error handling design: connection failures, broker
//! `ERROR` frames, unexpected responses, missing receipts, illegal state
//! machine operations, and protocol violations.

use std::io;

use crate::frame::Frame;

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum StompError {
    /// Socket open/read/write failure, timeout, or an operation attempted on
    /// a connection that is not connected. Carries the host that was active
    /// (or attempted) when the failure occurred.
    #[error("connection error (host: {host}): {source}")]
    Connection {
        host: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// All endpoints in a failover list were exhausted.
    #[error("could not connect to any of {attempted:?}: {last}")]
    ConnectionFailed {
        attempted: Vec<String>,
        #[source]
        last: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The broker sent an `ERROR` frame.
    #[error("broker error: {}", .frame.header("message").unwrap_or(""))]
    ErrorFrame { frame: Frame },

    /// A well-formed frame arrived where a specific one was expected (e.g. a
    /// RECEIPT with the wrong id).
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A synchronous send exceeded its receipt wait budget with no matching
    /// RECEIPT frame arriving.
    #[error("no receipt received within the configured wait")]
    MissingReceipt,

    /// The attempted operation is not legal in the state machine's current
    /// state.
    #[error("operation '{operation}' is not valid in state '{state}'")]
    InvalidState { state: String, operation: String },

    /// The attempted operation is not legal while draining buffered consumer
    /// frames.
    #[error("operation '{operation}' is not valid while draining")]
    DrainingMessage { operation: String },

    /// A heartbeat observer detected that the server-alive deadline elapsed.
    #[error("no heartbeat or frame received within the expected interval")]
    HeartbeatTimeout,

    /// Illegal ack mode, NACK at V1.0, or an unsupported `requeue` parameter.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The process-wide id generator ran out of ids (practically
    /// unreachable, but modeled per §3's `generate` contract).
    #[error("id space exhausted")]
    IdSpaceExhausted,

    /// Malformed broker URI.
    #[error("invalid broker uri '{0}'")]
    InvalidUri(String),

    /// Raw I/O failure not otherwise classified above.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StompError>;

impl StompError {
    pub fn connection(host: impl Into<String>, source: io::Error) -> Self {
        StompError::Connection {
            host: host.into(),
            source: Box::new(source),
        }
    }
}
