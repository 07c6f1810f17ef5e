//! Domain-specific error types for the hub protocol.
//!
//! All fallible operations return `Result<T, HubError>`.
//! `Timeout` is the one variant that does not mean "something broke":
//! it reports an idle read and the supervisor treats it as a no-op tick.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the hub protocol.
#[derive(Debug, Error)]
pub enum HubError {
    // ── Idle ─────────────────────────────────────────────────────
    /// A bounded steady-state read expired with no data.
    #[error("no data within {0:?}")]
    Timeout(Duration),

    // ── Handshake Errors ─────────────────────────────────────────
    /// The hub answered `HELLO` with `REJECT <code>`.
    #[error("hub rejected handshake (code {code}): {reason}")]
    Rejected { code: u32, reason: &'static str },

    /// A response line did not match what the current protocol step expects.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("communication error: {0}")]
    Communication(#[from] std::io::Error),

    /// The hub closed the stream in the middle of an exchange.
    #[error("connection closed by hub")]
    ConnectionClosed,

    /// A line expected as part of a multi-line exchange never arrived.
    #[error("timed out after {after:?} waiting for {awaiting}")]
    ExchangeTimeout {
        awaiting: &'static str,
        after: Duration,
    },

    /// An operation needed a live socket and there was none.
    #[error("not connected")]
    NotConnected,

    /// Closing the socket failed. The connection is torn down regardless.
    #[error("error while disconnecting: {0}")]
    Disconnect(std::io::Error),

    // ── Framing Errors ───────────────────────────────────────────
    /// A received line exceeded the codec limit.
    #[error("line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },

    // ── Application Errors ───────────────────────────────────────
    /// A required setting is missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured hub serial is not 12 digits.
    #[error("invalid hub serial {0:?}: expected 12 digits")]
    InvalidSerial(String),

    /// An override plan could not be encoded or decoded.
    #[error("invalid override plan: {0}")]
    InvalidOverride(String),

    /// The supervisor has been stopped and no longer accepts requests.
    #[error("supervisor stopped")]
    Stopped,
}

impl HubError {
    /// Returns `true` for the idle read case, which is not a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns `true` when the hub explicitly refused the handshake.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
