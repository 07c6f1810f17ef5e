//! Wire-level vocabulary of the hub protocol.
//!
//! Everything here is pure: constants, line builders, the reject-reason
//! table and the payload types exchanged during the override sequence.
//! Line contents beyond these prefixes are opaque to the core.

pub mod override_plan;

pub use override_plan::{OverrideMode, OverridePlan, OverrideTarget, OverrideType};

use std::fmt;

use chrono::NaiveDateTime;

use crate::HubError;

/// TCP port the hub listens on.
pub const HUB_PORT: u16 = 27779;

/// Protocol version announced in `HELLO`.
pub const PROTOCOL_VERSION: &str = "1.1";

/// `HELLO` timestamp layout.
pub const HELLO_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

// ── Line prefixes ────────────────────────────────────────────────

pub const HELLO: &str = "HELLO";
pub const REJECT: &str = "REJECT";
pub const HANDSHAKE: &str = "HANDSHAKE";
/// Request a full state dump.
pub const GET_ALL: &str = "G00";
/// Terminal line of a full state dump.
pub const DUMP_END: &str = "H05";
/// Request an override.
pub const ADD_OVERRIDE: &str = "A03";
/// Hub confirmation of an override, carries the assigned id.
pub const OVERRIDE_ADDED: &str = "B03";
/// Acknowledge the assigned override id back to the hub.
pub const UPDATE_OVERRIDE: &str = "U03";

// ── HubSerial ────────────────────────────────────────────────────

/// Length of a hub serial number.
pub const SERIAL_LENGTH: usize = 12;

/// A validated 12-digit hub serial number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HubSerial(String);

impl HubSerial {
    pub fn parse(raw: &str) -> Result<Self, HubError> {
        let raw = raw.trim();
        if raw.len() != SERIAL_LENGTH || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(HubError::InvalidSerial(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HubSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for HubSerial {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Line builders ────────────────────────────────────────────────

/// Builds the opening `HELLO <version> <serial> <timestamp>` line.
pub fn hello_line(serial: &HubSerial, now: NaiveDateTime) -> String {
    format!(
        "{HELLO} {PROTOCOL_VERSION} {serial} {}",
        now.format(HELLO_TIMESTAMP_FORMAT)
    )
}

/// Returns `true` when `line` carries the given command prefix.
pub fn has_prefix(line: &str, prefix: &str) -> bool {
    line.starts_with(prefix)
}

// ── Reject reasons ───────────────────────────────────────────────

/// Human-readable causes for `REJECT <code>`.
const REJECT_REASONS: &[(u32, &str)] = &[
    (0, "client protocol version not supported"),
    (1, "hub serial number mismatch"),
    (2, "wrong number of arguments"),
    (3, "timestamp incorrectly formatted"),
];

/// Looks up the text for a reject code.
pub fn reject_reason(code: u32) -> &'static str {
    REJECT_REASONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, reason)| *reason)
        .unwrap_or("unknown reason")
}

/// Classifies the hub's answer to `HELLO`.
///
/// `Ok(())` for `HELLO …`, `Rejected` for `REJECT <code>`, otherwise a
/// protocol violation.
pub fn check_hello_response(line: &str) -> Result<(), HubError> {
    if has_prefix(line, HELLO) {
        return Ok(());
    }
    if let Some(rest) = line.strip_prefix(REJECT) {
        let code = rest
            .split_whitespace()
            .next()
            .and_then(|c| c.parse::<u32>().ok())
            .ok_or_else(|| HubError::ProtocolViolation(format!("malformed reject: {line:?}")))?;
        return Err(HubError::Rejected {
            code,
            reason: reject_reason(code),
        });
    }
    Err(HubError::ProtocolViolation(format!(
        "expected {HELLO} or {REJECT}, got {line:?}"
    )))
}
