//! Override plans — temporary mode overrides confirmed by the hub.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[A03 <plan>]──────────────────────► Hub
//!   Plan id is -1: the hub assigns one.
//!
//! Hub    ──[B03 <plan with id>]──────────────► Client
//!   Any number of unrelated lines may precede it.
//!
//! Client ──[U03 <plan with id>]──────────────► Hub      (no reply awaited)
//! ```
//!
//! A plan is encoded as seven space-separated fields:
//! `<id> <mode> <type> <end> <start> <target type> <target id>`.
//! Times use `yyyyMMddHHmm`; absent values are `-1`.

use std::fmt;

use chrono::NaiveDateTime;

use crate::HubError;
use crate::protocol::{ADD_OVERRIDE, OVERRIDE_ADDED, UPDATE_OVERRIDE};

/// Layout of start and end times inside a plan.
pub const PLAN_TIME_FORMAT: &str = "%Y%m%d%H%M";

const UNSET: &str = "-1";
const FIELD_COUNT: usize = 7;

// ── Enums ────────────────────────────────────────────────────────

/// Heating mode requested by an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideMode {
    Normal = 0,
    Comfort = 1,
    Eco = 2,
    Away = 3,
}

/// How long an override lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideType {
    Now = 0,
    Timer = 1,
    FromTo = 2,
    Constant = 3,
}

/// What an override applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideTarget {
    Hub,
    Zone(u32),
}

impl TryFrom<u8> for OverrideMode {
    type Error = HubError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Comfort),
            2 => Ok(Self::Eco),
            3 => Ok(Self::Away),
            other => Err(HubError::InvalidOverride(format!("unknown mode {other}"))),
        }
    }
}

impl TryFrom<u8> for OverrideType {
    type Error = HubError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Now),
            1 => Ok(Self::Timer),
            2 => Ok(Self::FromTo),
            3 => Ok(Self::Constant),
            other => Err(HubError::InvalidOverride(format!("unknown type {other}"))),
        }
    }
}

impl std::str::FromStr for OverrideMode {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "comfort" => Ok(Self::Comfort),
            "eco" => Ok(Self::Eco),
            "away" => Ok(Self::Away),
            other => Err(HubError::InvalidOverride(format!("unknown mode {other:?}"))),
        }
    }
}

impl fmt::Display for OverrideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Comfort => write!(f, "comfort"),
            Self::Eco => write!(f, "eco"),
            Self::Away => write!(f, "away"),
        }
    }
}

// ── OverridePlan ─────────────────────────────────────────────────

/// A temporary mode override.
///
/// Created by the caller with no id, then updated exactly once with the id
/// the hub assigns in its `B03` confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverridePlan {
    /// Hub-assigned identifier; `None` until confirmed.
    pub id: Option<u32>,
    pub mode: OverrideMode,
    pub kind: OverrideType,
    /// Creation time, sent as the override start.
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub target: OverrideTarget,
}

impl OverridePlan {
    /// A constant, hub-wide override starting at `created`.
    pub fn constant_for_hub(mode: OverrideMode, created: NaiveDateTime) -> Self {
        Self {
            id: None,
            mode,
            kind: OverrideType::Constant,
            start: created,
            end: None,
            target: OverrideTarget::Hub,
        }
    }

    /// Restrict the override to a single zone.
    pub fn for_zone(mut self, zone_id: u32) -> Self {
        self.target = OverrideTarget::Zone(zone_id);
        self
    }

    /// Make the override end at `end`.
    pub fn until(mut self, end: NaiveDateTime) -> Self {
        self.kind = OverrideType::FromTo;
        self.end = Some(end);
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }

    /// The `A03` request line.
    pub fn add_command(&self) -> String {
        format!("{ADD_OVERRIDE} {}", self.encode_fields())
    }

    /// The `U03` acknowledgement line. Only valid once the hub assigned an id.
    pub fn update_command(&self) -> Result<String, HubError> {
        if self.id.is_none() {
            return Err(HubError::InvalidOverride(
                "cannot acknowledge an unconfirmed plan".into(),
            ));
        }
        Ok(format!("{UPDATE_OVERRIDE} {}", self.encode_fields()))
    }

    /// Reads the hub-assigned id from a `B03` line and stores it.
    pub fn confirm_from(&mut self, line: &str) -> Result<u32, HubError> {
        let id = parse_assigned_id(line)?;
        self.id = Some(id);
        Ok(id)
    }

    /// Decodes a full plan from a `B03` line.
    pub fn from_confirmation(line: &str) -> Result<Self, HubError> {
        let fields: Vec<&str> = fields_after(line, OVERRIDE_ADDED)?.collect();
        if fields.len() != FIELD_COUNT {
            return Err(HubError::ProtocolViolation(format!(
                "expected {FIELD_COUNT} override fields, got {}: {line:?}",
                fields.len()
            )));
        }

        let id = parse_assigned_id(line)?;
        let mode = OverrideMode::try_from(parse_small(fields[1], "mode")?)?;
        let kind = OverrideType::try_from(parse_small(fields[2], "type")?)?;
        let end = parse_time(fields[3])?;
        let start = parse_time(fields[4])?
            .ok_or_else(|| HubError::InvalidOverride("missing start time".into()))?;
        let target = match (fields[5], fields[6]) {
            ("0", _) => OverrideTarget::Hub,
            ("1", zone) => OverrideTarget::Zone(zone.parse().map_err(|_| {
                HubError::InvalidOverride(format!("bad zone id {zone:?}"))
            })?),
            (other, _) => {
                return Err(HubError::InvalidOverride(format!(
                    "unknown target type {other:?}"
                )));
            }
        };

        Ok(Self {
            id: Some(id),
            mode,
            kind,
            start,
            end,
            target,
        })
    }

    fn encode_fields(&self) -> String {
        let id = self
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNSET.to_string());
        let end = self
            .end
            .map(|t| t.format(PLAN_TIME_FORMAT).to_string())
            .unwrap_or_else(|| UNSET.to_string());
        let (target_type, target_id) = match self.target {
            OverrideTarget::Hub => ("0".to_string(), UNSET.to_string()),
            OverrideTarget::Zone(zone) => ("1".to_string(), zone.to_string()),
        };
        format!(
            "{id} {} {} {end} {} {target_type} {target_id}",
            self.mode as u8,
            self.kind as u8,
            self.start.format(PLAN_TIME_FORMAT),
        )
    }
}

// ── Parsing helpers ──────────────────────────────────────────────

fn fields_after<'a>(
    line: &'a str,
    prefix: &str,
) -> Result<std::str::SplitWhitespace<'a>, HubError> {
    line.strip_prefix(prefix)
        .map(str::split_whitespace)
        .ok_or_else(|| HubError::ProtocolViolation(format!("expected {prefix}, got {line:?}")))
}

/// Extracts the override id, the first field of a `B03` line.
pub fn parse_assigned_id(line: &str) -> Result<u32, HubError> {
    let raw = fields_after(line, OVERRIDE_ADDED)?
        .next()
        .ok_or_else(|| HubError::ProtocolViolation(format!("{OVERRIDE_ADDED} without id")))?;
    raw.parse::<u32>().map_err(|_| {
        HubError::ProtocolViolation(format!("invalid override id {raw:?} in {line:?}"))
    })
}

fn parse_small(raw: &str, what: &str) -> Result<u8, HubError> {
    raw.parse()
        .map_err(|_| HubError::InvalidOverride(format!("bad {what} {raw:?}")))
}

fn parse_time(raw: &str) -> Result<Option<NaiveDateTime>, HubError> {
    if raw == UNSET {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(raw, PLAN_TIME_FORMAT)
        .map(Some)
        .map_err(|e| HubError::InvalidOverride(format!("bad time {raw:?}: {e}")))
}
