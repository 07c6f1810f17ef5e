//! Supervisor lifecycle state machine.
//!
//! Pure decisions only: given a state and what just happened on the link,
//! `transition` says where to go next and what health to report. The
//! supervisor worker performs the I/O and feeds the outcomes back in.
//!
//! ```text
//!  Starting ──ok──► Connected ◄──ok── Disconnected ◄─┐
//!     │               │  ▲ tick / timeout     │ fail │
//!     │ fail          │  └────────┘           └──────┘
//!     └──────────► Disconnected ◄──fail──┘
//!
//!  any ──stop──► Stopped
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::HubError;

// ── SupervisorState ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorState {
    /// First connection attempt not yet made. Initial state.
    #[default]
    Starting,
    Connected,
    /// Waiting out the backoff before the next reconnect.
    Disconnected,
    /// Terminal.
    Stopped,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

// ── Health ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthReason {
    None,
    CommunicationError,
    HandshakeRejected,
}

/// What the status collaborator is told on a health change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub status: HealthStatus,
    pub reason: HealthReason,
    pub message: String,
}

impl Health {
    pub fn online() -> Self {
        Self {
            status: HealthStatus::Online,
            reason: HealthReason::None,
            message: String::new(),
        }
    }

    pub fn offline(reason: HealthReason, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Offline,
            reason,
            message: message.into(),
        }
    }

    /// Offline health describing a failed link operation.
    pub fn from_error(err: &HubError) -> Self {
        let reason = if err.is_rejected() {
            HealthReason::HandshakeRejected
        } else {
            HealthReason::CommunicationError
        };
        Self::offline(reason, err.to_string())
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Online
    }
}

/// Remembers the last reported health so unchanged health is not re-sent.
#[derive(Debug, Default)]
pub struct HealthTracker {
    last: Option<Health>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the health to notify, or `None` if it matches the last one.
    pub fn update(&mut self, health: Health) -> Option<Health> {
        if self.last.as_ref() == Some(&health) {
            return None;
        }
        self.last = Some(health.clone());
        Some(health)
    }

    pub fn last(&self) -> Option<&Health> {
        self.last.as_ref()
    }
}

// ── Transitions ──────────────────────────────────────────────────

/// Outcome of one supervisor step.
#[derive(Debug)]
pub enum LinkEvent {
    /// Connect, reconnect or a steady-state tick succeeded.
    Succeeded,
    /// A bounded read expired with nothing to read.
    Idle,
    /// Any failure other than an idle read.
    Failed(Health),
    StopRequested,
}

impl LinkEvent {
    /// Classifies the result of a link operation.
    pub fn from_result(result: &Result<(), HubError>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(e) if e.is_timeout() => Self::Idle,
            Err(e) => Self::Failed(Health::from_error(e)),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: SupervisorState,
    /// Health implied by `next`, before de-duplication.
    pub health: Option<Health>,
}

impl Transition {
    fn to(next: SupervisorState, health: Option<Health>) -> Self {
        Self { next, health }
    }
}

/// Decides the next state for `event` observed in `state`.
pub fn transition(state: SupervisorState, event: LinkEvent) -> Transition {
    use SupervisorState::*;

    match (state, event) {
        (Stopped, _) => Transition::to(Stopped, None),
        (_, LinkEvent::StopRequested) => Transition::to(Stopped, None),

        (Starting | Disconnected | Connected, LinkEvent::Succeeded) => {
            Transition::to(Connected, Some(Health::online()))
        }
        (Starting | Disconnected | Connected, LinkEvent::Failed(health)) => {
            Transition::to(Disconnected, Some(health))
        }

        // Idle reads never move the machine.
        (Connected, LinkEvent::Idle) => Transition::to(Connected, None),
        (Starting, LinkEvent::Idle) => Transition::to(Starting, None),
        (Disconnected, LinkEvent::Idle) => Transition::to(Disconnected, None),
    }
}

// ── Keepalive scheduling ─────────────────────────────────────────

/// What a connected tick sends to keep the session alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    FullRefresh,
    Handshake,
}

/// A full refresh is due once `interval` has passed since the last one.
pub fn keepalive_action(
    last_full_scan: Option<Instant>,
    now: Instant,
    interval: Duration,
) -> KeepaliveAction {
    match last_full_scan {
        Some(last) if now.saturating_duration_since(last) < interval => KeepaliveAction::Handshake,
        _ => KeepaliveAction::FullRefresh,
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn comm_failure() -> LinkEvent {
        LinkEvent::Failed(Health::offline(HealthReason::CommunicationError, "boom"))
    }

    #[test]
    fn starting_connects_and_goes_online() {
        let t = transition(SupervisorState::Starting, LinkEvent::Succeeded);
        assert_eq!(t.next, SupervisorState::Connected);
        assert_eq!(t.health, Some(Health::online()));
    }

    #[test]
    fn rejected_start_never_reaches_connected() {
        let err = HubError::Rejected {
            code: 1,
            reason: "hub serial number mismatch",
        };
        let t = transition(
            SupervisorState::Starting,
            LinkEvent::from_result(&Err(err)),
        );
        assert_eq!(t.next, SupervisorState::Disconnected);
        let health = t.health.unwrap();
        assert_eq!(health.reason, HealthReason::HandshakeRejected);
        assert!(health.message.contains("serial"));
    }

    #[test]
    fn idle_never_changes_state() {
        for state in [
            SupervisorState::Starting,
            SupervisorState::Connected,
            SupervisorState::Disconnected,
        ] {
            let event = LinkEvent::from_result(&Err(HubError::Timeout(Duration::from_secs(1))));
            let t = transition(state, event);
            assert_eq!(t.next, state);
            assert_eq!(t.health, None);
        }
    }

    #[test]
    fn communication_error_disconnects() {
        let t = transition(SupervisorState::Connected, comm_failure());
        assert_eq!(t.next, SupervisorState::Disconnected);
        assert!(!t.health.unwrap().is_healthy());

        let t = transition(
            SupervisorState::Connected,
            LinkEvent::from_result(&Err(HubError::ConnectionClosed)),
        );
        assert_eq!(t.next, SupervisorState::Disconnected);
    }

    #[test]
    fn stop_is_terminal() {
        for state in [
            SupervisorState::Starting,
            SupervisorState::Connected,
            SupervisorState::Disconnected,
        ] {
            let t = transition(state, LinkEvent::StopRequested);
            assert_eq!(t.next, SupervisorState::Stopped);
            assert_eq!(t.health, None);
        }
        let t = transition(SupervisorState::Stopped, LinkEvent::Succeeded);
        assert_eq!(t.next, SupervisorState::Stopped);
    }

    #[test]
    fn tracker_suppresses_repeats() {
        let mut tracker = HealthTracker::new();
        assert!(tracker.update(Health::online()).is_some());
        assert!(tracker.update(Health::online()).is_none());

        let down = Health::offline(HealthReason::CommunicationError, "refused");
        assert!(tracker.update(down.clone()).is_some());
        assert!(tracker.update(down).is_none());
        assert!(
            tracker
                .update(Health::offline(HealthReason::CommunicationError, "reset"))
                .is_some()
        );
        assert_eq!(tracker.last().map(|h| h.message.as_str()), Some("reset"));
    }

    #[test]
    fn refresh_due_after_interval() {
        let interval = Duration::from_secs(10);
        let t0 = Instant::now();

        assert_eq!(
            keepalive_action(None, t0, interval),
            KeepaliveAction::FullRefresh
        );
        assert_eq!(
            keepalive_action(Some(t0), t0 + Duration::from_secs(5), interval),
            KeepaliveAction::Handshake
        );
        assert_eq!(
            keepalive_action(Some(t0), t0 + Duration::from_secs(10), interval),
            KeepaliveAction::FullRefresh
        );
        assert_eq!(
            keepalive_action(Some(t0), t0 + Duration::from_secs(11), interval),
            KeepaliveAction::FullRefresh
        );
    }
}
