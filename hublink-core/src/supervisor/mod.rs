//! Background worker that keeps one hub link alive.
//!
//! The worker owns the loop: it connects, keeps the session alive with
//! `HANDSHAKE` or a full refresh, drains pushed lines, and reconnects after
//! a fixed backoff whenever the link fails. Callers talk to it through a
//! [`SupervisorHandle`].
//!
//! All socket access, the worker's and `request_override`'s alike, goes
//! through one `tokio::sync::Mutex` held for a whole exchange, so lines of
//! two exchanges never interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::HubError;
use crate::network::HubTransport;
use crate::protocol::OverridePlan;
use crate::state::{
    Health, HealthTracker, KeepaliveAction, LinkEvent, SupervisorState, Transition,
    keepalive_action, transition,
};

/// Receives health changes. Unchanged health is never re-sent.
pub trait HealthListener: Send + Sync {
    fn on_health_change(&self, health: &Health);
}

impl<F> HealthListener for F
where
    F: Fn(&Health) + Send + Sync,
{
    fn on_health_change(&self, health: &Health) {
        self(health)
    }
}

// ── Timing ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTiming {
    /// Bound on a single blocking read. Also bounds shutdown latency.
    pub io_timeout: Duration,
    /// A full refresh is forced at least this often.
    pub full_scan_interval: Duration,
    /// Pause before each reconnect attempt.
    pub retry_backoff: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(14),
            full_scan_interval: Duration::from_secs(3600),
            retry_backoff: Duration::from_secs(15),
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────

pub struct Supervisor<T: HubTransport> {
    link: Arc<Mutex<T>>,
    timing: SupervisorTiming,
    listener: Arc<dyn HealthListener>,
    cancel: CancellationToken,
    state: SupervisorState,
    state_tx: watch::Sender<SupervisorState>,
    health: HealthTracker,
    last_full_scan: Option<Instant>,
}

impl<T: HubTransport> Supervisor<T> {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(
        link: T,
        timing: SupervisorTiming,
        listener: Arc<dyn HealthListener>,
    ) -> SupervisorHandle<T> {
        let link = Arc::new(Mutex::new(link));
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SupervisorState::Starting);

        let supervisor = Self {
            link: Arc::clone(&link),
            timing,
            listener,
            cancel: cancel.clone(),
            state: SupervisorState::Starting,
            state_tx,
            health: HealthTracker::new(),
            last_full_scan: None,
        };

        SupervisorHandle {
            link,
            cancel,
            state_rx,
            worker: tokio::spawn(supervisor.run()),
        }
    }

    async fn run(mut self) {
        debug!(timing = ?self.timing, "supervisor started");
        while self.state != SupervisorState::Stopped {
            let event = if self.cancel.is_cancelled() {
                LinkEvent::StopRequested
            } else {
                self.step().await
            };
            self.apply(event).await;
        }
        debug!("supervisor exited");
    }

    async fn step(&mut self) -> LinkEvent {
        match self.state {
            SupervisorState::Starting => self.start().await,
            SupervisorState::Connected => self.tick().await,
            SupervisorState::Disconnected => self.reconnect().await,
            SupervisorState::Stopped => LinkEvent::StopRequested,
        }
    }

    async fn start(&mut self) -> LinkEvent {
        let link = Arc::clone(&self.link);
        let mut link = link.lock().await;
        let result = link.refresh_all().await;
        if result.is_ok() {
            self.last_full_scan = Some(Instant::now());
        }
        LinkEvent::from_result(&result)
    }

    async fn tick(&mut self) -> LinkEvent {
        let link = Arc::clone(&self.link);
        let mut link = link.lock().await;
        let result = self.connected_tick(&mut *link).await;
        if result.is_err() {
            // Nothing may use a half-read stream during the backoff.
            if let Err(e) = link.disconnect().await {
                debug!(error = %e, "teardown after failed tick failed");
            }
        }
        LinkEvent::from_result(&result)
    }

    async fn connected_tick(&mut self, link: &mut T) -> Result<(), HubError> {
        let io_timeout = self.timing.io_timeout;

        if link.has_pending_data() {
            idle_is_ok(link.process_one_read(io_timeout).await)?;
        }

        match keepalive_action(
            self.last_full_scan,
            Instant::now(),
            self.timing.full_scan_interval,
        ) {
            KeepaliveAction::FullRefresh => {
                debug!("full scan due");
                link.refresh_all().await?;
                self.last_full_scan = Some(Instant::now());
            }
            KeepaliveAction::Handshake => link.handshake().await?,
        }

        idle_is_ok(link.process_one_read(io_timeout).await)
    }

    async fn reconnect(&mut self) -> LinkEvent {
        tokio::select! {
            _ = self.cancel.cancelled() => return LinkEvent::StopRequested,
            _ = tokio::time::sleep(self.timing.retry_backoff) => {}
        }

        let link = Arc::clone(&self.link);
        let mut link = link.lock().await;
        if let Err(e) = link.disconnect().await {
            debug!(error = %e, "teardown before reconnect failed");
        }
        info!("reconnecting");
        let result = link.connect().await;
        if result.is_ok() {
            self.last_full_scan = Some(Instant::now());
        }
        LinkEvent::from_result(&result)
    }

    async fn apply(&mut self, event: LinkEvent) {
        let from = self.state;
        if let LinkEvent::Failed(health) = &event {
            warn!(state = %from, reason = ?health.reason, "link failure: {}", health.message);
        }

        let Transition { next, health } = transition(from, event);

        if next == SupervisorState::Stopped && from != SupervisorState::Stopped {
            self.close_link().await;
        }
        if next != from {
            info!(%from, to = %next, "supervisor state change");
            self.state = next;
            self.state_tx.send_replace(next);
        }

        if let Some(health) = health.and_then(|h| self.health.update(h)) {
            self.listener.on_health_change(&health);
        }
    }

    async fn close_link(&self) {
        let mut link = self.link.lock().await;
        if let Err(e) = link.disconnect().await {
            warn!(error = %e, "disconnect on stop failed");
        }
    }
}

fn idle_is_ok(result: Result<(), HubError>) -> Result<(), HubError> {
    match result {
        Err(e) if e.is_timeout() => Ok(()),
        other => other,
    }
}

// ── SupervisorHandle ─────────────────────────────────────────────

/// Caller-side view of a running supervisor.
pub struct SupervisorHandle<T: HubTransport> {
    link: Arc<Mutex<T>>,
    cancel: CancellationToken,
    state_rx: watch::Receiver<SupervisorState>,
    worker: JoinHandle<()>,
}

impl<T: HubTransport> SupervisorHandle<T> {
    pub fn state(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_rx.clone()
    }

    /// Runs the override exchange and returns the hub-assigned id.
    ///
    /// Waits for any exchange the worker has in flight, then holds the link
    /// until `U03` is sent.
    pub async fn request_override(&self, plan: &mut OverridePlan) -> Result<u32, HubError> {
        if self.cancel.is_cancelled() {
            return Err(HubError::Stopped);
        }
        let mut link = self.link.lock().await;
        if self.cancel.is_cancelled() {
            return Err(HubError::Stopped);
        }
        link.set_override(plan).await
    }

    /// Asks the worker to stop. It finishes any in-flight exchange first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.worker.await {
            warn!(error = %e, "supervisor task ended abnormally");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────
