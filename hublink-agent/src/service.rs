//! Agent service core logic.
//!
//! Wires a `HubConnection` into a `Supervisor`, logs everything the hub
//! reports, optionally requests an override once the link is up, and runs
//! until stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{info, warn};

use hublink_core::{
    Health, HealthListener, HealthStatus, HubConnection, HubError, LineHandler, OverrideMode,
    OverridePlan, Supervisor, SupervisorState,
};

use crate::config::AgentConfig;

// ── AgentService ─────────────────────────────────────────────────

/// The top-level agent service.
pub struct AgentService {
    config: AgentConfig,
    override_mode: Option<OverrideMode>,
    running: Arc<AtomicBool>,
}

impl AgentService {
    /// Create a new agent service with the given config.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            override_mode: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Request a hub-wide constant override as soon as the link is up.
    pub fn with_override(mut self, mode: OverrideMode) -> Self {
        self.override_mode = Some(mode);
        self
    }

    /// Obtain a handle that can be used to stop the service from another
    /// task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run the service until stopped.
    ///
    /// Configuration errors are returned before anything is spawned;
    /// link failures are handled by the supervisor and only logged. A stop
    /// requested before `run` makes it return without connecting.
    pub async fn run(&self) -> Result<(), HubError> {
        let info = self.config.to_connection_info()?;
        let timing = self.config.to_timing();
        if !self.is_running() {
            info!("stop requested before start");
            return Ok(());
        }

        let connection = HubConnection::new(info.clone(), timing.io_timeout, line_logger());
        let handle = Supervisor::spawn(connection, timing, health_logger());
        info!(hub = %info, serial = %info.serial(), "supervising hub link");

        if let Some(mode) = self.override_mode {
            let mut states = handle.subscribe();
            let connected = tokio::select! {
                connected = Self::wait_for_connected(&mut states) => connected,
                _ = Self::wait_for_stop(&self.running) => false,
            };
            if connected {
                let created = chrono::Local::now().naive_local();
                let mut plan = OverridePlan::constant_for_hub(mode, created);
                match handle.request_override(&mut plan).await {
                    Ok(id) => info!(id, %mode, "override active"),
                    Err(e) => warn!(%mode, "override request failed: {e}"),
                }
            }
        }

        Self::wait_for_stop(&self.running).await;
        handle.shutdown().await;
        info!("agent stopped");
        Ok(())
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Internal ─────────────────────────────────────────────────

    /// Resolves once the supervisor reports `Connected`, or `false` if it
    /// exits first.
    async fn wait_for_connected(states: &mut watch::Receiver<SupervisorState>) -> bool {
        loop {
            if *states.borrow_and_update() == SupervisorState::Connected {
                return true;
            }
            if states.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Async helper: resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

/// Logs every line the hub forwards.
fn line_logger() -> Arc<dyn LineHandler> {
    Arc::new(|line: &str| info!(target: "hublink::lines", "{line}"))
}

/// Logs health changes.
fn health_logger() -> Arc<dyn HealthListener> {
    Arc::new(|health: &Health| match health.status {
        HealthStatus::Online => info!("hub online"),
        HealthStatus::Offline => {
            warn!(reason = ?health.reason, "hub offline: {}", health.message)
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────
