//! # hublink-core
//!
//! Resilient client for a home-automation hub that speaks a CR-terminated
//! ASCII line protocol over TCP.
//!
//! This crate contains:
//! - **Codec**: `HubLineCodec` for framed TCP I/O via `tokio_util`
//! - **Protocol**: wire constants, `HubSerial`, reject reasons and `OverridePlan`
//! - **Network**: `HubConnection`, the `HubTransport` it implements, and the
//!   `LineHandler` that receives every forwarded line
//! - **State**: the pure supervisor lifecycle state machine and health model
//! - **Supervisor**: the background worker that keeps the link alive
//! - **Error**: `HubError` — typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod error;
pub mod network;
pub mod protocol;
pub mod state;
pub mod supervisor;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::HubLineCodec;
pub use error::HubError;
pub use network::{ConnectionInfo, HubConnection, HubTransport, LineHandler};
pub use protocol::{HubSerial, OverrideMode, OverridePlan, OverrideTarget, OverrideType};
pub use state::{Health, HealthReason, HealthStatus, SupervisorState};
pub use supervisor::{HealthListener, Supervisor, SupervisorHandle, SupervisorTiming};
