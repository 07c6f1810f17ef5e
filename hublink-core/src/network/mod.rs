//! Transport to the hub: the line-handler seam, the `HubTransport` trait the
//! supervisor drives, and the TCP implementation of it.

pub mod connection;

pub use connection::{ConnectionInfo, HubConnection};

use std::time::Duration;

use async_trait::async_trait;

use crate::HubError;
use crate::protocol::OverridePlan;

/// Receives every protocol line the connection forwards, in wire order.
pub trait LineHandler: Send + Sync {
    fn on_line(&self, line: &str);
}

impl<F> LineHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_line(&self, line: &str) {
        self(line)
    }
}

/// Protocol operations on a single hub link.
///
/// Every method that needs a socket and finds none connects first, except
/// the reads, which fail with [`HubError::NotConnected`].
#[async_trait]
pub trait HubTransport: Send + 'static {
    /// Opens the socket, runs the `HELLO`/`HANDSHAKE` negotiation and one
    /// full refresh.
    async fn connect(&mut self) -> Result<(), HubError>;

    /// Sends a bare `HANDSHAKE` keepalive without waiting for the echo.
    async fn handshake(&mut self) -> Result<(), HubError>;

    /// Runs the `G00` … `H05` exchange.
    async fn refresh_all(&mut self) -> Result<(), HubError>;

    /// Runs the `A03` / `B03` / `U03` exchange and returns the assigned id.
    async fn set_override(&mut self, plan: &mut OverridePlan) -> Result<u32, HubError>;

    /// Whether bytes are already waiting to be read.
    fn has_pending_data(&self) -> bool;

    /// Reads and forwards one line, skipping a keepalive echo.
    ///
    /// Expiry of `timeout` is reported as [`HubError::Timeout`].
    async fn process_one_read(&mut self, timeout: Duration) -> Result<(), HubError>;

    /// Closes the socket. The link is disconnected afterwards even on error.
    async fn disconnect(&mut self) -> Result<(), HubError>;

    fn is_connected(&self) -> bool;
}
