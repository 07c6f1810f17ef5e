use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::network::{HubTransport, LineHandler};
use crate::protocol::{self, HubSerial, OverridePlan};
use crate::{HubError, HubLineCodec};

type Link = Framed<TcpStream, HubLineCodec>;

/// Where the hub lives and who we claim to be talking to.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
    serial: HubSerial,
}

impl ConnectionInfo {
    /// Endpoint on the hub's standard port.
    pub fn new(host: impl Into<String>, serial: HubSerial) -> Self {
        Self::with_port(host, protocol::HUB_PORT, serial)
    }

    pub fn with_port(host: impl Into<String>, port: u16, serial: HubSerial) -> Self {
        Self {
            host: host.into(),
            port,
            serial,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn serial(&self) -> &HubSerial {
        &self.serial
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A line-protocol connection to a single hub.
///
/// Holds at most one socket. The socket is dropped whenever a read or write
/// fails, so `is_connected` turning false is how callers learn the link died.
pub struct HubConnection {
    info: ConnectionInfo,
    // Bounds connect and every read inside a multi-line exchange.
    io_timeout: Duration,
    handler: Arc<dyn LineHandler>,
    link: Option<Link>,
}

impl fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConnection")
            .field("info", &self.info)
            .field("io_timeout", &self.io_timeout)
            .field("connected", &self.link.is_some())
            .finish()
    }
}

impl HubConnection {
    pub fn new(info: ConnectionInfo, io_timeout: Duration, handler: Arc<dyn LineHandler>) -> Self {
        Self {
            info,
            io_timeout,
            handler,
            link: None,
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    // ── Line I/O ─────────────────────────────────────────────────

    async fn send_line(&mut self, line: &str) -> Result<(), HubError> {
        let link = self.link.as_mut().ok_or(HubError::NotConnected)?;
        trace!(hub = %self.info, "-> {line}");
        if let Err(e) = link.send(line).await {
            self.link = None;
            return Err(e);
        }
        Ok(())
    }

    /// Reads one line. `Ok(None)` is end of stream.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HubError> {
        let link = self.link.as_mut().ok_or(HubError::NotConnected)?;
        match tokio::time::timeout(timeout, link.next()).await {
            Err(_) => Err(HubError::Timeout(timeout)),
            Ok(None) => Ok(None),
            Ok(Some(Err(e))) => {
                self.link = None;
                Err(e)
            }
            Ok(Some(Ok(line))) => {
                trace!(hub = %self.info, "<- {line}");
                Ok(Some(line))
            }
        }
    }

    /// Reads a line that a multi-line exchange is waiting for.
    async fn read_expected(&mut self, awaiting: &'static str) -> Result<String, HubError> {
        match self.read_line(self.io_timeout).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => {
                self.link = None;
                Err(HubError::ConnectionClosed)
            }
            Err(HubError::Timeout(after)) => Err(HubError::ExchangeTimeout { awaiting, after }),
            Err(e) => Err(e),
        }
    }

    /// Reads a line during steady state. Expiry stays a plain `Timeout`.
    async fn read_steady(&mut self, timeout: Duration) -> Result<String, HubError> {
        match self.read_line(timeout).await? {
            Some(line) => Ok(line),
            None => {
                self.link = None;
                Err(HubError::ConnectionClosed)
            }
        }
    }

    fn forward(&self, line: &str) {
        self.handler.on_line(line);
    }

    // ── Exchanges ────────────────────────────────────────────────

    async fn open_session(&mut self) -> Result<(), HubError> {
        let now = chrono::Local::now().naive_local();
        self.send_line(&protocol::hello_line(self.info.serial(), now))
            .await?;

        let reply = self
            .read_expected(protocol::HELLO)
            .await
            .map_err(|e| HubError::ProtocolViolation(format!("no reply to HELLO: {e}")))?;
        protocol::check_hello_response(&reply)?;

        self.send_line(protocol::HANDSHAKE).await?;
        let reply = self
            .read_expected(protocol::HANDSHAKE)
            .await
            .map_err(|e| HubError::ProtocolViolation(format!("no reply to HANDSHAKE: {e}")))?;
        if !protocol::has_prefix(&reply, protocol::HANDSHAKE) {
            return Err(HubError::ProtocolViolation(format!(
                "expected {}, got {reply:?}",
                protocol::HANDSHAKE
            )));
        }

        debug!(hub = %self.info, "handshake complete");
        self.full_refresh().await
    }

    async fn full_refresh(&mut self) -> Result<(), HubError> {
        self.send_line(protocol::GET_ALL).await?;
        let mut count = 0usize;
        loop {
            let line = match self.read_line(self.io_timeout).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    warn!(hub = %self.info, lines = count, "hub closed stream during full refresh");
                    self.link = None;
                    return Ok(());
                }
                Err(HubError::Timeout(after)) => {
                    return Err(HubError::ExchangeTimeout {
                        awaiting: protocol::DUMP_END,
                        after,
                    });
                }
                Err(e) => return Err(e),
            };
            count += 1;
            self.forward(&line);
            if protocol::has_prefix(&line, protocol::DUMP_END) {
                debug!(hub = %self.info, lines = count, "full refresh complete");
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl HubTransport for HubConnection {
    async fn connect(&mut self) -> Result<(), HubError> {
        if self.link.is_some() {
            let _ = self.disconnect().await;
        }

        let addr = self.info.to_string();
        info!(hub = %addr, "connecting");
        let stream = tokio::time::timeout(self.io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )
            })??;
        stream.set_nodelay(true)?;
        self.link = Some(Framed::new(stream, HubLineCodec::new()));

        if let Err(e) = self.open_session().await {
            warn!(hub = %addr, error = %e, "session setup failed");
            self.link = None;
            return Err(e);
        }
        info!(hub = %addr, "connected");
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), HubError> {
        if !self.is_connected() {
            return self.connect().await;
        }
        self.send_line(protocol::HANDSHAKE).await
    }

    async fn refresh_all(&mut self) -> Result<(), HubError> {
        if !self.is_connected() {
            return self.connect().await;
        }
        self.full_refresh().await
    }

    async fn set_override(&mut self, plan: &mut OverridePlan) -> Result<u32, HubError> {
        if !self.is_connected() {
            self.connect().await?;
        }

        self.send_line(&plan.add_command()).await?;
        let id = loop {
            let line = self.read_expected(protocol::OVERRIDE_ADDED).await?;
            self.forward(&line);
            if protocol::has_prefix(&line, protocol::OVERRIDE_ADDED) {
                break plan.confirm_from(&line)?;
            }
        };

        info!(hub = %self.info, id, mode = %plan.mode, "override confirmed");
        self.send_line(&plan.update_command()?).await?;
        Ok(id)
    }

    fn has_pending_data(&self) -> bool {
        let Some(link) = self.link.as_ref() else {
            return false;
        };
        if !link.read_buffer().is_empty() {
            return true;
        }
        // Readiness without data (EOF or error) also counts: the next read
        // will surface it.
        let mut probe = [0u8; 1];
        link.get_ref().peek(&mut probe).now_or_never().is_some()
    }

    async fn process_one_read(&mut self, timeout: Duration) -> Result<(), HubError> {
        let mut line = self.read_steady(timeout).await?;
        if protocol::has_prefix(&line, protocol::HANDSHAKE) {
            trace!(hub = %self.info, "dropping keepalive echo");
            line = self.read_steady(timeout).await?;
        }
        self.forward(&line);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), HubError> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        info!(hub = %self.info, "disconnecting");
        let mut stream = link.into_inner();
        stream.shutdown().await.map_err(HubError::Disconnect)
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.get_ref().peer_addr().is_ok())
    }
}
