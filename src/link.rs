//! Connection manager for the one physical server connection.
//!
//! [`ServerLink`] is owned exclusively by the worker loop; no caller task
//! ever touches the socket. It establishes the connection (primary then
//! secondary, with a minimum retry interval), tears it down on any I/O error
//! or protocol timeout, and sends keepalive pings when idle. Connect and
//! disconnect transitions are logged edge-triggered, never per attempt, so a
//! long outage produces one notice instead of a storm.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::codec::{self, ResponseCode};
use crate::config::ServerConfig;

/// Bound on every server transaction: connect, ping reply, response byte.
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum interval between connection attempts.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Idle interval after which a keepalive ping is sent.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// The one physical connection and its lifecycle state.
pub(crate) struct ServerLink {
    config: ServerConfig,
    stream: Option<TcpStream>,
    /// Set only when a full connect pass failed, so a fresh disconnect may
    /// retry immediately.
    last_attempt: Option<Instant>,
    last_transaction: Instant,
    /// Edge-trigger guard: true once the current outage has been logged.
    outage_logged: bool,
}

impl ServerLink {
    pub(crate) fn new(mut config: ServerConfig) -> ServerLink {
        config.clamp_client_id();
        ServerLink {
            config,
            stream: None,
            last_attempt: None,
            last_transaction: Instant::now(),
            outage_logged: false,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Swap in a new configuration. The held connection (if any) is kept;
    /// the new addresses take effect on the next connect attempt, which may
    /// happen immediately.
    pub(crate) fn apply_config(&mut self, mut config: ServerConfig) {
        config.clamp_client_id();
        self.config = config;
        self.last_attempt = None;
        info!("applied new server configuration");
    }

    /// Attempt reconnection if disconnected and the retry interval elapsed.
    /// Tries the primary address, then the secondary if configured.
    pub(crate) async fn maybe_connect(&mut self) {
        if self.stream.is_some() {
            return;
        }
        if let Some(at) = self.last_attempt {
            if at.elapsed() < CONNECT_RETRY_INTERVAL {
                return;
            }
        }

        if self.try_connect(self.config.primary).await {
            return;
        }
        if let Some(secondary) = self.config.secondary {
            if self.try_connect(secondary).await {
                return;
            }
        }

        self.last_attempt = Some(Instant::now());
        if !self.outage_logged {
            self.outage_logged = true;
            warn!(primary = %self.config.primary, "unable to connect to server");
        }
    }

    async fn try_connect(&mut self, addr: SocketAddr) -> bool {
        match timeout(SERVER_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                self.outage_logged = false;
                info!(%addr, "connected to server");
                true
            }
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// Close the connection if open. Idempotent.
    pub(crate) fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            warn!("disconnected from server");
        }
    }

    /// Send a keepalive ping if the connection has been idle longer than
    /// [`KEEPALIVE_INTERVAL`]. Any short read, error, or timeout disconnects.
    pub(crate) async fn maybe_ping(&mut self) {
        if self.stream.is_none() {
            return;
        }
        if self.last_transaction.elapsed() < KEEPALIVE_INTERVAL {
            return;
        }

        let request = codec::encode_ping(&self.config.client_id);
        // Stamp unconditionally so a dead socket cannot cause a ping storm.
        self.last_transaction = Instant::now();

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if stream.write_all(request.as_bytes()).await.is_err() {
            self.disconnect();
            return;
        }
        match timeout(SERVER_TIMEOUT, stream.read_u8()).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => self.disconnect(),
        }
    }

    /// Write one encoded request and wait up to [`SERVER_TIMEOUT`] for the
    /// one-byte reply.
    ///
    /// The reply byte is returned verbatim; the broker does not interpret
    /// it. Any write failure, short read, or timeout disconnects and yields
    /// the "system not available" byte instead.
    pub(crate) async fn transact(&mut self, wire: &str) -> u8 {
        let unavailable = ResponseCode::FailSystemUnavailable.byte();

        let Some(stream) = self.stream.as_mut() else {
            return unavailable;
        };

        if stream.write_all(wire.as_bytes()).await.is_err() {
            self.disconnect();
            return unavailable;
        }
        self.last_transaction = Instant::now();

        match timeout(SERVER_TIMEOUT, stream.read_u8()).await {
            Ok(Ok(byte)) => byte,
            Ok(Err(_)) | Err(_) => {
                self.disconnect();
                unavailable
            }
        }
    }
}
