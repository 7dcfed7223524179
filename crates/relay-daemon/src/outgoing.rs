//! Outgoing connection to the receiver.
//!
//! Covers:
//! - Connection establishment with handshake
//! - Exponential backoff math for the optional reconnect policy
//! - A bounded queue for units that could not be delivered

use async_trait::async_trait;
use relay_core::protocol::write_handshake;
use relay_core::{ChangeUnit, ProjectIdentity};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// The receiver could not be reached or refused the handshake write.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Cannot reach {address}: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Handshake with {address} failed: {source}")]
    Handshake {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Opens a fresh, handshaken connection to the receiver.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: AsyncWrite + Unpin + Send;

    /// Address used in logs
    fn address(&self) -> &str;

    /// Connect and send the handshake. The returned stream is ready for frames.
    async fn connect(&self) -> Result<Self::Conn, ConnectError>;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    identity: ProjectIdentity,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, identity: ProjectIdentity) -> Self {
        Self {
            address: address.into(),
            identity,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpStream;

    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream, ConnectError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| ConnectError::Unreachable {
                address: self.address.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", self.address, e);
        }

        write_handshake(&mut stream, &self.identity)
            .await
            .map_err(|source| ConnectError::Handshake {
                address: self.address.clone(),
                source,
            })?;

        info!("Connected to {} as project {}", self.address, self.identity);
        Ok(stream)
    }
}

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of attempts per outage (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Units kept while disconnected; the oldest is dropped beyond this
    pub max_pending: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: None, // Unlimited
            max_pending: 256,
        }
    }
}

impl ReconnectConfig {
    /// Check if max attempts exceeded.
    pub fn exceeded_max_attempts(&self, attempts: u32) -> bool {
        self.max_attempts.map(|max| attempts >= max).unwrap_or(false)
    }
}

/// Calculates the next reconnection delay using exponential backoff.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Units waiting for a connection, at most one per path.
///
/// Content is always the whole file, so a newer unit for a path replaces the
/// older one instead of queueing behind it.
#[derive(Debug)]
pub struct PendingQueue {
    units: VecDeque<ChangeUnit>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            units: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Queue a unit as the newest entry, replacing any entry for the same path.
    pub fn push(&mut self, unit: ChangeUnit) {
        self.units
            .retain(|queued| queued.relative_path != unit.relative_path);
        self.units.push_back(unit);
        self.evict_overflow();
    }

    /// Put a unit that failed to send back at the front, unless a newer
    /// version of the same path is already queued.
    pub fn requeue(&mut self, unit: ChangeUnit) {
        if self
            .units
            .iter()
            .any(|queued| queued.relative_path == unit.relative_path)
        {
            return;
        }
        self.units.push_front(unit);
        self.evict_overflow();
    }

    pub fn pop_front(&mut self) -> Option<ChangeUnit> {
        self.units.pop_front()
    }

    fn evict_overflow(&mut self) {
        while self.units.len() > self.capacity {
            if let Some(dropped) = self.units.pop_front() {
                warn!(
                    "Pending queue full ({}), dropping {}",
                    self.capacity, dropped.relative_path
                );
            }
        }
    }
}
