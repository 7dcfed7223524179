//! Sender event loop: watcher events in, frames out.
//!
//! Notifications are handled one at a time in arrival order, so frames leave
//! in the order the watcher reported the changes. What happens after a failed
//! write depends on the [`ReconnectPolicy`].

use crate::bridge::{BridgeError, Delivery, WatchBridge};
use crate::config::ReconnectPolicy;
use crate::outgoing::{ConnectError, Connector, PendingQueue, ReconnectConfig, calculate_backoff};
use crate::watcher::FileEvent;
use relay_core::FileSystem;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("Connection to receiver lost: {0}")]
    ConnectionLost(#[source] BridgeError),

    #[error("Gave up reconnecting after {attempts} attempt(s): {source}")]
    ReconnectFailed {
        attempts: u32,
        #[source]
        source: ConnectError,
    },
}

/// Drives a [`WatchBridge`] from watcher channels.
pub struct Sender<C: Connector, F> {
    bridge: WatchBridge<C::Conn, F>,
    connector: C,
    policy: ReconnectPolicy,
    pending: PendingQueue,
}

impl<C, F> Sender<C, F>
where
    C: Connector,
    F: FileSystem,
{
    /// `conn` is an already handshaken connection from `connector`.
    pub fn new(conn: C::Conn, fs: F, connector: C, policy: ReconnectPolicy) -> Self {
        let capacity = match &policy {
            ReconnectPolicy::Never => 0,
            ReconnectPolicy::Backoff(config) => config.max_pending,
        };
        Self {
            bridge: WatchBridge::new(conn, fs),
            connector,
            policy,
            pending: PendingQueue::new(capacity),
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.bridge.frames_sent()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Send every existing file under `root` once.
    pub async fn initial_scan(&mut self, root: &Path, include_hidden: bool) -> Result<usize, SenderError> {
        loop {
            match self.bridge.send_tree(root, include_hidden).await {
                Ok(sent) => {
                    info!("Initial scan sent {} file(s)", sent);
                    return Ok(sent);
                }
                // Rescanning after a reconnect resends whole files, which is harmless
                Err(e) => self.recover(e).await?,
            }
        }
    }

    /// Process events until the event channel closes.
    ///
    /// Watcher errors are logged and do not stop the loop. Returns an error
    /// only when the connection is gone for good.
    pub async fn run(
        &mut self,
        events: &mut UnboundedReceiver<FileEvent>,
        errors: &mut UnboundedReceiver<notify::Error>,
    ) -> Result<(), SenderError> {
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        debug!("Watcher event channel closed");
                        return Ok(());
                    };
                    self.on_event(&event).await?;
                }

                Some(e) = errors.recv() => {
                    warn!("File watcher error: {}", e);
                }
            }
        }
    }

    async fn on_event(&mut self, event: &FileEvent) -> Result<(), SenderError> {
        match self.bridge.handle_event(event).await {
            Ok(Delivery::Sent {
                relative_path,
                bytes,
            }) => {
                info!("Relayed {} ({} bytes)", relative_path, bytes);
                Ok(())
            }
            Ok(Delivery::SkippedDeletion) => Ok(()),
            Err(e) if e.is_connection_error() => self.recover(e).await,
            Err(e) => {
                warn!("Dropping change: {}", e);
                Ok(())
            }
        }
    }

    /// Handle a connection error according to the policy.
    async fn recover(&mut self, err: BridgeError) -> Result<(), SenderError> {
        let config = match &self.policy {
            ReconnectPolicy::Never => {
                error!("{}", err);
                return Err(SenderError::ConnectionLost(err));
            }
            ReconnectPolicy::Backoff(config) => config.clone(),
        };

        warn!("{}", err);
        if let Some(unit) = err.into_unit() {
            self.pending.push(unit);
        }

        loop {
            self.reconnect(&config).await?;
            if self.flush_pending().await {
                return Ok(());
            }
        }
    }

    async fn reconnect(&mut self, config: &ReconnectConfig) -> Result<(), SenderError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let delay = calculate_backoff(attempt, config);
            info!(
                "Reconnecting to {} in {:?} (attempt {}, {} change(s) pending)",
                self.connector.address(),
                delay,
                attempt,
                self.pending.len()
            );
            tokio::time::sleep(delay).await;

            match self.connector.connect().await {
                Ok(conn) => {
                    self.bridge.attach(conn);
                    info!("Reconnected to {}", self.connector.address());
                    return Ok(());
                }
                Err(source) => {
                    if config.exceeded_max_attempts(attempt) {
                        error!("Giving up on {}: {}", self.connector.address(), source);
                        return Err(SenderError::ReconnectFailed {
                            attempts: attempt,
                            source,
                        });
                    }
                    warn!("Reconnect attempt {} failed: {}", attempt, source);
                }
            }
        }
    }

    /// Send queued units in order. Returns false if the connection broke again.
    async fn flush_pending(&mut self) -> bool {
        let mut flushed = 0;
        while let Some(unit) = self.pending.pop_front() {
            if let Err(e) = self.bridge.send_unit(unit).await {
                warn!("{}", e);
                if let Some(unit) = e.into_unit() {
                    self.pending.requeue(unit);
                }
                return false;
            }
            flushed += 1;
        }
        if flushed > 0 {
            info!("Flushed {} pending change(s)", flushed);
        }
        true
    }
}
