//! TCP server accepting sender connections.
//!
//! Every accepted connection runs as its own task with its own
//! `ProjectSession`. Sessions share nothing mutable; the only common state is
//! the build directory path and frame limits, both fixed at construction.
//! There is no cap on concurrent sessions and no read timeout.

use crate::session::{ProjectSession, SessionError, SessionSummary};
use anyhow::Result;
use relay_core::{FileSystem, FrameLimits};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Outcome of one session task.
pub type SessionResult = Result<SessionSummary, SessionError>;

/// Server side of the relay: accepts connections and spawns sessions.
pub struct RelayServer<F> {
    /// Filesystem handed to each session
    fs: F,
    /// Root under which each project's tree is written
    build_dir: Arc<Path>,
    limits: FrameLimits,
    /// Counter for generating connection IDs
    next_conn_id: u64,
}

impl<F> RelayServer<F>
where
    F: FileSystem + Clone + 'static,
{
    pub fn new(fs: F, build_dir: impl Into<PathBuf>, limits: FrameLimits) -> Self {
        let build_dir: PathBuf = build_dir.into();
        Self {
            fs,
            build_dir: Arc::from(build_dir),
            limits,
            next_conn_id: 1,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Relay server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Accept connections forever, one session task per connection.
    ///
    /// A failed accept is logged and the loop carries on.
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    self.accept_connection(stream, addr);
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Start a session for a freshly accepted TCP connection.
    pub fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) -> JoinHandle<SessionResult> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }
        self.spawn_session(stream, addr.to_string())
    }

    /// Start a session over any byte stream.
    ///
    /// The stream is dropped (closing the connection) when the session ends.
    pub fn spawn_session<S>(&mut self, stream: S, peer: String) -> JoinHandle<SessionResult>
    where
        S: AsyncRead + Unpin + Send + 'static,
    {
        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;

        info!("New connection from {} (conn_id: {})", peer, conn_id);

        let mut session = ProjectSession::new(
            conn_id,
            self.fs.clone(),
            Arc::clone(&self.build_dir),
            self.limits,
        );
        tokio::spawn(async move { session.run(stream).await })
    }
}
