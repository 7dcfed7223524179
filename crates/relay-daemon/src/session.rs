//! Receiver-side session: one accepted connection, from handshake to close.
//!
//! A session reads the handshake, derives the project's persistence root, then
//! decodes and persists frames strictly one at a time. The first decode error,
//! rejected path or failed write ends it. Files written earlier in the session
//! stay on disk; nothing is rolled back.

use relay_core::fs::{FileSystem, FsError};
use relay_core::protocol::{read_frame, read_handshake};
use relay_core::{
    ChangeUnit, FrameLimits, PathSecurityError, PersistenceRoot, ProjectIdentity, ProtocolError,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

/// Why a session ended early. Each variant is fatal to that session only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Rejected path: {0}")]
    PathSecurity(#[from] PathSecurityError),

    #[error("Failed to persist {path}: {source}")]
    File {
        path: String,
        #[source]
        source: FsError,
    },
}

/// Lifecycle of a session.
///
/// `AwaitingHandshake -> Streaming -> Closed`, or straight to `Closed` if the
/// handshake fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Streaming,
    Closed,
}

/// What a session accomplished before it closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Declared identity (None if the handshake never completed)
    pub project: Option<ProjectIdentity>,
    pub frames_applied: u64,
    pub bytes_written: u64,
}

/// State for one accepted connection.
pub struct ProjectSession<F> {
    /// Internal connection ID for logs (e.g., "conn-3")
    conn_id: String,
    fs: F,
    build_dir: Arc<Path>,
    limits: FrameLimits,
    state: SessionState,
    project: Option<ProjectIdentity>,
    frames_applied: u64,
    bytes_written: u64,
}

impl<F: FileSystem> ProjectSession<F> {
    pub fn new(conn_id: impl Into<String>, fs: F, build_dir: Arc<Path>, limits: FrameLimits) -> Self {
        Self {
            conn_id: conn_id.into(),
            fs,
            build_dir,
            limits,
            state: SessionState::AwaitingHandshake,
            project: None,
            frames_applied: 0,
            bytes_written: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            project: self.project.clone(),
            frames_applied: self.frames_applied,
            bytes_written: self.bytes_written,
        }
    }

    /// Drive the session until the stream ends or an error occurs.
    ///
    /// Takes the stream by value so it is dropped, and the connection closed,
    /// as soon as the session is over. A clean close at a frame boundary is `Ok`.
    pub async fn run<S>(&mut self, stream: S) -> Result<SessionSummary, SessionError>
    where
        S: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let result = self.drive(&mut reader).await;
        drop(reader);
        self.state = SessionState::Closed;

        let summary = self.summary();
        match &result {
            Ok(()) => info!(
                "[{}] Session closed: {} file(s), {} bytes written",
                self.conn_id, summary.frames_applied, summary.bytes_written
            ),
            Err(e @ SessionError::File { .. }) => error!(
                "[{}] Session aborted after {} file(s): {}",
                self.conn_id, summary.frames_applied, e
            ),
            Err(e) => warn!(
                "[{}] Session aborted after {} file(s): {}",
                self.conn_id, summary.frames_applied, e
            ),
        }

        result.map(|()| summary)
    }

    async fn drive<R>(&mut self, reader: &mut R) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin,
    {
        let identity = read_handshake(reader).await?;
        let root = PersistenceRoot::new(&self.build_dir, &identity)?;

        info!(
            "[{}] Project {} -> {}",
            self.conn_id,
            identity,
            root.path().display()
        );
        self.project = Some(identity);
        self.state = SessionState::Streaming;

        while let Some(unit) = read_frame(reader, &self.limits).await? {
            self.apply(&root, unit).await?;
        }

        debug!("[{}] Stream ended", self.conn_id);
        Ok(())
    }

    /// Persist one unit, overwriting any existing file in full.
    async fn apply(&mut self, root: &PersistenceRoot, unit: ChangeUnit) -> Result<(), SessionError> {
        let dest = root.resolve(&unit.relative_path)?;
        let file_err = |source| SessionError::File {
            path: dest.display().to_string(),
            source,
        };

        if let Some(parent) = dest.parent() {
            self.fs.ensure_dir(parent).await.map_err(file_err)?;
        }
        self.fs
            .write(&dest, &unit.content)
            .await
            .map_err(file_err)?;

        self.frames_applied += 1;
        self.bytes_written += unit.content.len() as u64;
        debug!(
            "[{}] Wrote {} ({} bytes)",
            self.conn_id,
            unit.relative_path,
            unit.content.len()
        );
        Ok(())
    }
}
