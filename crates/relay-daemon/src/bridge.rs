//! Turns filesystem notifications into frames on the outbound connection.
//!
//! The bridge owns the connection handle outright; nothing else writes to it.
//! A failed read drops that one change. A failed write detaches the
//! connection: no further writes are attempted until a new one is attached.

use crate::watcher::{FileEvent, FileEventKind, is_hidden};
use relay_core::ChangeUnit;
use relay_core::fs::{FileSystem, FsError};
use relay_core::protocol::write_frame;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{path} is not inside watch root {root}")]
    OutsideRoot { path: String, root: String },

    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: FsError,
    },

    #[error("Connection lost while sending {}: {source}", unit.relative_path)]
    ConnectionLost {
        unit: ChangeUnit,
        #[source]
        source: io::Error,
    },

    #[error("No usable connection for {}", .0.relative_path)]
    Detached(ChangeUnit),
}

impl BridgeError {
    /// Whether the connection (rather than just one change) is affected.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. } | Self::Detached(_))
    }

    /// The undelivered unit, for connection errors.
    pub fn into_unit(self) -> Option<ChangeUnit> {
        match self {
            Self::ConnectionLost { unit, .. } | Self::Detached(unit) => Some(unit),
            _ => None,
        }
    }
}

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { relative_path: String, bytes: usize },
    /// Deletions are not propagated
    SkippedDeletion,
}

/// Compute the `/`-separated wire path of `path` relative to `root`.
pub fn relative_wire_path(root: &Path, path: &Path) -> Result<String, BridgeError> {
    let outside = || BridgeError::OutsideRoot {
        path: path.display().to_string(),
        root: root.display().to_string(),
    };

    let relative = path.strip_prefix(root).map_err(|_| outside())?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => segments.push(
                name.to_str()
                    .ok_or_else(|| BridgeError::NonUtf8Path(path.display().to_string()))?,
            ),
            Component::CurDir => continue,
            _ => return Err(outside()),
        }
    }

    if segments.is_empty() {
        return Err(outside());
    }
    Ok(segments.join("/"))
}

/// Sender-side adapter from file events to frames.
pub struct WatchBridge<W, F> {
    conn: Option<W>,
    fs: F,
    frames_sent: u64,
}

impl<W, F> WatchBridge<W, F>
where
    W: AsyncWrite + Unpin,
    F: FileSystem,
{
    pub fn new(conn: W, fs: F) -> Self {
        Self {
            conn: Some(conn),
            fs,
            frames_sent: 0,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.conn.is_some()
    }

    /// Install a new connection after the previous one failed.
    pub fn attach(&mut self, conn: W) {
        self.conn = Some(conn);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Handle one notification from the watcher.
    pub async fn handle_event(&mut self, event: &FileEvent) -> Result<Delivery, BridgeError> {
        if event.kind == FileEventKind::Deleted {
            debug!("Not propagating deletion of {}", event.path.display());
            return Ok(Delivery::SkippedDeletion);
        }

        let unit = self.load(&event.root, &event.path).await?;
        let relative_path = unit.relative_path.clone();
        let bytes = unit.content.len();
        self.send_unit(unit).await?;

        Ok(Delivery::Sent {
            relative_path,
            bytes,
        })
    }

    /// Read the file's current contents into a unit.
    pub async fn load(&self, root: &Path, path: &Path) -> Result<ChangeUnit, BridgeError> {
        let relative_path = relative_wire_path(root, path)?;
        let content = self
            .fs
            .read(path)
            .await
            .map_err(|source| BridgeError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Ok(ChangeUnit {
            relative_path,
            content,
        })
    }

    /// Write one frame. On failure the connection is detached for good.
    pub async fn send_unit(&mut self, unit: ChangeUnit) -> Result<(), BridgeError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(BridgeError::Detached(unit));
        };

        let written = write_frame(conn, &unit).await;
        if let Err(source) = written {
            self.conn = None;
            return Err(BridgeError::ConnectionLost { unit, source });
        }

        self.frames_sent += 1;
        debug!(
            "Sent {} ({} bytes)",
            unit.relative_path,
            unit.content.len()
        );
        Ok(())
    }

    /// Send every regular file under `root` once.
    ///
    /// Unreadable files are skipped with a warning; a connection error stops
    /// the walk and is returned. Symlinked directories are not followed.
    pub async fn send_tree(&mut self, root: &Path, include_hidden: bool) -> Result<usize, BridgeError> {
        let mut sent = 0;
        let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let entries = match self.fs.list(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            for entry in entries {
                let path = dir.join(&entry.name);
                if !include_hidden {
                    if let Ok(relative) = path.strip_prefix(root) {
                        if is_hidden(relative) {
                            continue;
                        }
                    }
                }

                if entry.is_dir {
                    stack.push(path);
                    continue;
                }

                match self.load(root, &path).await {
                    Ok(unit) => {
                        self.send_unit(unit).await?;
                        sent += 1;
                    }
                    Err(e) => warn!("Skipping {}: {}", path.display(), e),
                }
            }
        }

        Ok(sent)
    }
}
