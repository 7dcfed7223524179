//! File watcher with debouncing for the sender's watch root.
//!
//! Uses notify-debouncer-mini for efficient file change detection. Events and
//! watcher errors arrive on two separate channels; the sender loop
//! demultiplexes them.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// File event from the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Absolute path that changed
    pub path: PathBuf,
    /// Watch root the path lives under
    pub root: PathBuf,
    /// Type of event
    pub kind: FileEventKind,
}

/// Type of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    /// File was deleted
    Deleted,
}

/// Watch behaviour knobs.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub include_hidden: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            include_hidden: false,
        }
    }
}

/// File watcher that monitors a directory tree.
pub struct FileWatcher {
    /// Canonical watch root
    root: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    /// Receiver for file events
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
    /// Receiver for watcher errors
    error_rx: mpsc::UnboundedReceiver<notify::Error>,
}

impl FileWatcher {
    /// Start watching `root` recursively.
    pub fn new(root: PathBuf, options: WatchOptions) -> Result<Self> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let root = root.canonicalize().unwrap_or(root);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let root_clone = root.clone();

        let mut debouncer = new_debouncer(
            options.debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) =
                            Self::process_event(&event, &root_clone, options.include_hidden)
                        {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = error_tx.send(e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            _debouncer: debouncer,
            event_rx,
            error_rx,
        })
    }

    /// Process a single debounced event, returning a FileEvent if relevant.
    fn process_event(event: &DebouncedEvent, root: &Path, include_hidden: bool) -> Option<FileEvent> {
        let path = &event.path;

        // Events for the root itself or outside it carry no file
        let relative = path.strip_prefix(root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }

        if !include_hidden && is_hidden(relative) {
            return None;
        }

        if path.is_dir() {
            return None;
        }

        // The debouncer collapses event kinds; existence decides
        let kind = if path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };

        debug!("File event: {:?} - {}", kind, relative.display());

        Some(FileEvent {
            path: path.clone(),
            root: root.to_path_buf(),
            kind,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    /// Both receivers at once, for selecting over them together.
    pub fn channels(
        &mut self,
    ) -> (
        &mut mpsc::UnboundedReceiver<FileEvent>,
        &mut mpsc::UnboundedReceiver<notify::Error>,
    ) {
        (&mut self.event_rx, &mut self.error_rx)
    }

    /// Get the canonical watch root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// True if any component of a relative path starts with `.`.
pub fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(Path::new(".git/config")));
        assert!(is_hidden(Path::new("src/.main.go.swp")));
        assert!(is_hidden(Path::new("a/.cache/b.txt")));
        assert!(!is_hidden(Path::new("src/main.go")));
        assert!(!is_hidden(Path::new("no.dots.here/file.tar.gz")));
    }
}
