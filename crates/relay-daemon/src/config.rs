//! Runtime configuration for both roles.
//!
//! The CLI builds these from flags; tests construct them directly.

use crate::outgoing::ReconnectConfig;
use relay_core::FrameLimits;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default address the receiver listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default address the sender connects to.
pub const DEFAULT_SERVER_ADDR: &str = "localhost:8080";

/// Default root under which project trees are materialized.
pub const DEFAULT_BUILD_DIR: &str = "build_directory";

/// Default project kind announced in the handshake.
pub const DEFAULT_PROJECT_KIND: &str = "go";

/// Receiver settings.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Address to listen on
    pub listen: String,
    /// Root under which `<project>/<relative path>` is written
    pub build_dir: PathBuf,
    /// Bounds on peer-declared frame lengths
    pub limits: FrameLimits,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
            limits: FrameLimits::default(),
        }
    }
}

/// What the sender does when a frame write fails.
#[derive(Debug, Clone, Default)]
pub enum ReconnectPolicy {
    /// The connection is unusable after the first failed write; the sender stops.
    #[default]
    Never,
    /// Reconnect with exponential backoff, queueing undeliverable units meanwhile.
    Backoff(ReconnectConfig),
}

/// Sender settings.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Directory to watch
    pub target_dir: PathBuf,
    /// Receiver address
    pub server: String,
    /// Project name announced in the handshake
    pub project_name: String,
    /// Project kind announced in the handshake
    pub project_kind: String,
    /// Debounce window for filesystem events
    pub debounce: Duration,
    /// Relay files under dot-directories and dotfiles too
    pub include_hidden: bool,
    /// Send every existing file once after connecting
    pub initial_scan: bool,
    pub reconnect: ReconnectPolicy,
}

impl SenderConfig {
    /// Config with defaults; the project name is the target directory's name.
    pub fn new(target_dir: PathBuf) -> Self {
        let project_name = default_project_name(&target_dir).unwrap_or_default();
        Self {
            target_dir,
            server: DEFAULT_SERVER_ADDR.to_string(),
            project_name,
            project_kind: DEFAULT_PROJECT_KIND.to_string(),
            debounce: Duration::from_millis(200),
            include_hidden: false,
            initial_scan: false,
            reconnect: ReconnectPolicy::Never,
        }
    }
}

/// Last component of the (canonicalized when possible) directory path.
///
/// Canonicalizing first means `.` or `foo/..` still yield a real name.
pub fn default_project_name(target_dir: &Path) -> Option<String> {
    let resolved = target_dir
        .canonicalize()
        .unwrap_or_else(|_| target_dir.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
}
