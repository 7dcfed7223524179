//! relay-daemon library: Exposes the sender and receiver components.
//!
//! The binary in `main.rs` wires these together; integration tests use them
//! directly.

pub mod bridge;
pub mod config;
pub mod native_fs;
pub mod outgoing;
pub mod sender;
pub mod server;
pub mod session;
pub mod watcher;

// Re-export key types for convenience
pub use bridge::{BridgeError, Delivery, WatchBridge};
pub use config::{ReceiverConfig, ReconnectPolicy, SenderConfig};
pub use native_fs::NativeFs;
pub use outgoing::{ConnectError, Connector, ReconnectConfig, TcpConnector};
pub use sender::{Sender, SenderError};
pub use server::RelayServer;
pub use session::{ProjectSession, SessionError, SessionState, SessionSummary};
pub use watcher::{FileEvent, FileEventKind, FileWatcher, WatchOptions};
