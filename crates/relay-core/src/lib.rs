//! relay-core: Wire protocol and storage abstractions for relaying file changes.
//!
//! This crate provides:
//! - The handshake and length-prefixed frame codec
//! - Project identity validation
//! - Containment checks for peer-supplied relative paths
//! - The FileSystem trait abstraction (with an in-memory implementation for tests)
//!
//! It does no networking of its own; the daemon crate owns sockets and tasks.

pub mod fs;
pub mod project;
pub mod protocol;
pub mod root;

pub use fs::{FileEntry, FileSystem, FsError, InMemoryFs};
pub use project::{IdentityError, ProjectIdentity};
pub use protocol::{ChangeUnit, FrameField, FrameLimits, ProtocolError};
pub use root::{PathSecurityError, PersistenceRoot};
