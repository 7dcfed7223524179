//! Project identity declared once per connection.
//!
//! The name becomes a directory under the receiver's build root, and it comes
//! from an untrusted peer, so it must be exactly one plain path segment.

use std::fmt::{self, Display, Formatter};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Project name is empty")]
    EmptyName,
    #[error("Project name {0:?} is a reserved path segment")]
    ReservedName(String),
    #[error("Project name {0:?} contains a path separator")]
    Separator(String),
    #[error("Project name {0:?} contains whitespace or control characters")]
    InvalidCharacter(String),
    #[error("Project kind {0:?} must be a single non-empty token")]
    InvalidKind(String),
}

/// The `{name, kind}` pair announced in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectIdentity {
    pub name: String,
    pub kind: String,
}

impl ProjectIdentity {
    /// Build an identity without validation (decoded tokens are checked
    /// later, where the name is turned into a path).
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }

    /// Build an identity that is guaranteed to survive the handshake encoding
    /// and the receiver's name checks.
    pub fn validated(name: impl Into<String>, kind: impl Into<String>) -> Result<Self, IdentityError> {
        let identity = Self::new(name, kind);
        validate_project_name(&identity.name)?;
        validate_kind(&identity.kind)?;
        Ok(identity)
    }
}

impl Display for ProjectIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

fn is_forbidden_char(c: char) -> bool {
    c.is_whitespace() || c.is_control()
}

/// Check that `name` is a single path segment with no traversal.
pub fn validate_project_name(name: &str) -> Result<(), IdentityError> {
    if name.is_empty() {
        return Err(IdentityError::EmptyName);
    }
    if name == "." || name == ".." {
        return Err(IdentityError::ReservedName(name.to_string()));
    }
    if name.contains(['/', '\\']) {
        return Err(IdentityError::Separator(name.to_string()));
    }
    // Also rejects NUL
    if name.chars().any(is_forbidden_char) {
        return Err(IdentityError::InvalidCharacter(name.to_string()));
    }
    // Drive-relative names like "C:" resolve outside the root on Windows
    if name.contains(':') {
        return Err(IdentityError::Separator(name.to_string()));
    }
    Ok(())
}

/// Check that `kind` is a single whitespace-free token.
pub fn validate_kind(kind: &str) -> Result<(), IdentityError> {
    if kind.is_empty() || kind.chars().any(is_forbidden_char) {
        return Err(IdentityError::InvalidKind(kind.to_string()));
    }
    Ok(())
}
