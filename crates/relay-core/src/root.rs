//! Per-project persistence root and containment checks for relative paths.

use crate::project::{IdentityError, ProjectIdentity, validate_project_name};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A path from the wire that would land outside the project root.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathSecurityError {
    #[error("Relative path is empty")]
    EmptyPath,

    #[error("Absolute path not allowed: {0:?}")]
    AbsolutePath(String),

    #[error("Path escapes the project root: {0:?}")]
    ParentTraversal(String),

    #[error("Path contains an invalid segment: {0:?}")]
    InvalidSegment(String),

    #[error("Invalid project name: {0}")]
    InvalidProjectName(#[from] IdentityError),
}

/// Directory under which one project's files are written: `<build_dir>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceRoot {
    dir: PathBuf,
}

impl PersistenceRoot {
    /// Derive the root for a project, validating the peer-supplied name.
    pub fn new(build_dir: &Path, identity: &ProjectIdentity) -> Result<Self, PathSecurityError> {
        validate_project_name(&identity.name)?;
        Ok(Self {
            dir: build_dir.join(&identity.name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Map a wire path onto a destination strictly inside this root.
    ///
    /// Both `/` and `\` are treated as separators. Empty and `.` segments are
    /// skipped; `..`, drive prefixes and leading separators are rejected
    /// outright rather than normalized.
    pub fn resolve(&self, relative_path: &str) -> Result<PathBuf, PathSecurityError> {
        if relative_path.starts_with(['/', '\\']) || has_drive_prefix(relative_path) {
            return Err(PathSecurityError::AbsolutePath(relative_path.to_string()));
        }

        let mut dest = self.dir.clone();
        let mut depth = 0usize;
        for segment in relative_path.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => return Err(PathSecurityError::ParentTraversal(relative_path.to_string())),
                s if is_invalid_segment(s) => {
                    return Err(PathSecurityError::InvalidSegment(s.to_string()));
                }
                s => {
                    dest.push(s);
                    depth += 1;
                }
            }
        }

        if depth == 0 {
            return Err(PathSecurityError::EmptyPath);
        }
        debug_assert!(dest.starts_with(&self.dir));
        Ok(dest)
    }
}

/// NUL is never valid. `:` is only invalid on Windows (data streams, drives).
fn is_invalid_segment(segment: &str) -> bool {
    if segment.contains('\0') {
        return true;
    }
    cfg!(windows) && segment.contains(':')
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
