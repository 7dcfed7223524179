//! FileSystem trait abstraction for the read/write/mkdir calls made by both sides.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in relay-daemon) - Uses tokio::fs
//!
//! Paths are passed through as-is; callers are responsible for resolving them
//! against a watch root or persistence root first.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },
}

impl FsError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.display().to_string())
        } else {
            Self::Io {
                path: path.display().to_string(),
                message: err.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Filesystem operations used by the relay.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read the full contents of a file
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace a file's contents in full. The parent directory must exist.
    async fn write(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Create a directory and all missing parents
    async fn ensure_dir(&self, path: &Path) -> Result<()>;

    /// List directory contents
    async fn list(&self, path: &Path) -> Result<Vec<FileEntry>>;
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
    dirs: RwLock<HashSet<PathBuf>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(HashSet::new()),
        }
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.files.read().unwrap().len()
    }

    /// Paths of all stored files, sorted.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.read().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// A parent is present if it is the implicit root or a created directory.
    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            None => true,
            Some(parent) if parent.as_os_str().is_empty() || parent == Path::new("/") => true,
            Some(parent) => self.dirs.read().unwrap().contains(parent),
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let files = self.files.read().unwrap();
        files
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        if !self.parent_exists(path) {
            return Err(FsError::NotFound(path.display().to_string()));
        }
        if self.dirs.read().unwrap().contains(path) {
            return Err(FsError::Io {
                path: path.display().to_string(),
                message: "is a directory".to_string(),
            });
        }

        let mut files = self.files.write().unwrap();
        files.insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        let files = self.files.read().unwrap();
        let mut dirs = self.dirs.write().unwrap();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() || ancestor == Path::new("/") {
                continue;
            }
            if files.contains_key(ancestor) {
                return Err(FsError::NotDirectory(ancestor.display().to_string()));
            }
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    async fn list(&self, path: &Path) -> Result<Vec<FileEntry>> {
        let dirs = self.dirs.read().unwrap();
        if !dirs.contains(path) {
            return Err(FsError::NotFound(path.display().to_string()));
        }

        let files = self.files.read().unwrap();
        let child_name = |p: &Path| -> Option<String> {
            (p.parent() == Some(path))
                .then(|| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .flatten()
        };

        let mut entries: Vec<FileEntry> = files
            .keys()
            .filter_map(|p| child_name(p))
            .map(|name| FileEntry {
                name,
                is_dir: false,
            })
            .chain(dirs.iter().filter_map(|p| child_name(p)).map(|name| FileEntry {
                name,
                is_dir: true,
            }))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This allows tests to keep a handle on a filesystem shared with sessions
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        (**self).ensure_dir(path).await
    }

    async fn list(&self, path: &Path) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write(Path::new("test.txt"), b"hello world").await.unwrap();
        let content = fs.read(Path::new("test.txt")).await.unwrap();
        assert_eq!(content, b"hello world");

        assert!(matches!(
            fs.read(Path::new("nonexistent.txt")).await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inmemory_fs_write_requires_parent() {
        let fs = InMemoryFs::new();
        let path = Path::new("a/b/c.txt");

        assert!(matches!(
            fs.write(path, b"content").await,
            Err(FsError::NotFound(_))
        ));

        fs.ensure_dir(Path::new("a/b")).await.unwrap();
        fs.write(path, b"content").await.unwrap();
        assert_eq!(
            fs.list(Path::new("a")).await.unwrap(),
            vec![FileEntry {
                name: "b".to_string(),
                is_dir: true
            }]
        );
        assert_eq!(fs.read(path).await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_inmemory_fs_overwrite() {
        let fs = InMemoryFs::new();
        fs.write(Path::new("f"), b"a much longer first version").await.unwrap();
        fs.write(Path::new("f"), b"short").await.unwrap();
        assert_eq!(fs.read(Path::new("f")).await.unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_inmemory_fs_ensure_dir_over_file() {
        let fs = InMemoryFs::new();
        fs.write(Path::new("file"), b"x").await.unwrap();
        assert!(matches!(
            fs.ensure_dir(Path::new("file/sub")).await,
            Err(FsError::NotDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_inmemory_fs_list() {
        let fs = InMemoryFs::new();
        fs.ensure_dir(Path::new("root/sub")).await.unwrap();
        fs.write(Path::new("root/a.txt"), b"a").await.unwrap();
        fs.write(Path::new("root/sub/b.txt"), b"b").await.unwrap();

        let entries = fs.list(Path::new("root")).await.unwrap();
        assert_eq!(
            entries,
            vec![
                FileEntry {
                    name: "a.txt".to_string(),
                    is_dir: false
                },
                FileEntry {
                    name: "sub".to_string(),
                    is_dir: true
                },
            ]
        );

        assert!(matches!(
            fs.list(Path::new("missing")).await,
            Err(FsError::NotFound(_))
        ));
    }
}
