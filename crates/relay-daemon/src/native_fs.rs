//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use relay_core::fs::{FileEntry, FileSystem, FsError, Result};
use std::path::Path;
use tokio::fs;

/// Native filesystem implementation for the daemon
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFs;

impl NativeFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).await.map_err(|e| FsError::io(path, e))
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        fs::write(path, content)
            .await
            .map_err(|e| FsError::io(path, e))
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| FsError::io(path, e))
    }

    async fn list(&self, path: &Path) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(path).await.map_err(|e| FsError::io(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| FsError::io(path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            // file_type does not follow symlinks, so linked directories are not descended into
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| FsError::io(&entry.path(), e))?;

            entries.push(FileEntry {
                name,
                is_dir: file_type.is_dir(),
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_and_overwrite() {
        let temp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let path = temp.path().join("file.txt");

        fs.write(&path, b"first version, longer").await.unwrap();
        fs.write(&path, b"second").await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_write_without_parent_fails() {
        let temp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let path = temp.path().join("missing/dir/file.txt");

        assert!(fs.write(&path, b"x").await.is_err());

        fs.ensure_dir(path.parent().unwrap()).await.unwrap();
        fs.write(&path, b"x").await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let err = fs.read(&temp.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list() {
        let temp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();

        let mut entries = fs.list(temp.path()).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert!(!entries[0].is_dir);
        assert_eq!(entries[1].name, "sub");
        assert!(entries[1].is_dir);
    }
}
