//! Byte-oriented document storage behind the account, certificate and
//! challenge stores.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, trace};

/// Named text documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create or replace a document.
    async fn write_text(&self, name: &str, content: &str) -> std::io::Result<()>;

    /// Read a document; `None` when it does not exist.
    async fn read_text(&self, name: &str) -> std::io::Result<Option<String>>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, name: &str) -> std::io::Result<()>;
}

/// Documents stored as files in one directory.
///
/// The directory is created with 0700 permissions and every file is
/// written with 0600, since documents hold private keys.
#[derive(Debug)]
pub struct LocalDirectory {
    base_path: PathBuf,
}

impl LocalDirectory {
    /// Open (and create if needed) the storage directory.
    ///
    /// The directory is restricted to the owner (0700) on unix.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or its
    /// permissions cannot be set.
    pub fn new(base_path: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(base_path, std::fs::Permissions::from_mode(0o700))?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate storage directory"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    /// Get the storage base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }
}

#[async_trait]
impl BlobStore for LocalDirectory {
    async fn write_text(&self, name: &str, content: &str) -> std::io::Result<()> {
        let path = self.path(name);
        // Write to a sibling and rename so readers never observe a torn document
        let tmp = self.path(&format!(".{}.tmp", name));
        tokio::fs::write(&tmp, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &path).await?;
        trace!(file = %path.display(), bytes = content.len(), "Wrote document");
        Ok(())
    }

    async fn read_text(&self, name: &str) -> std::io::Result<Option<String>> {
        let path = self.path(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(file = %path.display(), "Document not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, name: &str) -> std::io::Result<()> {
        let path = self.path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = %path.display(), "Deleted document");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory documents, for tests and embedders without a disk.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    documents: DashMap<String, String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write_text(&self, name: &str, content: &str) -> std::io::Result<()> {
        self.documents.insert(name.to_string(), content.to_string());
        Ok(())
    }

    async fn read_text(&self, name: &str) -> std::io::Result<Option<String>> {
        Ok(self.documents.get(name).map(|v| v.clone()))
    }

    async fn delete(&self, name: &str) -> std::io::Result<()> {
        self.documents.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_directory_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalDirectory::new(&temp_dir.path().join("state")).unwrap();
        assert!(store.base_path().exists());

        assert_eq!(store.read_text("certs.json").await.unwrap(), None);

        store.write_text("certs.json", "{}").await.unwrap();
        assert_eq!(
            store.read_text("certs.json").await.unwrap(),
            Some("{}".to_string())
        );

        store.delete("certs.json").await.unwrap();
        assert_eq!(store.read_text("certs.json").await.unwrap(), None);

        // Deleting again is not an error
        store.delete("certs.json").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_directory_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let store = LocalDirectory::new(temp_dir.path()).unwrap();
        store.write_text("keys.json", "{}").await.unwrap();

        let mode = std::fs::metadata(temp_dir.path().join("keys.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        assert!(store.is_empty());

        store.write_text("a", "1").await.unwrap();
        store.write_text("a", "2").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.read_text("a").await.unwrap(), Some("2".to_string()));

        store.delete("a").await.unwrap();
        assert_eq!(store.read_text("a").await.unwrap(), None);
    }
}
