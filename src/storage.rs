use anyhow::Result;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Video bytes live behind this interface. The deployment points it at R2;
/// locally it is a directory under the configured data dir.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>>;
}

pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub size: u64,
}

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FsBlobStore { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if !is_safe_key(key) {
            anyhow::bail!("unsafe blob key: {}", key);
        }
        Ok(self.root.join(key))
    }
}

fn is_safe_key(key: &str) -> bool {
    let path = Path::new(key);
    if path.is_absolute() || key.is_empty() {
        return false;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".ctype");
    PathBuf::from(os)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        std::fs::write(sidecar_path(&path), content_type)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredBlob>> {
        let path = self.path_for(key)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let content_type = std::fs::read_to_string(sidecar_path(&path))
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        let size = bytes.len() as u64;
        Ok(Some(StoredBlob {
            bytes,
            content_type,
            size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store
            .put("jobs/abc/video.mp4", b"not really mp4", "video/mp4")
            .await
            .unwrap();

        let blob = store.get("jobs/abc/video.mp4").await.unwrap().unwrap();
        assert_eq!(blob.bytes, b"not really mp4");
        assert_eq!(blob.content_type, "video/mp4");
        assert_eq!(blob.size, 14);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.get("jobs/nope/video.mp4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.put("../escape.mp4", b"x", "video/mp4").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }
}
