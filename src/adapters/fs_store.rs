//! Filesystem-backed object store.
//!
//! Keys are `/`-separated paths relative to the store root. Payloads live at
//! `<root>/<key>`; metadata is kept as JSON under `<root>/.metadata/`, named by
//! the SHA256 of the key so any key maps to a flat file name.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

use crate::domain::WorkItem;

use super::{Metadata, ObjectStore, StoredObject};

/// Directory under the root reserved for metadata and temp files
const METADATA_DIR: &str = ".metadata";

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the store in the configured location ($DURABATCH_OBJECTS)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::objects_dir()?))
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root
            .join(METADATA_DIR)
            .join(format!("{}.json", key_digest(key)))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(METADATA_DIR)
            .join(format!(".tmp-{}", Uuid::new_v4()))
    }

    /// Write via a temp file and rename, so readers never see partial content
    async fn write_atomic(&self, target: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::create_dir_all(self.root.join(METADATA_DIR)).await?;

        let temp = self.temp_path();
        fs::write(&temp, content)
            .await
            .with_context(|| format!("Failed to write temp file: {}", temp.display()))?;
        fs::rename(&temp, target)
            .await
            .with_context(|| format!("Failed to move object into place: {}", target.display()))?;

        Ok(())
    }
}

/// Reject keys that would escape the root or collide with reserved paths
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        anyhow::bail!("Object key cannot be empty");
    }

    let path = Path::new(key);
    for (i, component) in path.components().enumerate() {
        match component {
            Component::Normal(part) if i == 0 && part == METADATA_DIR => {
                anyhow::bail!("Object key '{}' uses the reserved {} prefix", key, METADATA_DIR);
            }
            Component::Normal(_) => {}
            _ => anyhow::bail!("Object key '{}' must be a plain relative path", key),
        }
    }

    Ok(())
}

/// Hex SHA256 of a key
fn key_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Walk the root and return every object key (sorted)
fn walk_keys(root: &Path) -> Result<Vec<(String, u64)>> {
    let pattern = format!(
        "{}/**/*",
        glob::Pattern::escape(&root.to_string_lossy())
    );

    let mut keys = Vec::new();
    for entry in glob::glob(&pattern).context("Invalid object store root")? {
        let path = entry.context("Failed to read object store entry")?;
        let meta = std::fs::metadata(&path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if !meta.is_file() {
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.first().map(|p| p == METADATA_DIR).unwrap_or(true) {
            continue;
        }

        keys.push((parts.join("/"), meta.len()));
    }

    keys.sort();
    Ok(keys)
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<WorkItem>> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            anyhow::bail!("Object store root does not exist: {}", self.root.display());
        }

        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || walk_keys(&root))
            .await
            .context("Listing task failed")??;

        Ok(keys
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, size)| WorkItem::new(key, size))
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let path = self.object_path(key)?;

        let payload = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read object: {}", path.display()))
            }
        };

        let metadata_path = self.metadata_path(key);
        let metadata = match fs::read(&metadata_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).with_context(|| {
                format!("Failed to parse metadata: {}", metadata_path.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Metadata::new(),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read metadata: {}", metadata_path.display())
                })
            }
        };

        Ok(Some(StoredObject { payload, metadata }))
    }

    async fn put(&self, key: &str, payload: Vec<u8>, metadata: Metadata) -> Result<()> {
        let path = self.object_path(key)?;

        self.write_atomic(&path, &payload).await?;

        let json = serde_json::to_vec_pretty(&metadata).context("Failed to serialize metadata")?;
        self.write_atomic(&self.metadata_path(key), &json).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path());
        let metadata: Metadata = [("owner".to_string(), "x".to_string())].into_iter().collect();

        store
            .put("images/cat.jpg", b"meow".to_vec(), metadata.clone())
            .await
            .unwrap();

        let object = store.get("images/cat.jpg").await.unwrap().unwrap();
        assert_eq!(object.payload, b"meow");
        assert_eq!(object.metadata, metadata);
    }

    #[tokio::test]
    async fn test_object_without_metadata() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("images")).unwrap();
        std::fs::write(temp.path().join("images/raw.png"), b"png").unwrap();
        let store = FsObjectStore::new(temp.path());

        let object = store.get("images/raw.png").await.unwrap().unwrap();
        assert!(object.metadata.is_empty());
        assert!(store.get("images/missing.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_prefix_and_hides_metadata() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path());

        store.put("images/b.jpg", vec![0; 2], Metadata::new()).await.unwrap();
        store.put("images/a.jpg", vec![0; 4], Metadata::new()).await.unwrap();
        store.put("docs/readme.txt", vec![0; 1], Metadata::new()).await.unwrap();

        let items = store.list("images/").await.unwrap();
        assert_eq!(
            items,
            vec![WorkItem::new("images/a.jpg", 4), WorkItem::new("images/b.jpg", 2)]
        );

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|i| !i.key.starts_with(METADATA_DIR)));
    }

    #[tokio::test]
    async fn test_list_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path().join("absent"));

        assert!(store.list("").await.is_err());
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("images/a.jpg").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("images/../../x").is_err());
        assert!(validate_key(".metadata/abc.json").is_err());
    }

    #[test]
    fn test_key_digest_is_stable() {
        assert_eq!(key_digest("a"), key_digest("a"));
        assert_ne!(key_digest("a"), key_digest("b"));
        assert_eq!(key_digest("a").len(), 64);
    }
}
