use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub size: usize,
    pub content_type: String,
    pub sha256: String,
}

/// Destination for uploaded and generated assets.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<StoredObject>;

    /// Address returned when no public asset base URL is configured.
    fn fallback_url(&self, key: &str) -> String;
}

/// Public URL for `key`: `base/key` when a base is configured, otherwise the
/// store's own address.
pub fn public_url(base: Option<&str>, key: &str, store: &dyn ObjectStore) -> String {
    let base = base.map(|value| value.trim().trim_end_matches('/')).unwrap_or("");
    if base.is_empty() {
        return store.fallback_url(key);
    }
    format!("{base}/{key}")
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        bail!("invalid object key '{key}'");
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        bail!("invalid object key '{key}'");
    }
    Ok(())
}

fn describe(key: &str, bytes: &[u8], content_type: &str) -> StoredObject {
    StoredObject {
        key: key.to_string(),
        size: bytes.len(),
        content_type: content_type.to_string(),
        sha256: hex::encode(Sha256::digest(bytes)),
    }
}

/// Filesystem-backed store: `root/<key>` plus a `<key>.meta.json` sidecar
/// holding the content type and digest.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalDirStore {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<StoredObject> {
        validate_key(key)?;
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;

        let stored = describe(key, bytes, content_type);
        let meta_path = PathBuf::from(format!("{}.meta.json", path.display()));
        let meta = json!({
            "key": stored.key,
            "content_type": stored.content_type,
            "size": stored.size,
            "sha256": stored.sha256,
        });
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
            .with_context(|| format!("failed to write {}", meta_path.display()))?;
        Ok(stored)
    }

    fn fallback_url(&self, key: &str) -> String {
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        format!("file://{}", root.join(key).display())
    }
}

/// In-process store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<StoredObject> {
        validate_key(key)?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        objects.insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(describe(key, bytes, content_type))
    }

    fn fallback_url(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}
