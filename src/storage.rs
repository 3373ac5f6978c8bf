//! Storage sink for extracted images.
//!
//! The captioner writes every image before it asks for a caption, so a
//! failed caption never costs the image itself. [`DirectoryStore`] is the
//! production sink; [`MemoryStore`] keeps bytes in a map for tests and for
//! callers that want to post-process images themselves.

use crate::output::ImageRef;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Accepts `(name, bytes)` and returns a stable reference.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(&self, name: &str, bytes: &[u8]) -> std::io::Result<ImageRef>;
}

/// Writes images into a directory; links are `{link_prefix}/{name}`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    link_prefix: String,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>, link_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            link_prefix: link_prefix.into(),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn link_for(&self, name: &str) -> String {
        let prefix = self.link_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }
}

#[async_trait]
impl ImageStore for DirectoryStore {
    async fn store(&self, name: &str, bytes: &[u8]) -> std::io::Result<ImageRef> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(name);
        tokio::fs::write(&path, bytes).await?;
        debug!("Stored {} ({} bytes)", path.display(), bytes.len());
        Ok(ImageRef {
            name: name.to_string(),
            location: self.link_for(name),
        })
    }
}

/// Keeps images in memory, keyed by name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    images: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names stored so far, sorted.
    pub fn names(&self) -> Vec<String> {
        self.images
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.images.lock().ok().and_then(|m| m.get(name).cloned())
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn store(&self, name: &str, bytes: &[u8]) -> std::io::Result<ImageRef> {
        let mut images = self
            .images
            .lock()
            .map_err(|_| std::io::Error::other("memory store lock poisoned"))?;
        images.insert(name.to_string(), bytes.to_vec());
        Ok(ImageRef {
            name: name.to_string(),
            location: format!("memory://{name}"),
        })
    }
}
