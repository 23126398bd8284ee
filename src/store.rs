//! Filesystem adapter for [`ObjectStore`], used by the CLI: archive keys map
//! to paths below a root directory.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::contract::ObjectStore;
use crate::error::Result;

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are slash-separated; keep them relative to the root.
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = bytes.len();
        tokio::fs::write(&path, bytes).await?;
        info!(key, size, path = %path.display(), "Stored object");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        debug!(key, path = %path.display(), "Reading object");
        Ok(tokio::fs::read(&path).await?)
    }
}
