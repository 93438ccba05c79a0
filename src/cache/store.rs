//! Kubeconfig cache storage
//!
//! One entry per context holding the raw bytes last fetched from the node.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

use crate::context::Context;
use crate::error::{KubehopError, KubehopResult};
use crate::fsutil::{write_atomic_async, PRIVATE_MODE};

const ENTRY_EXTENSION: &str = "yml";

/// Keyed storage for fetched kubeconfigs
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, context: &Context) -> KubehopResult<Option<Vec<u8>>>;
    async fn put(&self, context: &Context, content: &[u8]) -> KubehopResult<()>;
    async fn remove(&self, context: &Context) -> KubehopResult<bool>;
}

/// Lowercase hex SHA-256 of `content`
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Summary of one cache entry for listing
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub context: String,
    pub size: u64,
    pub sha256: String,
    pub modified: Option<DateTime<Utc>>,
}

/// Cache under `<cache_dir>/<context>.yml`, owner-only
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn entry_path(&self, context: &Context) -> PathBuf {
        self.dir.join(context.file_name(ENTRY_EXTENSION))
    }

    /// Every entry currently on disk
    pub async fn list(&self) -> KubehopResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        if !self.dir.exists() {
            return Ok(entries);
        }

        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| KubehopError::io("reading cache directory", e))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| KubehopError::io("reading cache entry", e))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != ENTRY_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read(&path)
                .await
                .map_err(|e| KubehopError::io(format!("reading {}", path.display()), e))?;
            let modified = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            entries.push(CacheEntry {
                context: stem.to_string(),
                size: content.len() as u64,
                sha256: sha256_hex(&content),
                modified,
            });
        }

        entries.sort_by(|a, b| a.context.cmp(&b.context));
        Ok(entries)
    }

    /// Remove every entry, returning how many were deleted
    pub async fn clear(&self) -> KubehopResult<usize> {
        let mut removed = 0;
        for entry in self.list().await? {
            let path = self.dir.join(format!("{}.{}", entry.context, ENTRY_EXTENSION));
            fs::remove_file(&path)
                .await
                .map_err(|e| KubehopError::io(format!("removing {}", path.display()), e))?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, context: &Context) -> KubehopResult<Option<Vec<u8>>> {
        let path = self.entry_path(context);
        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KubehopError::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn put(&self, context: &Context, content: &[u8]) -> KubehopResult<()> {
        let path = self.entry_path(context);
        write_atomic_async(path.clone(), content.to_vec(), PRIVATE_MODE)
            .await
            .map_err(|e| KubehopError::io(format!("writing {}", path.display()), e))?;
        debug!("Cached kubeconfig for {} at {}", context, path.display());
        Ok(())
    }

    async fn remove(&self, context: &Context) -> KubehopResult<bool> {
        let path = self.entry_path(context);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(KubehopError::io(format!("removing {}", path.display()), e)),
        }
    }
}

/// In-memory cache
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<Context, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KubehopResult<std::sync::MutexGuard<'_, HashMap<Context, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| KubehopError::Internal("cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, context: &Context) -> KubehopResult<Option<Vec<u8>>> {
        Ok(self.lock()?.get(context).cloned())
    }

    async fn put(&self, context: &Context, content: &[u8]) -> KubehopResult<()> {
        self.lock()?.insert(context.clone(), content.to_vec());
        Ok(())
    }

    async fn remove(&self, context: &Context) -> KubehopResult<bool> {
        Ok(self.lock()?.remove(context).is_some())
    }
}
