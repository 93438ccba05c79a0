//! Persisted tunnel records
//!
//! One JSON file per context under the tunnels directory. Records outlive
//! the process that wrote them; liveness is checked by the supervisor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{KubehopError, KubehopResult};
use crate::fsutil::write_atomic_async;

/// A tunnel started for a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub context: Context,
    pub pid: u32,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub host_alias: String,
    pub created_at: DateTime<Utc>,
}

impl TunnelRecord {
    pub fn new(
        context: Context,
        pid: u32,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
        host_alias: impl Into<String>,
    ) -> Self {
        Self {
            context,
            pid,
            local_port,
            remote_host: remote_host.into(),
            remote_port,
            host_alias: host_alias.into(),
            created_at: Utc::now(),
        }
    }
}

/// Key-value store of tunnel records by context
#[async_trait]
pub trait PidStore: Send + Sync {
    async fn get(&self, context: &Context) -> KubehopResult<Option<TunnelRecord>>;

    /// Insert or overwrite the record for its context
    async fn put(&self, record: &TunnelRecord) -> KubehopResult<()>;

    /// Remove a record; an absent record is not an error
    async fn delete(&self, context: &Context) -> KubehopResult<()>;

    async fn list(&self) -> KubehopResult<Vec<TunnelRecord>>;
}

/// Records as `<dir>/<context>.json`
pub struct FsPidStore {
    dir: PathBuf,
}

impl FsPidStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn record_path(&self, context: &Context) -> PathBuf {
        self.dir.join(context.file_name("json"))
    }
}

#[async_trait]
impl PidStore for FsPidStore {
    async fn get(&self, context: &Context) -> KubehopResult<Option<TunnelRecord>> {
        let path = self.record_path(context);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KubehopError::io(
                    format!("reading tunnel record {}", path.display()),
                    e,
                ))
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // A corrupt record cannot name a process; treat it as absent
                warn!("Ignoring unreadable tunnel record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn put(&self, record: &TunnelRecord) -> KubehopResult<()> {
        let path = self.record_path(&record.context);
        let content = serde_json::to_vec_pretty(record)?;
        write_atomic_async(path.clone(), content, 0o644)
            .await
            .map_err(|e| {
                KubehopError::io(format!("writing tunnel record {}", path.display()), e)
            })?;
        debug!("Saved tunnel record for {} (pid {})", record.context, record.pid);
        Ok(())
    }

    async fn delete(&self, context: &Context) -> KubehopResult<()> {
        let path = self.record_path(context);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Another invocation may have removed it first
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KubehopError::io(
                format!("deleting tunnel record {}", path.display()),
                e,
            )),
        }
    }

    async fn list(&self) -> KubehopResult<Vec<TunnelRecord>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut records = vec![];
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| KubehopError::io("reading tunnels directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KubehopError::io("reading tunnel entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let content = fs::read_to_string(&path).await.ok();
                if let Some(content) = content {
                    match serde_json::from_str::<TunnelRecord>(&content) {
                        Ok(record) => records.push(record),
                        Err(e) => warn!("Skipping {}: {}", path.display(), e),
                    }
                }
            }
        }

        records.sort_by(|a, b| a.context.cmp(&b.context));
        Ok(records)
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryPidStore {
    records: Mutex<BTreeMap<Context, TunnelRecord>>,
}

impl MemoryPidStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KubehopResult<std::sync::MutexGuard<'_, BTreeMap<Context, TunnelRecord>>> {
        self.records
            .lock()
            .map_err(|_| KubehopError::Internal("tunnel store lock poisoned".to_string()))
    }
}

#[async_trait]
impl PidStore for MemoryPidStore {
    async fn get(&self, context: &Context) -> KubehopResult<Option<TunnelRecord>> {
        Ok(self.lock()?.get(context).cloned())
    }

    async fn put(&self, record: &TunnelRecord) -> KubehopResult<()> {
        self.lock()?.insert(record.context.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, context: &Context) -> KubehopResult<()> {
        self.lock()?.remove(context);
        Ok(())
    }

    async fn list(&self) -> KubehopResult<Vec<TunnelRecord>> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, pid: u32, port: u16) -> TunnelRecord {
        TunnelRecord::new(
            Context::parse(name).unwrap(),
            pid,
            port,
            "10.0.0.5",
            6443,
            "prod1",
        )
    }

    #[test]
    fn record_serialize() {
        let rec = record("acme-prod1", 4242, 20001);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"context\":\"acme-prod1\""));
        assert!(json.contains("\"local_port\":20001"));

        let parsed: TunnelRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rec);
    }

    #[tokio::test]
    async fn fs_store_put_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = FsPidStore::new(temp.path().join("tunnels"));

        store.put(&record("acme-prod1", 1, 20001)).await.unwrap();
        store.put(&record("acme-prod1", 2, 20001)).await.unwrap();

        let ctx = Context::parse("acme-prod1").unwrap();
        assert_eq!(store.get(&ctx).await.unwrap().unwrap().pid, 2);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fs_store_delete_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let store = FsPidStore::new(temp.path().to_path_buf());
        let ctx = Context::parse("acme-prod1").unwrap();

        store.delete(&ctx).await.unwrap();
        store.put(&record("acme-prod1", 1, 20001)).await.unwrap();
        store.delete(&ctx).await.unwrap();
        assert!(store.get(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_store_skips_corrupt_records() {
        let temp = TempDir::new().unwrap();
        let store = FsPidStore::new(temp.path().to_path_buf());
        store.put(&record("b-node", 2, 20002)).await.unwrap();
        store.put(&record("a-node", 1, 20001)).await.unwrap();
        std::fs::write(temp.path().join("broken.json"), "{not json").unwrap();

        let contexts: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.context.to_string())
            .collect();
        assert_eq!(contexts, vec!["a-node", "b-node"]);

        let broken = Context::parse("broken").unwrap();
        assert!(store.get(&broken).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_store_missing_dir_lists_empty() {
        let temp = TempDir::new().unwrap();
        let store = FsPidStore::new(temp.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
