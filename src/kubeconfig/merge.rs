//! Merging fetched clusters into the shared kubeconfig
//!
//! The fetched document's first cluster, user and context are renamed to
//! the kubehop context and upserted by name. Entries with other names are
//! never touched.

use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::document::{Kubeconfig, NamedEntry};
use crate::context::Context;
use crate::error::{KubehopError, KubehopResult};
use crate::fsutil::{write_atomic_async, PRIVATE_MODE};

/// Replace the first entry with the same name in place, or append it
///
/// Later entries sharing the name are dropped.
fn upsert(entries: &mut Vec<NamedEntry>, entry: NamedEntry) {
    let Some(index) = entries.iter().position(|e| e.name == entry.name) else {
        entries.push(entry);
        return;
    };

    let name = entry.name.clone();
    entries[index] = entry;
    let mut position = 0;
    entries.retain(|e| {
        let keep = position <= index || e.name != name;
        position += 1;
        keep
    });
}

fn first_entry(entries: &[NamedEntry], kind: &str) -> KubehopResult<NamedEntry> {
    entries
        .first()
        .cloned()
        .ok_or_else(|| KubehopError::MalformedDocument(format!("document has no {}", kind)))
}

/// Merge the triplet from `incoming` into `store` under `name`
pub fn merge_into(store: &mut Kubeconfig, incoming: &Kubeconfig, name: &str) -> KubehopResult<()> {
    let mut cluster = first_entry(&incoming.clusters, "clusters")?;
    let mut user = first_entry(&incoming.users, "users")?;
    let mut context = first_entry(&incoming.contexts, "contexts")?;

    cluster.name = name.to_string();
    user.name = name.to_string();
    context.name = name.to_string();

    // Point the context at the renamed cluster and user
    let mut body = match context.rest.remove("context") {
        Some(Value::Mapping(m)) => m,
        _ => serde_yaml::Mapping::new(),
    };
    body.insert("cluster".into(), Value::String(name.to_string()));
    body.insert("user".into(), Value::String(name.to_string()));
    context.rest.insert("context".into(), Value::Mapping(body));

    upsert(&mut store.clusters, cluster);
    upsert(&mut store.users, user);
    upsert(&mut store.contexts, context);
    store.current_context = Some(name.to_string());
    Ok(())
}

/// The kubeconfig file that collects every fetched cluster
#[derive(Debug, Clone)]
pub struct KubeconfigStore {
    path: PathBuf,
}

impl KubeconfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn merge_failure(&self, reason: impl Into<String>) -> KubehopError {
        KubehopError::MergeFailure {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    /// Current contents; a missing file is an empty kubeconfig
    pub async fn load(&self) -> KubehopResult<Kubeconfig> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist yet", self.path.display());
                return Ok(Kubeconfig::default());
            }
            Err(e) => return Err(self.merge_failure(e.to_string())),
        };
        Kubeconfig::parse(&content).map_err(|e| self.merge_failure(e.to_string()))
    }

    /// Read, merge and atomically replace the store
    pub async fn merge(&self, rewritten: &[u8], context: &Context) -> KubehopResult<()> {
        let incoming = Kubeconfig::parse(rewritten)?;
        let mut store = self.load().await?;

        merge_into(&mut store, &incoming, context.as_str())?;

        let yaml = store
            .to_yaml()
            .map_err(|e| self.merge_failure(e.to_string()))?;
        write_atomic_async(self.path.clone(), yaml.into_bytes(), PRIVATE_MODE)
            .await
            .map_err(|e| self.merge_failure(e.to_string()))?;

        info!("Merged {} into {}", context, self.path.display());
        Ok(())
    }
}

/// Write the standalone `<org>_<host>.yml` copy
pub async fn write_backup(
    dir: &Path,
    organization: &str,
    host: &str,
    content: &[u8],
) -> KubehopResult<PathBuf> {
    let path = dir.join(format!("{}_{}.yml", organization, host));
    write_atomic_async(path.clone(), content.to_vec(), PRIVATE_MODE)
        .await
        .map_err(|e| KubehopError::io(format!("writing backup {}", path.display()), e))?;
    debug!("Wrote backup {}", path.display());
    Ok(path)
}
