//! Hash-validated kubeconfig fetch
//!
//! The remote file is hashed in place first; when the cached copy has the
//! same SHA-256 no transfer happens at all.

use tracing::{debug, info, warn};

use super::store::{sha256_hex, CacheStore};
use crate::context::Context;
use crate::error::KubehopResult;
use crate::ssh::probe::remote_sha256;
use crate::ssh::{retry_with_backoff, RemoteSession, RetryPolicy};

/// Result of a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub content: Vec<u8>,
    /// True when the cached copy was reused without a transfer
    pub cache_hit: bool,
}

/// Fetch `remote_path` for `context`, reusing the cache when it is current
pub async fn fetch_with_cache(
    session: &dyn RemoteSession,
    remote_path: &str,
    context: &Context,
    cache: &dyn CacheStore,
    transfer_policy: &RetryPolicy,
) -> KubehopResult<FetchOutcome> {
    let remote_hash = match remote_sha256(session, remote_path).await {
        Ok(hash) => hash,
        Err(e) => {
            // Without a hash the cache can be neither trusted nor refreshed
            warn!("{}; fetching without cache", e);
            let content = transfer(session, remote_path, transfer_policy).await?;
            return Ok(FetchOutcome {
                content,
                cache_hit: false,
            });
        }
    };

    let cached = match cache.get(context).await {
        Ok(cached) => cached,
        Err(e) => {
            warn!("Ignoring unreadable cache entry for {}: {}", context, e);
            None
        }
    };

    if let Some(cached) = cached {
        if sha256_hex(&cached) == remote_hash {
            info!("Kubeconfig for {} unchanged, using cache", context);
            return Ok(FetchOutcome {
                content: cached,
                cache_hit: true,
            });
        }
        debug!("Cached kubeconfig for {} is stale", context);
    }

    let content = transfer(session, remote_path, transfer_policy).await?;
    if sha256_hex(&content) != remote_hash {
        debug!("{} changed during transfer", remote_path);
    }
    cache.put(context, &content).await?;

    Ok(FetchOutcome {
        content,
        cache_hit: false,
    })
}

async fn transfer(
    session: &dyn RemoteSession,
    remote_path: &str,
    policy: &RetryPolicy,
) -> KubehopResult<Vec<u8>> {
    let label = format!("Transfer of {}", remote_path);
    retry_with_backoff(policy, &label, |_| session.read_file(remote_path)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryCacheStore;
    use crate::error::KubehopError;
    use crate::ssh::testing::ScriptedSession;

    const PATH: &str = "/etc/rancher/k3s/k3s.yaml";

    fn ctx() -> Context {
        Context::parse("acme-prod1").unwrap()
    }

    fn hashing(content: &[u8]) -> ScriptedSession {
        ScriptedSession::new().respond(
            &format!("sha256sum {}", PATH),
            &format!("{}  {}", sha256_hex(content), PATH),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn matching_hash_skips_transfer() {
        let content = b"apiVersion: v1\nkind: Config\n".to_vec();
        let session = hashing(&content);
        let cache = MemoryCacheStore::new();
        cache.put(&ctx(), &content).await.unwrap();

        let outcome = fetch_with_cache(&session, PATH, &ctx(), &cache, &RetryPolicy::transfer(2))
            .await
            .unwrap();

        assert!(outcome.cache_hit);
        assert_eq!(outcome.content, content);
        assert_eq!(session.transfers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_fetch_of_unchanged_file_hits_cache() {
        let content = b"apiVersion: v1\nkind: Config\n".to_vec();
        let session = hashing(&content).read_result(Ok(content.clone()));
        let cache = MemoryCacheStore::new();
        let policy = RetryPolicy::transfer(2);

        let first = fetch_with_cache(&session, PATH, &ctx(), &cache, &policy).await.unwrap();
        let second = fetch_with_cache(&session, PATH, &ctx(), &cache, &policy).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(second.content, content);
        assert_eq!(session.transfers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cache_is_refreshed() {
        let fresh = b"apiVersion: v1\nkind: Config\n# v2\n".to_vec();
        let session = hashing(&fresh).read_result(Ok(fresh.clone()));
        let cache = MemoryCacheStore::new();
        cache.put(&ctx(), b"old").await.unwrap();

        let outcome = fetch_with_cache(&session, PATH, &ctx(), &cache, &RetryPolicy::transfer(2))
            .await
            .unwrap();

        assert!(!outcome.cache_hit);
        assert_eq!(outcome.content, fresh);
        assert_eq!(session.transfers(), 1);
        assert_eq!(cache.get(&ctx()).await.unwrap().unwrap(), fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn hash_failure_transfers_without_caching() {
        let content = b"apiVersion: v1\n".to_vec();
        let session = ScriptedSession::new().read_result(Ok(content.clone()));
        let cache = MemoryCacheStore::new();

        let outcome = fetch_with_cache(&session, PATH, &ctx(), &cache, &RetryPolicy::transfer(2))
            .await
            .unwrap();

        assert!(!outcome.cache_hit);
        assert_eq!(outcome.content, content);
        assert!(cache.get(&ctx()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_transfer_failure_is_retried() {
        let content = b"apiVersion: v1\n".to_vec();
        let session = hashing(&content)
            .read_result(Err(KubehopError::TransferFailure {
                path: PATH.to_string(),
                reason: "channel closed".to_string(),
                retryable: true,
            }))
            .read_result(Ok(content.clone()));
        let cache = MemoryCacheStore::new();

        let outcome = fetch_with_cache(&session, PATH, &ctx(), &cache, &RetryPolicy::transfer(2))
            .await
            .unwrap();

        assert_eq!(outcome.content, content);
        assert_eq!(session.transfers(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_fatal() {
        let session = hashing(b"x")
            .read_result(Err(KubehopError::TransferFailure {
                path: PATH.to_string(),
                reason: "permission denied".to_string(),
                retryable: false,
            }))
            .read_result(Ok(b"x".to_vec()));
        let cache = MemoryCacheStore::new();

        let err = fetch_with_cache(&session, PATH, &ctx(), &cache, &RetryPolicy::transfer(2))
            .await
            .unwrap_err();

        assert!(matches!(err, KubehopError::TransferFailure { .. }));
        assert_eq!(session.transfers(), 1);
    }
}
