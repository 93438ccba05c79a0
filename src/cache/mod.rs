//! Local kubeconfig cache
//!
//! Entries are keyed by context and validated against the SHA-256 of the
//! remote file before reuse.
//!
//! | Remote hash | Cached copy | Action |
//! |-------------|-------------|--------|
//! | matches | present | reuse, no transfer |
//! | differs | present/absent | transfer, replace entry |
//! | unavailable | any | transfer, entry untouched |

pub mod fetcher;
pub mod store;

pub use fetcher::{fetch_with_cache, FetchOutcome};
pub use store::{sha256_hex, CacheEntry, CacheStore, FsCacheStore, MemoryCacheStore};
