//! Kubeconfig rewriting and merging

pub mod document;
pub mod merge;

pub use document::{rewrite_server, Endpoint, Kubeconfig, NamedEntry};
pub use merge::{merge_into, write_backup, KubeconfigStore};
