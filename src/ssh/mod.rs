//! SSH access to cluster nodes
//!
//! Resolves inventory aliases through the user's ssh_config, opens libssh2
//! sessions with retry, and runs the small remote probes the fetch needs.

pub mod probe;
pub mod proxy;
pub mod resolver;
pub mod retry;
pub mod session;

pub use resolver::{ConnectParams, SshConfig};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use session::{connect_with_retry, Connector, RemoteSession, Ssh2Connector};
