//! SSH sessions backed by libssh2
//!
//! Blocking libssh2 calls run on the tokio blocking pool. Failures are
//! classified as transient (network level, worth a retry) or fatal
//! (authentication, host key mismatch, missing file).

use async_trait::async_trait;
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::proxy::ProxyGuard;
use super::resolver::ConnectParams;
use super::retry::{is_transient_io, retry_with_backoff, RetryPolicy};
use crate::error::{KubehopError, KubehopResult};

/// An open connection to a remote host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a shell command, returning trimmed stdout when it exits 0
    async fn try_run(&self, command: &str) -> Option<String>;

    /// Read a whole remote file over SFTP
    async fn read_file(&self, path: &str) -> KubehopResult<Vec<u8>>;
}

/// Opens sessions; one attempt per call
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_once(&self, params: &ConnectParams) -> KubehopResult<Box<dyn RemoteSession>>;
}

/// Connect with bounded retry on transient failures
pub async fn connect_with_retry(
    connector: &dyn Connector,
    params: &ConnectParams,
    policy: &RetryPolicy,
) -> KubehopResult<Box<dyn RemoteSession>> {
    let label = format!("SSH connect to {}", params.alias);
    retry_with_backoff(policy, &label, |attempt| async move {
        debug!("Connecting to {} (attempt {})", params.alias, attempt);
        connector.connect_once(params).await
    })
    .await
}

/// libssh2 session codes that indicate a network-level problem
const TRANSIENT_SESSION_CODES: &[i32] = &[
    -1,  // SOCKET_NONE
    -2,  // BANNER_RECV
    -3,  // BANNER_SEND
    -7,  // SOCKET_SEND
    -9,  // TIMEOUT
    -13, // SOCKET_DISCONNECT
    -30, // SOCKET_TIMEOUT
    -37, // EAGAIN
    -43, // SOCKET_RECV
];

/// Whether a libssh2 error is worth retrying
pub fn is_transient_ssh(err: &ssh2::Error) -> bool {
    match err.code() {
        ErrorCode::Session(code) => TRANSIENT_SESSION_CODES.contains(&code),
        // NO_SUCH_FILE, PERMISSION_DENIED and friends never fix themselves
        ErrorCode::SFTP(_) => false,
    }
}

/// Connector that speaks SSH through libssh2
#[derive(Debug, Clone)]
pub struct Ssh2Connector {
    timeout: Duration,
    known_hosts: Option<PathBuf>,
}

impl Ssh2Connector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            known_hosts: dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")),
        }
    }

    pub fn with_known_hosts(mut self, path: Option<PathBuf>) -> Self {
        self.known_hosts = path;
        self
    }
}

#[async_trait]
impl Connector for Ssh2Connector {
    async fn connect_once(&self, params: &ConnectParams) -> KubehopResult<Box<dyn RemoteSession>> {
        let params = params.clone();
        let timeout = self.timeout;
        let known_hosts = self.known_hosts.clone();

        let session = tokio::task::spawn_blocking(move || {
            connect_blocking(&params, timeout, known_hosts.as_deref())
        })
        .await
        .map_err(|e| KubehopError::Internal(format!("connect task failed: {}", e)))??;

        Ok(Box::new(session))
    }
}

/// Authenticated libssh2 session
pub struct SshSession {
    inner: Arc<Mutex<Session>>,
    host: String,
    // Declared last so the proxy outlives the session on drop
    _proxy: Option<ProxyGuard>,
}

impl SshSession {
    async fn with_session<T, F>(&self, f: F) -> KubehopResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> KubehopResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let session = inner
                .lock()
                .map_err(|_| KubehopError::Internal("SSH session lock poisoned".to_string()))?;
            f(&session)
        })
        .await
        .map_err(|e| KubehopError::Internal(format!("SSH task failed: {}", e)))?
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn try_run(&self, command: &str) -> Option<String> {
        let cmd = command.to_string();
        let result = self
            .with_session(move |session| {
                exec_blocking(session, &cmd).map_err(|e| KubehopError::io("running remote command", e))
            })
            .await;

        match result {
            Ok((0, stdout)) => Some(stdout.trim().to_string()),
            Ok((status, _)) => {
                debug!("`{}` on {} exited with {}", command, self.host, status);
                None
            }
            Err(e) => {
                debug!("`{}` on {} failed: {}", command, self.host, e);
                None
            }
        }
    }

    async fn read_file(&self, path: &str) -> KubehopResult<Vec<u8>> {
        let remote = path.to_string();
        self.with_session(move |session| {
            let transfer_err = |reason: String, retryable: bool| KubehopError::TransferFailure {
                path: remote.clone(),
                reason,
                retryable,
            };

            let sftp = session
                .sftp()
                .map_err(|e| transfer_err(e.to_string(), is_transient_ssh(&e)))?;
            let mut file = sftp
                .open(Path::new(&remote))
                .map_err(|e| transfer_err(e.to_string(), is_transient_ssh(&e)))?;

            let mut content = Vec::new();
            file.read_to_end(&mut content)
                .map_err(|e| transfer_err(e.to_string(), is_transient_io(&e)))?;
            Ok(content)
        })
        .await
    }
}

fn connection_error(params: &ConnectParams, reason: impl Into<String>, retryable: bool) -> KubehopError {
    KubehopError::ConnectionFailure {
        host: params.hostname.clone(),
        port: params.port,
        reason: reason.into(),
        retryable,
    }
}

fn map_ssh_error(params: &ConnectParams, stage: &str, err: ssh2::Error) -> KubehopError {
    let retryable = is_transient_ssh(&err);
    connection_error(params, format!("{}: {}", stage, err), retryable)
}

fn open_tcp(params: &ConnectParams, timeout: Duration) -> KubehopResult<TcpStream> {
    let addrs = (params.hostname.as_str(), params.port)
        .to_socket_addrs()
        .map_err(|e| connection_error(params, format!("resolving host: {}", e), true))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout)).ok();
                stream.set_write_timeout(Some(timeout)).ok();
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    // Every TCP-level failure counts as transient
    Err(match last_err {
        Some(e) => connection_error(params, format!("TCP connect: {}", e), true),
        None => connection_error(params, "host resolved to no addresses", true),
    })
}

fn connect_blocking(
    params: &ConnectParams,
    timeout: Duration,
    known_hosts: Option<&Path>,
) -> KubehopResult<SshSession> {
    let mut session =
        Session::new().map_err(|e| connection_error(params, e.to_string(), false))?;
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);

    let proxy = match params.proxy_command.as_deref() {
        Some(template) => {
            let (stream, guard) = ProxyGuard::spawn(template, params).map_err(|e| {
                connection_error(params, format!("proxy command: {}", e), is_transient_io(&e))
            })?;
            session.set_tcp_stream(stream);
            Some(guard)
        }
        None => {
            session.set_tcp_stream(open_tcp(params, timeout)?);
            None
        }
    };

    session
        .handshake()
        .map_err(|e| map_ssh_error(params, "handshake", e))?;

    verify_host_key(&session, params, known_hosts)?;
    authenticate(&session, params)?;
    session.set_keepalive(true, 30);

    info!("Connected to {} ({}@{}:{})", params.alias, params.user, params.hostname, params.port);
    Ok(SshSession {
        inner: Arc::new(Mutex::new(session)),
        host: params.alias.clone(),
        _proxy: proxy,
    })
}

/// Reject a changed host key; accept an unknown one with a warning
fn verify_host_key(
    session: &Session,
    params: &ConnectParams,
    known_hosts: Option<&Path>,
) -> KubehopResult<()> {
    let Some((key, _)) = session.host_key() else {
        return Err(connection_error(params, "server presented no host key", false));
    };

    let mut hosts = session
        .known_hosts()
        .map_err(|e| map_ssh_error(params, "known_hosts", e))?;
    if let Some(path) = known_hosts.filter(|p| p.exists()) {
        if let Err(e) = hosts.read_file(path, KnownHostFileKind::OpenSSH) {
            warn!("Could not read {}: {}", path.display(), e);
        }
    }

    match hosts.check_port(&params.hostname, params.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(connection_error(
            params,
            format!(
                "host key for {} does not match known_hosts; refusing to connect",
                params.hostname
            ),
            false,
        )),
        CheckResult::NotFound | CheckResult::Failure => {
            warn!(
                "Host key for {} is not in known_hosts; accepting it for this session",
                params.hostname
            );
            Ok(())
        }
    }
}

/// Try each identity file, then the agent
fn authenticate(session: &Session, params: &ConnectParams) -> KubehopResult<()> {
    for key in &params.identity_files {
        if !key.exists() {
            debug!("Skipping missing identity {}", key.display());
            continue;
        }
        match session.userauth_pubkey_file(&params.user, None, key, None) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => {}
            Err(e) if is_transient_ssh(&e) => {
                return Err(map_ssh_error(params, "authentication", e));
            }
            Err(e) => debug!("Key {} rejected: {}", key.display(), e),
        }
    }

    match session.userauth_agent(&params.user) {
        Ok(()) if session.authenticated() => Ok(()),
        Err(e) if is_transient_ssh(&e) => Err(map_ssh_error(params, "authentication", e)),
        Ok(()) | Err(_) => Err(connection_error(
            params,
            format!("authentication rejected for user {}", params.user),
            false,
        )),
    }
}

fn exec_blocking(session: &Session, command: &str) -> std::io::Result<(i32, String)> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    channel.wait_close()?;
    let status = channel.exit_status()?;
    Ok((status, stdout))
}
