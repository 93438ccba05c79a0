//! Remote probes: content hash and internal address
//!
//! Each probe is a list of shell commands tried in order; the first one
//! whose output validates wins.

use std::net::Ipv4Addr;
use tracing::debug;

use super::session::RemoteSession;
use crate::error::{KubehopError, KubehopResult};

/// Hash commands, `{}` is replaced by the quoted path
pub const HASH_PROBES: &[&str] = &[
    "sha256sum {}",
    "shasum -a 256 {}",
    "openssl dgst -sha256 -r {}",
];

/// Commands that print the host's primary IPv4 address
pub const IP_PROBES: &[&str] = &[
    "ip -4 addr show scope global | awk '/inet /{print $2}' | cut -d/ -f1 | head -n1",
    "hostname -I | awk '{print $1}'",
    "ip route get 1.1.1.1 | awk '{for(i=1;i<=NF;i++) if($i==\"src\") print $(i+1)}' | head -n1",
];

/// Quote a value for POSIX sh
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:=@%,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// First token of probe output, if it is a 64-character hex digest
fn parse_digest(output: &str) -> Option<String> {
    let token = output.split_whitespace().next()?;
    if token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(token.to_ascii_lowercase())
    } else {
        None
    }
}

/// A usable internal address: IPv4, not loopback, not 0.0.0.0
fn parse_internal_ipv4(output: &str) -> Option<Ipv4Addr> {
    let ip: Ipv4Addr = output.split_whitespace().next()?.parse().ok()?;
    if ip.is_loopback() || ip.is_unspecified() {
        return None;
    }
    Some(ip)
}

/// SHA-256 of a remote file as lowercase hex
pub async fn remote_sha256(session: &dyn RemoteSession, path: &str) -> KubehopResult<String> {
    let quoted = shell_quote(path);
    for probe in HASH_PROBES {
        let command = probe.replace("{}", &quoted);
        if let Some(digest) = session.try_run(&command).await.as_deref().and_then(parse_digest) {
            debug!("Remote hash via `{}`: {}", command, digest);
            return Ok(digest);
        }
    }
    Err(KubehopError::HashUnavailable {
        path: path.to_string(),
    })
}

/// The remote host's internal IPv4 address
pub async fn internal_ipv4(session: &dyn RemoteSession) -> KubehopResult<Ipv4Addr> {
    for probe in IP_PROBES {
        if let Some(ip) = session
            .try_run(probe)
            .await
            .as_deref()
            .and_then(parse_internal_ipv4)
        {
            debug!("Internal address via `{}`: {}", probe, ip);
            return Ok(ip);
        }
    }
    Err(KubehopError::InternalAddressUnavailable)
}
