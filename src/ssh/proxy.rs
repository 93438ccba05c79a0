//! ProxyCommand transport
//!
//! libssh2 needs a socket, so the proxy's stdio is bridged onto one end of a
//! Unix socket pair and the session is handed the other end.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::process::{Child, Command, Stdio};
use std::thread;
use tracing::debug;

use super::resolver::ConnectParams;

/// Running proxy command; killed when dropped
#[derive(Debug)]
pub struct ProxyGuard {
    child: Child,
}

impl ProxyGuard {
    /// Start the proxy and return the socket end to give to the session
    pub fn spawn(template: &str, params: &ConnectParams) -> io::Result<(UnixStream, Self)> {
        let command = expand_tokens(template, params);
        debug!("Starting proxy: {}", command);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let (ours, theirs) = UnixStream::pair()?;
        let mut child_in = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("proxy stdin unavailable"))?;
        let mut child_out = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("proxy stdout unavailable"))?;

        let mut upstream = theirs.try_clone()?;
        thread::spawn(move || {
            let _ = pump(&mut upstream, &mut child_in);
        });
        let mut downstream = theirs;
        thread::spawn(move || {
            let _ = pump(&mut child_out, &mut downstream);
            let _ = downstream.shutdown(std::net::Shutdown::Write);
        });

        Ok((ours, Self { child }))
    }
}

impl Drop for ProxyGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pump(from: &mut impl Read, to: &mut impl Write) -> io::Result<()> {
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = from.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        to.write_all(&buf[..n])?;
        to.flush()?;
    }
}

/// Substitute `%h`, `%p`, `%r`, `%n` and `%%`
pub fn expand_tokens(template: &str, params: &ConnectParams) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(&params.hostname),
            Some('p') => out.push_str(&params.port.to_string()),
            Some('r') => out.push_str(&params.user),
            Some('n') => out.push_str(&params.alias),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}
