//! Crash-safe file replacement
//!
//! Content is written to a temporary sibling, flushed, then renamed over the
//! target so readers see either the old file or the new one.

use std::io::{self, Write};
use std::path::Path;

/// Owner-only permissions for files carrying cluster credentials
pub const PRIVATE_MODE: u32 = 0o600;

/// Atomically replace `path` with `content`, creating parent directories
pub fn write_atomic(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".kubehop-")
        .suffix(".tmp")
        .tempfile_in(parent)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Async wrapper running [`write_atomic`] on the blocking pool
pub async fn write_atomic_async(
    path: std::path::PathBuf,
    content: Vec<u8>,
    mode: u32,
) -> io::Result<()> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &content, mode))
        .await
        .map_err(io::Error::other)?
}
