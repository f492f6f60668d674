//! Host system helpers: free-space queries and the post-update reboot.

use std::io;
use std::path::Path;
use tracing::info;

/// Free space in bytes on the filesystem holding `path`.
///
/// `path` itself does not need to exist; the check runs against its parent
/// directory, matching the download location which is created later.
pub fn available_space(path: &Path) -> io::Result<u64> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let stat = nix::sys::statvfs::statvfs(dir).map_err(io::Error::from)?;
    Ok(stat.block_size() as u64 * stat.blocks_available() as u64)
}

/// Flush filesystem buffers and reboot immediately.
///
/// This is a non-graceful reboot on purpose: after a successful installation
/// the running system is stale and service shutdown order does not matter.
/// Requires CAP_SYS_BOOT; only returns on failure.
pub fn reboot() -> io::Result<()> {
    info!("Rebooting system after successful update");
    nix::unistd::sync();
    nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_AUTOBOOT)
        .map(|_| ())
        .map_err(io::Error::from)
}
