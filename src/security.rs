#![forbid(unsafe_code)]

//! Process-level guard rails for the VidGate binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start when running as root. The backend spawns yt-dlp and
/// deletes files on a timer; doing either with uid 0 turns a configuration
/// mistake into a system-wide one.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; use a regular user or a dedicated service account");
    }
    Ok(())
}
