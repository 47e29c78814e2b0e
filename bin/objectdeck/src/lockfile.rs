//! Process-wide data directory lock
//!
//! A lockfile under `<dataDir>/locks/` keeps two instances from sharing one
//! data directory. The file holds the owner's pid; a lock whose pid is no
//! longer alive is treated as stale and replaced.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

pub struct Lockfile {
    path: PathBuf,
}

impl Lockfile {
    pub fn acquire(path: PathBuf) -> Result<Self> {
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                let holder_pid: Option<u32> = holder.trim().parse().ok();
                if holder_pid.map_or(true, pid_alive) {
                    bail!(
                        "data directory is locked by pid {} ({})",
                        holder.trim(),
                        path.display()
                    );
                }
                tracing::warn!("removing stale lockfile from pid {}", holder.trim());
                fs::remove_file(&path).context("remove stale lockfile")?;
                fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .context("create lockfile")?;
            }
            Err(e) => return Err(e).context("create lockfile"),
        }
        fs::write(&path, std::process::id().to_string()).context("write lockfile")?;
        Ok(Self { path })
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}
