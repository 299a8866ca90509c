// ABOUTME: Exclusive advisory lock guarding a registry's load-mutate-save cycle
// ABOUTME: flock(2) on a lock file next to the registry; the file records the holder PID

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, Result};

/// Held for as long as a [`RegistryStore`](super::RegistryStore) is alive.
///
/// The lock lives on the open file, not on the file's existence: the kernel drops it when
/// the holder exits, so a crashed run never leaves a lock behind and the file itself is
/// never removed.
#[derive(Debug)]
pub struct RegistryLock {
    path: PathBuf,
    file: File,
}

impl RegistryLock {
    /// Lock file path for a registry: the registry path with `.lock` appended.
    pub fn path_for(registry_path: &Path) -> PathBuf {
        let mut name = registry_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock for `registry_path` without blocking.
    ///
    /// Fails with [`RegistryError::Locked`] while another process holds it.
    pub fn acquire(registry_path: &Path) -> Result<Self> {
        let path = Self::path_for(registry_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RegistryError::persist(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| RegistryError::persist(&path, e))?;

        if !try_lock_exclusive(&file).map_err(|e| RegistryError::persist(&path, e))? {
            return Err(RegistryError::Locked {
                path: registry_path.to_path_buf(),
                pid: read_holder(&path),
            });
        }

        // Record ourselves as the holder for contenders to report.
        record_holder(&mut file).map_err(|e| RegistryError::persist(&path, e))?;

        tracing::debug!("Acquired registry lock {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        // Clear the holder; closing the file releases the lock.
        if let Err(e) = self.file.set_len(0) {
            tracing::warn!(
                "Failed to clear registry lock {}: {}",
                self.path.display(),
                e
            );
        }
        tracing::debug!("Released registry lock {}", self.path.display());
    }
}

fn record_holder(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()
}

fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Returns false when another open file description holds the lock.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

// No advisory locking off Unix: the file only records the last holder.
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}
