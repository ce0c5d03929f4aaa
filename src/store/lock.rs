//! Per-item advisory upload lock under `.locks/<id>/`
//!
//! Held for the whole upload of one item so two processes never publish
//! the same item at once.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "_uploading.lock";

/// Exclusive claim on one item's upload
///
/// On Unix this is an advisory `flock`, released by the OS when the holder
/// exits for any reason. Other platforms fall back to an exclusively created
/// lock file that is removed on drop.
#[derive(Debug)]
pub struct UploadLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl UploadLock {
    /// Try to take the lock in `lock_dir` without blocking
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(lock_dir: &Path) -> Result<Option<Self>> {
        std::fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(LOCK_FILE);

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let mut file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)?;

            // SAFETY: the descriptor belongs to `file`, which outlives the call
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Ok(None);
                }
                return Err(err.into());
            }

            file.set_len(0)?;
            writeln!(file, "{}", std::process::id())?;
            Ok(Some(Self { file, path }))
        }

        #[cfg(not(unix))]
        {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    Ok(Some(Self { file, path }))
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        // the flock is released when `file` closes; the file itself stays so a
        // waiter never ends up locking an unlinked inode
        #[cfg(not(unix))]
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove upload lock");
        }
        tracing::debug!(path = %self.path.display(), "Released upload lock");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_dir = dir.path().join(".locks").join("AB12CD34");

        let first = UploadLock::try_acquire(&lock_dir).unwrap();
        assert!(first.is_some());
        assert!(UploadLock::try_acquire(&lock_dir).unwrap().is_none());

        drop(first);
        assert!(UploadLock::try_acquire(&lock_dir).unwrap().is_some());
    }

    #[test]
    fn lock_file_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = UploadLock::try_acquire(dir.path()).unwrap().unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn locks_are_per_item() {
        let dir = tempfile::tempdir().unwrap();
        let a = UploadLock::try_acquire(&dir.path().join("A")).unwrap();
        let b = UploadLock::try_acquire(&dir.path().join("B")).unwrap();
        assert!(a.is_some() && b.is_some());
    }
}
