//! Single-instance lock
//!
//! An exclusive `flock` on the lock file, which also records the holder's
//! PID for `stop`, `reload` and `status`.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance is already running{}", pid.map(|p| format!(" (pid {})", p)).unwrap_or_default())]
    AlreadyRunning { pid: Option<i32> },

    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the lifetime of the daemon; released when dropped.
#[derive(Debug)]
pub struct InstanceLock {
    file: Flock<File>,
    path: PathBuf,
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(io_err)
}

impl InstanceLock {
    /// Take the lock and write our PID into it.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = open_lock_file(path)?;
        let file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(LockError::AlreadyRunning {
                    pid: read_pid(path),
                })
            }
            Err((_, errno)) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source: io::Error::from(errno),
                })
            }
        };

        let write_pid = || -> io::Result<()> {
            file.set_len(0)?;
            let mut handle: &File = &file;
            writeln!(handle, "{}", std::process::id())?;
            handle.flush()
        };
        write_pid().map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // a stale PID must not outlive the lock
        let _ = self.file.set_len(0);
    }
}

/// PID recorded in the lock file, if any.
pub fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// PID of the running daemon, or `None` when nobody holds the lock.
pub fn running_pid(path: &Path) -> Option<i32> {
    let file = File::open(path).ok()?;
    match Flock::lock(file, FlockArg::LockSharedNonblock) {
        // we got it, so nobody else holds it; dropping releases it again
        Ok(_) => None,
        Err(_) => read_pid(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.lock");

        let first = InstanceLock::acquire(&path).unwrap();
        assert_eq!(first.path(), path.as_path());

        match InstanceLock::acquire(&path) {
            Err(LockError::AlreadyRunning { pid }) => {
                assert_eq!(pid, Some(std::process::id() as i32));
            }
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.lock");

        drop(InstanceLock::acquire(&path).unwrap());
        assert_eq!(read_pid(&path), None);
        let again = InstanceLock::acquire(&path);
        assert!(again.is_ok());
    }

    #[test]
    fn test_running_pid_reflects_holder() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("daemon.lock");

        assert_eq!(running_pid(&path), None);
        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(running_pid(&path), Some(std::process::id() as i32));
        drop(lock);
        assert_eq!(running_pid(&path), None);
    }

    #[test]
    fn test_stale_pid_without_lock_is_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.lock");
        fs::write(&path, "4242\n").unwrap();

        assert_eq!(read_pid(&path), Some(4242));
        assert_eq!(running_pid(&path), None);
    }

    #[test]
    fn test_error_message_names_pid() {
        let err = LockError::AlreadyRunning { pid: Some(77) };
        assert_eq!(err.to_string(), "another instance is already running (pid 77)");
        let err = LockError::AlreadyRunning { pid: None };
        assert_eq!(err.to_string(), "another instance is already running");
    }
}
