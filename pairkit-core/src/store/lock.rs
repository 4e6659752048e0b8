//! Exclusive ownership of a storage root.
//!
//! The factory reset assumes a single logical owner per boot. A
//! [`FileStore`](super::FileStore) enforces that by holding a non-blocking
//! `flock` on a lock file inside its root for as long as it is open. On
//! targets without `flock` the lock is a no-op.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use crate::{StorageError, StorageResult};

/// An exclusive advisory lock released on drop.
#[derive(Debug)]
pub struct OwnerLock {
    file: File,
}

impl OwnerLock {
    /// Takes the lock at `path` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Lock`] if the file cannot be opened or another
    /// owner already holds the lock.
    pub fn acquire(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| lock_err(path, &err))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| lock_err(path, &err))?;

        if !imp::try_lock_exclusive(&file).map_err(|err| lock_err(path, &err))? {
            return Err(StorageError::Lock(format!(
                "{} is owned by another process",
                path.display()
            )));
        }
        Ok(Self { file })
    }
}

impl Drop for OwnerLock {
    fn drop(&mut self) {
        let _ = imp::unlock(&self.file);
    }
}

fn lock_err(path: &Path, err: &std::io::Error) -> StorageError {
    StorageError::Lock(format!("{}: {err}", path.display()))
}

#[cfg(unix)]
mod imp {
    use std::fs::File;
    use std::os::raw::c_int;
    use std::os::unix::io::AsRawFd;

    const LOCK_EX: c_int = 2;
    const LOCK_NB: c_int = 4;
    const LOCK_UN: c_int = 8;

    extern "C" {
        fn flock(fd: c_int, operation: c_int) -> c_int;
    }

    pub fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let result = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub fn unlock(file: &File) -> std::io::Result<()> {
        // SAFETY: as above.
        let result = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::fs::File;

    #[allow(clippy::unnecessary_wraps)]
    pub fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
        Ok(true)
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn unlock(_file: &File) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_second_owner_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("owner.lock");

        let first = OwnerLock::acquire(&path).expect("first owner");
        match OwnerLock::acquire(&path) {
            Err(StorageError::Lock(message)) => assert!(message.contains("another process")),
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected lock to be held"),
        }

        drop(first);
        OwnerLock::acquire(&path).expect("lock released on drop");
    }
}
