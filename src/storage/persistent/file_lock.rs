//! Ownership lock for a region store directory.
//!
//! A relaunched process can start while the previous one is still shutting
//! down. Both would append to the same log, so the second opener must fail.
//! The owner writes its process id into `regions.lock` so the loser can say
//! who holds the store. The OS lock is advisory and dies with the process,
//! so a stale file from a crash never blocks a relaunch.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::storage::traits::StorageError;

/// Lock file name inside the store directory.
pub(crate) const LOCK_FILE: &str = "regions.lock";

/// Held for as long as a `PersistentRegionStore` is open.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take ownership of the store in `dir`.
    ///
    /// # Errors
    /// `StorageError::Locked` if another process owns the store, or
    /// `StorageError::BackendError` if the lock file cannot be opened.
    pub fn acquire(dir: &Path) -> Result<Self, StorageError> {
        let path = dir.join(LOCK_FILE);
        let backend = |what: &str, e: std::io::Error| {
            StorageError::BackendError(format!("{what} {}: {e}", path.display()))
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| backend("failed to open lock file", e))?;

        if !os::try_lock_exclusive(&file).map_err(|e| backend("failed to lock", e))? {
            let holder = read_holder(&mut file);
            return Err(StorageError::Locked { path, holder });
        }

        record_holder(&mut file).map_err(|e| backend("failed to record owner in", e))?;
        debug!(path = %path.display(), pid = std::process::id(), "acquired region store lock");

        Ok(Self { _file: file, path })
    }

    /// The lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn record_holder(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_data()
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

#[cfg(unix)]
mod os {
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    /// Ok(false) when another open file description holds the lock.
    pub(super) fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
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
}

#[cfg(windows)]
mod os {
    use std::fs::File;
    use std::os::windows::io::AsRawHandle;

    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // Lock a byte far past the pid text so the owner record stays readable.
    const LOCK_OFFSET_HIGH: u32 = u32::MAX;

    pub(super) fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: OVERLAPPED is plain data; zeroed is its documented initial state.
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.Anonymous.Anonymous.OffsetHigh = LOCK_OFFSET_HIGH;
        // SAFETY: the handle is owned by `file` and outlives the call.
        let ok = unsafe {
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if ok != 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    pub(super) fn try_lock_exclusive(_file: &std::fs::File) -> std::io::Result<bool> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "region store locking is not supported on this platform",
        ))
    }
}
