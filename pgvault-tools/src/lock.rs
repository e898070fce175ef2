//! Inter-process stanza write lock (spec.md §5).
//!
//! A single exclusive holder per stanza; backup, expire, stanza-create,
//! stanza-upgrade and stanza-delete all take it before touching the
//! catalogs. Uses non-blocking `fcntl` record locks exactly like the
//! teacher's `ProcessLocker`, simplified to the exclusive-only case this
//! core needs (the core has no concept of a shared reader lock — read-only
//! commands are expected to tolerate vanishing labels instead, per §5).

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{bail, Error};

/// RAII guard for the stanza write lock. Dropping it releases the lock.
pub struct StanzaLockGuard {
    _file: File,
}

/// Try to acquire the exclusive stanza write lock at `lockfile`.
///
/// Never blocks: if another process already holds the lock, this returns
/// immediately with an error rather than waiting, matching the teacher's
/// `ProcessLocker::try_exclusive_lock` behavior (`F_SETLK`, not
/// `F_SETLKW`).
pub fn try_lock_stanza(lockfile: &Path) -> Result<StanzaLockGuard, Error> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(lockfile)?;

    let op = libc::flock {
        l_type: libc::F_WRLCK as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };

    if let Err(err) = nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_SETLK(&op)) {
        bail!(
            "unable to acquire stanza write lock '{}': {err}",
            lockfile.display()
        );
    }

    Ok(StanzaLockGuard { _file: file })
}

/// Whether a stop-file exists for the stanza. Its presence short-circuits
/// every mutating entry point *before* the write lock is acquired (spec.md
/// §5 "Cancellation").
pub fn stop_file_present(stop_file: &Path) -> bool {
    stop_file.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_acquired_and_released() {
        // Note: POSIX fcntl record locks are scoped to (process, inode), not
        // to the file descriptor, so a second `try_lock_stanza` call from
        // *this same process* would succeed even while `_first` is held -
        // the exclusivity this guards against is cross-process. We can only
        // assert the happy path here; cross-process contention is exercised
        // by integration tests that spawn a second process.
        let dir = std::env::temp_dir().join(format!("pgvault-lock-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let lockfile = dir.join("stanza.lock");

        let guard = try_lock_stanza(&lockfile).unwrap();
        drop(guard);
        assert!(try_lock_stanza(&lockfile).is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stop_file_detected() {
        let dir = std::env::temp_dir().join(format!("pgvault-stop-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let stop = dir.join("stop");
        assert!(!stop_file_present(&stop));
        std::fs::write(&stop, b"").unwrap();
        assert!(stop_file_present(&stop));
        std::fs::remove_dir_all(&dir).ok();
    }
}
