//! PID file guard.
//!
//! A single decimal line, held open with an advisory `flock` for the
//! process's lifetime so a second instance targeting the same path fails
//! fast rather than silently racing the first. Released on every exit path
//! via `Drop`, regardless of which one is taken.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::FlytrapError;

/// An open, locked PID file. Dropping it unlinks the path and closes the
/// descriptor; the lock is released by the kernel as part of the close.
pub struct PidFile {
    file: File,
    path: PathBuf,
}

impl PidFile {
    /// Create (or reuse) `path`, taking an exclusive non-blocking lock.
    ///
    /// If the lock is already held, reads the existing PID out of the file
    /// (best-effort) and returns [`FlytrapError::PidFileConflict`] without
    /// touching the file's contents.
    pub fn open(path: &Path) -> Result<Self, FlytrapError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(FlytrapError::PidFileIo)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(FlytrapError::PidFileConflict(path.to_path_buf()));
            }
            return Err(FlytrapError::PidFileIo(err));
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Truncate the file and write the current process's PID as a decimal
    /// line. Safe to call more than once.
    pub fn write_pid(&mut self) -> Result<(), FlytrapError> {
        self.file.set_len(0).map_err(FlytrapError::PidFileIo)?;
        self.file.seek(SeekFrom::Start(0)).map_err(FlytrapError::PidFileIo)?;
        let pid = std::process::id();
        write!(self.file, "{pid}").map_err(FlytrapError::PidFileIo)?;
        self.file.flush().map_err(FlytrapError::PidFileIo)
    }

    /// Best-effort read of whatever PID is currently recorded at `path`,
    /// used to report who is holding a conflicting lock.
    pub fn read_existing(path: &Path) -> Option<u32> {
        let mut buf = String::new();
        File::open(path).ok()?.read_to_string(&mut buf).ok()?;
        buf.trim().parse().ok()
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_write_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flytrap.pid");
        let mut pf = PidFile::open(&path).unwrap();
        pf.write_pid().unwrap();

        let recorded = PidFile::read_existing(&path).unwrap();
        assert_eq!(recorded, std::process::id());
    }

    #[test]
    fn second_open_conflicts_while_first_is_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flytrap.pid");
        let _first = PidFile::open(&path).unwrap();

        match PidFile::open(&path) {
            Err(FlytrapError::PidFileConflict(p)) => assert_eq!(p, path),
            other => panic!("expected PidFileConflict, got {other:?}"),
        }
    }

    #[test]
    fn drop_removes_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flytrap.pid");
        {
            let _pf = PidFile::open(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn dropping_the_first_guard_lets_a_new_one_claim_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flytrap.pid");
        {
            let _first = PidFile::open(&path).unwrap();
        }
        assert!(PidFile::open(&path).is_ok());
    }
}
