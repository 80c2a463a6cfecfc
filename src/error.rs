//! The sensor's typed error surface.
//!
//! Per §7, only two classes of condition ever become an `Err` that unwinds
//! out of the pipeline: the capture interface going away, and the handful of
//! startup failures that should abort the process with exit code 1. Every
//! per-packet condition (malformed input, bad checksum, filtered by an
//! address set) is handled locally as a logged, dropped packet — never as a
//! variant of this enum.

use std::io;
use std::path::PathBuf;

/// Fatal conditions that unwind to `main` and terminate the sensor.
#[derive(Debug, thiserror::Error)]
pub enum FlytrapError {
    #[error("failed to open or activate capture interface: {0}")]
    Capture(#[source] io::Error),

    #[error("failed to open CSV output file: {0}")]
    CsvOpen(#[source] io::Error),

    #[error("pid file {0} is already locked by a running instance")]
    PidFileConflict(PathBuf),

    #[error("pid file I/O error: {0}")]
    PidFileIo(#[source] io::Error),

    #[error("invalid address, range, or CIDR: {0}")]
    InvalidAddress(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_conflict_names_the_path() {
        let err = FlytrapError::PidFileConflict(PathBuf::from("/var/run/flytrap.pid"));
        assert!(err.to_string().contains("/var/run/flytrap.pid"));
    }

    #[test]
    fn capture_wraps_the_source_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such device");
        let err = FlytrapError::Capture(io_err);
        assert!(err.to_string().contains("no such device"));
    }
}
