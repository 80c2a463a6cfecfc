//! The CSV record schema shared between the sensor (which writes it) and
//! `ft2dshield` (which reads it back). The two must never drift apart, so
//! the format lives in exactly one place: `<sec>.<usec>,<src>,<sport>,<dst>,
//! <dport>,<proto>,<paylen>,<proto_info>`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::capture::Timestamp;
use crate::error::FlytrapError;

/// One logged packet.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecord {
    pub sec: i64,
    pub usec: i64,
    pub src: Ipv4Addr,
    pub sport: u16,
    pub dst: Ipv4Addr,
    pub dport: u16,
    /// `"icmp"`, `"tcp"`, or `"udp"`.
    pub proto: String,
    pub paylen: usize,
    /// Protocol-specific trailer: the TCP flag string, `"type.code"` for
    /// ICMP, or empty for UDP.
    pub proto_info: String,
}

impl CsvRecord {
    pub fn new(ts: Timestamp, src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16, proto: &str, paylen: usize, proto_info: impl Into<String>) -> Self {
        Self {
            sec: ts.sec,
            usec: ts.usec,
            src,
            sport,
            dst,
            dport,
            proto: proto.to_string(),
            paylen,
            proto_info: proto_info.into(),
        }
    }
}

impl std::fmt::Display for CsvRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:06},{},{},{},{},{},{},{}",
            self.sec, self.usec, self.src, self.sport, self.dst, self.dport, self.proto, self.paylen, self.proto_info
        )
    }
}

/// Parse a single CSV line (no trailing newline) into a [`CsvRecord`].
pub fn parse_line(line: &str) -> Option<CsvRecord> {
    let mut fields = line.splitn(8, ',');
    let ts = fields.next()?;
    let src: Ipv4Addr = fields.next()?.parse().ok()?;
    let sport: u16 = fields.next()?.parse().ok()?;
    let dst: Ipv4Addr = fields.next()?.parse().ok()?;
    let dport: u16 = fields.next()?.parse().ok()?;
    let proto = fields.next()?.to_string();
    let paylen: usize = fields.next()?.parse().ok()?;
    let proto_info = fields.next().unwrap_or("").to_string();

    let (sec_str, usec_str) = ts.split_once('.')?;
    let sec: i64 = sec_str.parse().ok()?;
    let usec: i64 = usec_str.parse().ok()?;

    Some(CsvRecord {
        sec,
        usec,
        src,
        sport,
        dst,
        dport,
        proto,
        paylen,
        proto_info,
    })
}

/// Append-only, line-buffered CSV sink. Writes flush immediately, mirroring
/// the original's `fflush` after every record so a crash never loses a
/// completed line. Reopening (on SIGHUP) opens the new path first and only
/// closes the old handle once the new one succeeds, so a failed reopen
/// leaves logging intact rather than going dark.
pub struct CsvWriter {
    path: Option<PathBuf>,
    out: BufWriter<Box<dyn Write + Send>>,
}

impl CsvWriter {
    /// `path = None` writes to stdout, matching the original's `nf = stdout`
    /// fallback when no `-l` flag was given.
    pub fn open(path: Option<PathBuf>) -> Result<Self, FlytrapError> {
        let out = Self::open_sink(&path)?;
        Ok(Self { path, out })
    }

    fn open_sink(path: &Option<PathBuf>) -> Result<BufWriter<Box<dyn Write + Send>>, FlytrapError> {
        match path {
            None => Ok(BufWriter::new(Box::new(io::stdout()))),
            Some(p) => {
                let file: File = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(p)
                    .map_err(FlytrapError::CsvOpen)?;
                Ok(BufWriter::new(Box::new(file)))
            }
        }
    }

    /// Re-open the configured path, swapping in the new handle only after it
    /// opens successfully.
    pub fn reopen(&mut self) -> Result<(), FlytrapError> {
        let new_out = Self::open_sink(&self.path)?;
        self.out = new_out;
        Ok(())
    }

    pub fn write_record(&mut self, record: &CsvRecord) -> Result<(), FlytrapError> {
        writeln!(self.out, "{record}").map_err(FlytrapError::CsvOpen)?;
        self.out.flush().map_err(FlytrapError::CsvOpen)
    }
}
