//! Packet capture adapter.
//!
//! A narrow trait isolates the pipeline from the capture backend so the
//! sensor's tests never need a live interface or root privileges. The
//! production implementation wraps the `pcap` crate; [`MockCapture`] replays
//! canned frames and records injections for tests.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::FlytrapError;

/// A capture timestamp, kept as seconds + microseconds since the Unix epoch
/// so the ARP expiry clock (driven by packet timestamps, not wall time, per
/// §4.C) can do integer millisecond arithmetic without floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    pub fn new(sec: i64, usec: i64) -> Self {
        Self { sec, usec }
    }

    /// Milliseconds since the epoch, the unit the ARP claim engine works in.
    pub fn as_millis(&self) -> u64 {
        (self.sec as u64) * 1000 + (self.usec as u64) / 1000
    }
}

/// The five operations the sensor's main loop needs from a capture backend.
///
/// `next`'s `Ok(None)` is the "try again" signal (no packet currently
/// available), distinct from an error; the loop treats it as a no-op
/// iteration rather than a condition worth logging.
pub trait CaptureDevice {
    fn activate(&mut self, filter: &str) -> Result<(), FlytrapError>;
    fn next(&mut self) -> Result<Option<(Timestamp, Vec<u8>)>, FlytrapError>;
    fn inject(&mut self, frame: &[u8]) -> Result<(), FlytrapError>;
}

/// The BPF filter every capture backend is activated with: ARP plus IPv4
/// traffic addressed to us or broadcast. Keeping the shape here, rather than
/// inline at each call site, means the sensor and its tests agree on exactly
/// what the kernel is asked to hand up.
pub fn filter_expr(our_ether: &crate::wire::EtherAddr) -> String {
    format!("arp or ether dst {our_ether} or ether dst ff:ff:ff:ff:ff:ff")
}

/// Live capture backed by `pcap`.
pub struct PcapCapture {
    capture: pcap::Capture<pcap::Active>,
    dry_run: bool,
}

impl PcapCapture {
    /// Open and configure `interface` for promiscuous, bidirectional capture.
    /// Does not activate the BPF filter; call [`CaptureDevice::activate`]
    /// once the caller knows `our_ether` (needed to build the filter string).
    pub fn open(interface: &str, dry_run: bool) -> Result<Self, FlytrapError> {
        let inactive = pcap::Capture::from_device(interface)
            .map_err(|e| FlytrapError::Capture(to_io_error(e)))?
            .promisc(true)
            .snaplen(65535)
            .timeout(100);

        let mut capture = inactive
            .open()
            .map_err(|e| FlytrapError::Capture(to_io_error(e)))?;

        capture
            .set_datalink(pcap::Linktype::ETHERNET)
            .map_err(|e| FlytrapError::Capture(to_io_error(e)))?;

        Ok(Self { capture, dry_run })
    }
}

impl CaptureDevice for PcapCapture {
    fn activate(&mut self, filter: &str) -> Result<(), FlytrapError> {
        self.capture
            .filter(filter, true)
            .map_err(|e| FlytrapError::Capture(to_io_error(e)))?;
        self.capture
            .direction(pcap::Direction::InOut)
            .map_err(|e| FlytrapError::Capture(to_io_error(e)))?;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Timestamp, Vec<u8>)>, FlytrapError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = Timestamp::new(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as i64);
                Ok(Some((ts, packet.data.to_vec())))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(FlytrapError::Capture(to_io_error(e))),
        }
    }

    fn inject(&mut self, frame: &[u8]) -> Result<(), FlytrapError> {
        if self.dry_run {
            tracing::debug!(len = frame.len(), "dry-run: suppressing outbound frame");
            return Ok(());
        }
        self.capture
            .sendpacket(frame)
            .map_err(|e| FlytrapError::Capture(to_io_error(e)))
    }
}

fn to_io_error(e: pcap::Error) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

/// Drives the capture loop with a wait strategy matching the backend's
/// configured read timeout, so repeated "no packet" results don't spin.
pub fn poll_interval() -> Duration {
    Duration::from_millis(100)
}

/// In-memory capture device for tests: replays a fixed queue of frames and
/// records whatever gets injected, with no live interface involved.
#[derive(Default)]
pub struct MockCapture {
    pub queue: VecDeque<(Timestamp, Vec<u8>)>,
    pub injected: Vec<Vec<u8>>,
    pub activated_filter: Option<String>,
}

impl MockCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ts: Timestamp, frame: Vec<u8>) {
        self.queue.push_back((ts, frame));
    }
}

impl CaptureDevice for MockCapture {
    fn activate(&mut self, filter: &str) -> Result<(), FlytrapError> {
        self.activated_filter = Some(filter.to_string());
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Timestamp, Vec<u8>)>, FlytrapError> {
        Ok(self.queue.pop_front())
    }

    fn inject(&mut self, frame: &[u8]) -> Result<(), FlytrapError> {
        self.injected.push(frame.to_vec());
        Ok(())
    }
}
