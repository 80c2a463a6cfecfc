//! The main capture/claim/respond loop and its signal-driven log reopen.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::arp::ArpTree;
use crate::capture::{filter_expr, CaptureDevice, Timestamp};
use crate::config::Config;
use crate::csv::{CsvRecord, CsvWriter};
use crate::error::FlytrapError;
use crate::ethernet::{self, EtherOutcome, EthernetFrame};
use crate::icmp;
use crate::ip4::{self, Ip4Flow, Ip4Outcome};
use crate::pidfile::PidFile;
use crate::tcp4;
use crate::udp4;
use crate::wire::EtherAddr;

static REOPEN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sighup(_signum: libc::c_int) {
    REOPEN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install the process-wide SIGHUP handler. Does no work itself beyond
/// setting a flag; the main loop notices it on the next iteration.
pub fn install_sighup_handler() {
    unsafe {
        libc::signal(libc::SIGHUP, on_sighup as libc::sighandler_t);
    }
}

fn take_reopen_request() -> bool {
    REOPEN_REQUESTED.swap(false, Ordering::SeqCst)
}

/// Owns every piece of runtime state the main loop touches: configuration,
/// the ARP claim tree, the CSV sink, the capture device, and (if held) the
/// PID file guard whose `Drop` releases the lock on every exit path.
pub struct Sensor<C: CaptureDevice> {
    pub cfg: Config,
    pub tree: ArpTree,
    pub csv: CsvWriter,
    pub capture: C,
    pub pidfile: Option<PidFile>,
}

/// The outcome of processing one captured frame, for logging and tests.
pub enum PacketOutcome {
    Logged(CsvRecord),
    Dropped { reason: &'static str },
}

impl<C: CaptureDevice> Sensor<C> {
    pub fn new(cfg: Config, capture: C, csv: CsvWriter, pidfile: Option<PidFile>) -> Self {
        Self {
            cfg,
            tree: ArpTree::new(),
            csv,
            capture,
            pidfile,
        }
    }

    /// Activate the capture device with the fixed BPF filter and run the
    /// loop until the capture device itself errors out ("interface gone").
    pub fn run(&mut self) -> Result<(), FlytrapError> {
        self.capture.activate(&filter_expr(&self.cfg.our_ether))?;

        loop {
            if take_reopen_request() {
                if let Err(e) = self.csv.reopen() {
                    tracing::error!(error = %e, "failed to reopen CSV log");
                } else {
                    tracing::info!("CSV log reopened");
                }
            }

            let Some((ts, bytes)) = self.capture.next()? else {
                std::thread::sleep(crate::capture::poll_interval());
                continue;
            };

            if let Some(outcome) = self.process_frame(ts, &bytes) {
                if let PacketOutcome::Logged(record) = outcome {
                    if let Err(e) = self.csv.write_record(&record) {
                        tracing::error!(error = %e, "failed to write CSV record");
                    }
                }
            }
        }
    }

    /// Run one frame through the full pipeline, injecting any reply and
    /// returning the CSV record to log, if any.
    fn process_frame(&mut self, ts: Timestamp, bytes: &[u8]) -> Option<PacketOutcome> {
        let frame = EthernetFrame::parse(bytes)?;
        let when_ms = ts.as_millis();

        let (outcome, reply) = ethernet::handle_frame(&self.cfg, &mut self.tree, &frame, when_ms);
        if let Some(full_frame) = reply {
            // handle_frame already wraps the is-at reply in its own Ethernet
            // header, so it goes straight to the capture device.
            if let Err(e) = self.capture.inject(&full_frame) {
                tracing::warn!(error = %e, "failed to inject ARP reply frame");
            }
        }
        match outcome {
            EtherOutcome::Dropped => return Some(PacketOutcome::Dropped { reason: "arp" }),
            EtherOutcome::NotArp => {}
        }

        let (flow, payload) = match ip4::parse(&self.cfg, frame.payload) {
            Ok(v) => v,
            Err(Ip4Outcome::Dropped) => return Some(PacketOutcome::Dropped { reason: "malformed ip4" }),
            Err(Ip4Outcome::FilteredBySrcSet) => return Some(PacketOutcome::Dropped { reason: "src filter" }),
            Err(Ip4Outcome::FilteredByDstSet) => return Some(PacketOutcome::Dropped { reason: "dst filter" }),
            Err(Ip4Outcome::UnsupportedProto) => return Some(PacketOutcome::Dropped { reason: "unsupported proto" }),
        };

        match flow.proto {
            ip4::IP_PROTO_ICMP => {
                let (record, reply) = icmp::handle(&flow, payload)?;
                if let Some(reply_ip) = &reply {
                    self.inject_ip4_reply(&frame, reply_ip);
                }
                Some(PacketOutcome::Logged(self.record(ts, &flow, 0, 0, "ICMP", record.payload_len, format!("{}.{}", record.icmp_type, record.icmp_code))))
            }
            ip4::IP_PROTO_TCP => {
                let (record, reply) = tcp4::handle(&flow, payload)?;
                if let Some(reply_ip) = &reply {
                    self.inject_ip4_reply(&frame, reply_ip);
                }
                Some(PacketOutcome::Logged(self.record(ts, &flow, record.sport, record.dport, "TCP", record.payload_len, record.flags)))
            }
            ip4::IP_PROTO_UDP => {
                let record = udp4::handle(&flow, payload)?;
                Some(PacketOutcome::Logged(self.record(ts, &flow, record.sport, record.dport, "UDP", record.payload_len, String::new())))
            }
            _ => None,
        }
    }

    fn record(&self, ts: Timestamp, flow: &Ip4Flow, sport: u16, dport: u16, proto: &str, paylen: usize, proto_info: String) -> CsvRecord {
        CsvRecord::new(ts, flow.src, sport, flow.dst, dport, proto, paylen, proto_info)
    }

    fn inject_ip4_reply(&mut self, frame: &EthernetFrame, reply_ip: &[u8]) {
        self.inject_ethernet(frame.src, ethernet::ETHERTYPE_IPV4, reply_ip);
    }

    fn inject_ethernet(&mut self, dst: EtherAddr, ethertype: u16, payload: &[u8]) {
        let eth = ethernet::build_frame(dst, self.cfg.our_ether, ethertype, payload);
        if let Err(e) = self.capture.inject(&eth) {
            tracing::warn!(error = %e, "failed to inject reply frame");
        }
    }
}

/// Open (or reuse) the PID file named by `cfg.pid_path`, if any, returning
/// the guard that must stay alive for the process's lifetime.
pub fn acquire_pidfile(pid_path: &Option<PathBuf>) -> Result<Option<PidFile>, FlytrapError> {
    match pid_path {
        None => Ok(None),
        Some(path) => {
            let mut pf = PidFile::open(path)?;
            pf.write_pid()?;
            Ok(Some(pf))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MockCapture;
    use crate::ip4set::Ip4Set;
    use std::net::Ipv4Addr;

    fn test_config() -> Config {
        Config {
            interface: "test0".into(),
            dry_run: false,
            foreground: true,
            debug: false,
            verbose: false,
            csv_path: None,
            pid_path: None,
            our_ether: EtherAddr([0xaa, 0, 0, 0, 0, 1]),
            dst_set: Some({
                let mut s = Ip4Set::new();
                s.insert("10.0.0.0".parse().unwrap(), "10.255.255.255".parse().unwrap());
                s
            }),
            src_set: None,
        }
    }

    fn build_udp_frame(src_mac: EtherAddr, dst_mac: EtherAddr, src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut udp = vec![0u8; 8 + payload.len()];
        udp[0..2].copy_from_slice(&sport.to_be_bytes());
        udp[2..4].copy_from_slice(&dport.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp.len() as u16).to_be_bytes());
        udp[8..].copy_from_slice(payload);

        let total_len = 20 + udp.len();
        let mut ip = vec![0u8; total_len];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[8] = 64;
        ip[9] = 17;
        ip[12..16].copy_from_slice(&src.octets());
        ip[16..20].copy_from_slice(&dst.octets());
        ip[20..].copy_from_slice(&udp);

        ethernet::build_frame(dst_mac, src_mac, ethernet::ETHERTYPE_IPV4, &ip)
    }

    #[test]
    fn udp_packet_in_dst_set_produces_a_logged_record_and_no_injection() {
        let cfg = test_config();
        let mut capture = MockCapture::new();
        let peer_mac = EtherAddr([2, 0, 0, 0, 0, 9]);
        let frame = build_udp_frame(peer_mac, cfg.our_ether, "10.0.0.5".parse().unwrap(), "10.0.0.7".parse().unwrap(), 1111, 53, b"hi");
        capture.push(Timestamp::new(1, 0), frame);

        let mut sensor = Sensor::new(cfg, capture, CsvWriter::open(None).unwrap(), None);
        let (ts, bytes) = sensor.capture.next().unwrap().unwrap();
        let outcome = sensor.process_frame(ts, &bytes).unwrap();
        match outcome {
            PacketOutcome::Logged(record) => {
                assert_eq!(record.proto, "UDP");
                assert_eq!(record.sport, 1111);
                assert_eq!(record.dport, 53);
            }
            PacketOutcome::Dropped { reason } => panic!("expected logged record, got dropped: {reason}"),
        }
        assert!(sensor.capture.injected.is_empty());
    }

    #[test]
    fn out_of_dst_set_udp_is_dropped() {
        let cfg = test_config();
        let capture = MockCapture::new();
        let mut sensor = Sensor::new(cfg, capture, CsvWriter::open(None).unwrap(), None);

        let peer_mac = EtherAddr([2, 0, 0, 0, 0, 9]);
        let frame = build_udp_frame(peer_mac, sensor.cfg.our_ether, "10.0.0.5".parse().unwrap(), "192.168.1.1".parse().unwrap(), 1, 2, &[]);
        let outcome = sensor.process_frame(Timestamp::new(1, 0), &frame).unwrap();
        match outcome {
            PacketOutcome::Dropped { reason } => assert_eq!(reason, "dst filter"),
            PacketOutcome::Logged(_) => panic!("expected drop"),
        }
    }
}
