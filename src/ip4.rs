//! IPv4 header validation and dispatch to the per-protocol handlers.
//!
//! An [`Ip4Flow`] carries the pre-computed pseudo-header partial checksum so
//! TCP/UDP only need to fold in their own header and payload, rather than
//! re-summing the 12 pseudo-header bytes on every segment.

use std::net::Ipv4Addr;

use crate::config::Config;
use crate::wire::cksum;

const IPV4_HEADER_MIN_LEN: usize = 20;

pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

/// Per-packet context threaded through ICMP/TCP/UDP: addresses, protocol,
/// and the pseudo-header partial sum those handlers continue.
#[derive(Debug, Clone, Copy)]
pub struct Ip4Flow {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    /// Payload length, i.e. the IPv4 payload following this header.
    pub len: u16,
    /// `cksum(0, pseudo_header)`, ready for the transport handler to continue.
    pub pseudo_sum: u16,
}

/// Why a packet produced no further processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ip4Outcome {
    Dropped,
    FilteredBySrcSet,
    FilteredByDstSet,
    UnsupportedProto,
}

/// Validate an IPv4 header and dispatch the trimmed payload by protocol.
///
/// Returns the flow plus payload slice on success so the caller can hand it
/// to the matching `packet_analyze_*` function; the header checksum itself
/// is never verified — malformed or checksum-invalid headers are still worth
/// analyzing for logging value.
pub fn parse<'a>(cfg: &Config, data: &'a [u8]) -> Result<(Ip4Flow, &'a [u8]), Ip4Outcome> {
    if data.len() < IPV4_HEADER_MIN_LEN {
        tracing::debug!(len = data.len(), "short IP packet");
        return Err(Ip4Outcome::Dropped);
    }
    let ver_ihl = data[0];
    let ihl = ((ver_ihl & 0x0f) as usize) * 4;
    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if ihl < IPV4_HEADER_MIN_LEN || data.len() < ihl || data.len() < total_len || total_len < ihl {
        tracing::debug!(ihl, total_len, captured = data.len(), "malformed IP header");
        return Err(Ip4Outcome::Dropped);
    }
    // The NIC may pad the frame past the header's declared length; trim to it.
    let data = &data[..total_len];

    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    let proto = data[9];

    if !cfg.accepts_src(src) {
        tracing::trace!(%src, "dropped: src not in src_set");
        return Err(Ip4Outcome::FilteredBySrcSet);
    }
    if !cfg.accepts_dst(dst) {
        tracing::trace!(%dst, "dropped: dst not in dst_set");
        return Err(Ip4Outcome::FilteredByDstSet);
    }

    let payload = &data[ihl..total_len];
    let payload_len = payload.len() as u16;

    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[8] = 0;
    pseudo[9] = proto;
    pseudo[10..12].copy_from_slice(&payload_len.to_be_bytes());
    let pseudo_sum = cksum(0, &pseudo);

    let flow = Ip4Flow {
        src,
        dst,
        proto,
        len: payload_len,
        pseudo_sum,
    };

    match proto {
        IP_PROTO_ICMP | IP_PROTO_TCP | IP_PROTO_UDP => Ok((flow, payload)),
        other => {
            tracing::trace!(proto = other, "unsupported IP protocol");
            Err(Ip4Outcome::UnsupportedProto)
        }
    }
}

/// Synthesize a minimal 20-byte IPv4 header around `payload` and prepend it,
/// swapping src/dst relative to the inbound flow.
pub fn build_reply(flow: &Ip4Flow, proto: u8, payload: &[u8]) -> Vec<u8> {
    let total_len = IPV4_HEADER_MIN_LEN + payload.len();
    let mut header = [0u8; IPV4_HEADER_MIN_LEN];
    header[0] = 0x45; // version 4, IHL 5
    header[1] = 0x00; // DSCP/ECN
    header[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    header[4..6].copy_from_slice(&0u16.to_be_bytes()); // id
    header[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags/fragment offset
    header[8] = 64; // TTL
    header[9] = proto;
    header[10..12].copy_from_slice(&0u16.to_be_bytes()); // checksum, filled below
    header[12..16].copy_from_slice(&flow.dst.octets());
    header[16..20].copy_from_slice(&flow.src.octets());

    let sum = cksum(0, &header);
    header[10..12].copy_from_slice(&(!sum).to_be_bytes());

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::EtherAddr;

    fn test_config() -> Config {
        Config {
            interface: "test0".into(),
            dry_run: false,
            foreground: true,
            debug: false,
            verbose: false,
            csv_path: None,
            pid_path: None,
            our_ether: EtherAddr([0; 6]),
            dst_set: None,
            src_set: None,
        }
    }

    fn build_udp_packet(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let total_len = IPV4_HEADER_MIN_LEN + payload.len();
        let mut pkt = vec![0u8; total_len];
        pkt[0] = 0x45;
        pkt[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        pkt[8] = 64;
        pkt[9] = IP_PROTO_UDP;
        pkt[12..16].copy_from_slice(&src.octets());
        pkt[16..20].copy_from_slice(&dst.octets());
        pkt[20..].copy_from_slice(payload);
        pkt
    }

    #[test]
    fn parses_valid_header_and_trims_payload() {
        let cfg = test_config();
        let pkt = build_udp_packet("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), &[1, 2, 3, 4]);
        let (flow, payload) = parse(&cfg, &pkt).unwrap();
        assert_eq!(flow.proto, IP_PROTO_UDP);
        assert_eq!(payload, &[1, 2, 3, 4]);
        assert_eq!(flow.len, 4);
    }

    #[test]
    fn rejects_short_header() {
        let cfg = test_config();
        assert_eq!(parse(&cfg, &[0u8; 10]), Err(Ip4Outcome::Dropped));
    }

    #[test]
    fn rejects_truncated_packet() {
        let cfg = test_config();
        let mut pkt = build_udp_packet("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), &[1, 2]);
        pkt.truncate(pkt.len() - 1); // shorter than the declared total length
        assert_eq!(parse(&cfg, &pkt), Err(Ip4Outcome::Dropped));
    }

    #[test]
    fn trims_nic_padding_past_declared_length() {
        let cfg = test_config();
        let mut pkt = build_udp_packet("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), &[1, 2]);
        pkt.push(0xff); // trailing NIC padding not reflected in the len field
        let (flow, payload) = parse(&cfg, &pkt).unwrap();
        assert_eq!(flow.proto, IP_PROTO_UDP);
        assert_eq!(payload, &[1, 2]);
    }

    #[test]
    fn pseudo_header_sum_matches_manual_computation() {
        let cfg = test_config();
        let src: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let dst: Ipv4Addr = "10.0.0.2".parse().unwrap();
        let pkt = build_udp_packet(src, dst, &[0u8; 8]);
        let (flow, _) = parse(&cfg, &pkt).unwrap();

        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&src.octets());
        pseudo[4..8].copy_from_slice(&dst.octets());
        pseudo[9] = IP_PROTO_UDP;
        pseudo[10..12].copy_from_slice(&8u16.to_be_bytes());
        assert_eq!(flow.pseudo_sum, cksum(0, &pseudo));
    }

    #[test]
    fn build_reply_swaps_addresses_and_checksums_to_zero() {
        let flow = Ip4Flow {
            src: "10.0.0.1".parse().unwrap(),
            dst: "10.0.0.2".parse().unwrap(),
            proto: IP_PROTO_ICMP,
            len: 0,
            pseudo_sum: 0,
        };
        let reply = build_reply(&flow, IP_PROTO_ICMP, &[]);
        assert_eq!(&reply[12..16], &flow.dst.octets());
        assert_eq!(&reply[16..20], &flow.src.octets());
        assert_eq!(cksum(0, &reply[..IPV4_HEADER_MIN_LEN]), 0);
    }
}
