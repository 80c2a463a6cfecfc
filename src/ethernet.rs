//! Ethernet frame parsing and the ARP half of the packet pipeline.
//!
//! Owns the actual wire shape of ARP packets (the arena in [`crate::arp`]
//! only hands back a claim/no-claim signal); this module turns that signal
//! into the is-at packet bytes and hands them to the capture adapter.

use std::net::Ipv4Addr;

use crate::arp::{ArpTree, WhoHasAction};
use crate::config::Config;
use crate::wire::EtherAddr;

const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

const ARP_HTYPE_ETHER: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_OPER_WHO_HAS: u16 = 1;
const ARP_OPER_IS_AT: u16 = 2;

const ETHER_HEADER_LEN: usize = 14;
const ARP_PACKET_LEN: usize = 28;

/// A parsed Ethernet frame header plus the unconsumed payload slice.
pub struct EthernetFrame<'a> {
    pub dst: EtherAddr,
    pub src: EtherAddr,
    pub ethertype: u16,
    pub payload: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    pub fn parse(data: &'a [u8]) -> Option<EthernetFrame<'a>> {
        if data.len() < ETHER_HEADER_LEN {
            return None;
        }
        let dst = EtherAddr(data[0..6].try_into().unwrap());
        let src = EtherAddr(data[6..12].try_into().unwrap());
        let ethertype = u16::from_be_bytes([data[12], data[13]]);
        Some(EthernetFrame {
            dst,
            src,
            ethertype,
            payload: &data[ETHER_HEADER_LEN..],
        })
    }
}

/// Build a 14-byte Ethernet header followed by `payload`.
pub fn build_frame(dst: EtherAddr, src: EtherAddr, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ETHER_HEADER_LEN + payload.len());
    out.extend_from_slice(&dst.0);
    out.extend_from_slice(&src.0);
    out.extend_from_slice(&ethertype.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone, Copy)]
struct ArpPacket {
    htype: u16,
    ptype: u16,
    hlen: u8,
    plen: u8,
    oper: u16,
    sha: EtherAddr,
    spa: Ipv4Addr,
    tha: EtherAddr,
    tpa: Ipv4Addr,
}

impl ArpPacket {
    fn parse(data: &[u8]) -> Option<ArpPacket> {
        if data.len() < ARP_PACKET_LEN {
            return None;
        }
        Some(ArpPacket {
            htype: u16::from_be_bytes([data[0], data[1]]),
            ptype: u16::from_be_bytes([data[2], data[3]]),
            hlen: data[4],
            plen: data[5],
            oper: u16::from_be_bytes([data[6], data[7]]),
            sha: EtherAddr(data[8..14].try_into().unwrap()),
            spa: Ipv4Addr::new(data[14], data[15], data[16], data[17]),
            tha: EtherAddr(data[18..24].try_into().unwrap()),
            tpa: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
        })
    }

    fn is_valid_ether_ip4(&self) -> bool {
        self.htype == ARP_HTYPE_ETHER && self.hlen == 6 && self.ptype == ARP_PTYPE_IPV4 && self.plen == 4
    }

    fn to_bytes(self) -> [u8; ARP_PACKET_LEN] {
        let mut out = [0u8; ARP_PACKET_LEN];
        out[0..2].copy_from_slice(&self.htype.to_be_bytes());
        out[2..4].copy_from_slice(&self.ptype.to_be_bytes());
        out[4] = self.hlen;
        out[5] = self.plen;
        out[6..8].copy_from_slice(&self.oper.to_be_bytes());
        out[8..14].copy_from_slice(&self.sha.0);
        out[14..18].copy_from_slice(&self.spa.octets());
        out[18..24].copy_from_slice(&self.tha.0);
        out[24..28].copy_from_slice(&self.tpa.octets());
        out
    }
}

/// The result of running one inbound frame through the Ethernet/ARP handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherOutcome {
    /// Nothing further to do: logged (if applicable) or silently ignored.
    Dropped,
    /// Not Ethernet/ARP at all: the caller should continue on to IPv4.
    NotArp,
}

/// Parse and act on one Ethernet frame's ARP contents.
///
/// Returns [`EtherOutcome::NotArp`] when `frame.ethertype` is IPv4, so the
/// caller's dispatch loop can fall through to [`crate::ip4`] with the same
/// already-parsed frame.
pub fn handle_frame(cfg: &Config, tree: &mut ArpTree, frame: &EthernetFrame, when_ms: u64) -> (EtherOutcome, Option<Vec<u8>>) {
    if frame.ethertype == ETHERTYPE_IPV4 {
        return (EtherOutcome::NotArp, None);
    }
    if frame.ethertype != ETHERTYPE_ARP {
        tracing::trace!(ethertype = format!("0x{:04x}", frame.ethertype), "dropped: not ARP or IPv4");
        return (EtherOutcome::Dropped, None);
    }

    let Some(pkt) = ArpPacket::parse(frame.payload) else {
        tracing::debug!(len = frame.payload.len(), "short ARP packet");
        return (EtherOutcome::Dropped, None);
    };
    if !pkt.is_valid_ether_ip4() {
        tracing::debug!("ARP packet ignored: unsupported htype/ptype/hlen/plen");
        return (EtherOutcome::Dropped, None);
    }

    let reply = match pkt.oper {
        ARP_OPER_WHO_HAS => {
            tracing::debug!(tpa = %pkt.tpa, spa = %pkt.spa, "who-has");
            if !cfg.accepts_dst(pkt.tpa) {
                tracing::debug!(tpa = %pkt.tpa, "target address is out of bounds");
                None
            } else {
                tree.register(pkt.spa, pkt.sha, when_ms);
                match tree.on_who_has(pkt.tpa, when_ms) {
                    WhoHasAction::SendIsAt => Some(build_is_at_reply(cfg.our_ether, &pkt)),
                    WhoHasAction::None => None,
                }
            }
        }
        ARP_OPER_IS_AT => {
            tracing::debug!(tpa = %pkt.tpa, tha = %pkt.tha, "is-at");
            tree.register(pkt.spa, pkt.sha, when_ms);
            tree.register(pkt.tpa, pkt.tha, when_ms);
            None
        }
        other => {
            tracing::trace!(oper = other, "unknown ARP operation");
            None
        }
    };

    // `on_who_has` already runs the fence-short-circuited expiry check
    // (§4.C) on every who-has; an unconditional sweep here on every ARP
    // frame (including is-at) would be an O(n) walk on each one, defeating
    // the point of the `oldest`/`newest` fences.

    match reply {
        Some(arp_bytes) => {
            let eth = build_frame(pkt.sha, cfg.our_ether, ETHERTYPE_ARP, &arp_bytes);
            (EtherOutcome::Dropped, Some(eth))
        }
        None => (EtherOutcome::Dropped, None),
    }
}

/// Mirror `iap`'s sha/spa into tha/tpa, substitute our mac as sha, set
/// opcode is-at — the wire shape of `arp_reply` in the source this was
/// grounded on.
fn build_is_at_reply(our_ether: EtherAddr, iap: &ArpPacket) -> [u8; ARP_PACKET_LEN] {
    ArpPacket {
        htype: ARP_HTYPE_ETHER,
        ptype: ARP_PTYPE_IPV4,
        hlen: 6,
        plen: 4,
        oper: ARP_OPER_IS_AT,
        sha: our_ether,
        spa: iap.tpa,
        tha: iap.sha,
        tpa: iap.spa,
    }
    .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip4set::Ip4Set;

    fn mac(tail: u8) -> EtherAddr {
        EtherAddr([0xaa, 0, 0, 0, 0, tail])
    }

    fn test_config(our_ether: EtherAddr) -> Config {
        let mut dst_set = Ip4Set::new();
        dst_set.insert("10.0.0.0".parse().unwrap(), "10.0.0.255".parse().unwrap());
        Config {
            interface: "test0".into(),
            dry_run: false,
            foreground: true,
            debug: false,
            verbose: false,
            csv_path: None,
            pid_path: None,
            our_ether,
            dst_set: Some(dst_set),
            src_set: None,
        }
    }

    fn build_who_has(tpa: Ipv4Addr, spa: Ipv4Addr, sha: EtherAddr) -> Vec<u8> {
        build_frame(
            EtherAddr::BROADCAST,
            sha,
            ETHERTYPE_ARP,
            &ArpPacket {
                htype: ARP_HTYPE_ETHER,
                ptype: ARP_PTYPE_IPV4,
                hlen: 6,
                plen: 4,
                oper: ARP_OPER_WHO_HAS,
                sha,
                spa,
                tha: EtherAddr([0; 6]),
                tpa,
            }
            .to_bytes(),
        )
    }

    #[test]
    fn who_has_outside_dst_set_is_ignored() {
        let cfg = test_config(mac(0xee));
        let mut tree = ArpTree::new();
        let frame_bytes = build_who_has(
            "192.0.2.1".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            mac(1),
        );
        let frame = EthernetFrame::parse(&frame_bytes).unwrap();
        let (outcome, reply) = handle_frame(&cfg, &mut tree, &frame, 0);
        assert_eq!(outcome, EtherOutcome::Dropped);
        assert!(reply.is_none());
    }

    #[test]
    fn who_has_eventually_claims_and_replies() {
        let cfg = test_config(mac(0xee));
        let mut tree = ArpTree::new();
        let target: Ipv4Addr = "10.0.0.7".parse().unwrap();
        let asker: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let mut last_reply = None;
        for when in [0, 1000, 2000, 3100] {
            let bytes = build_who_has(target, asker, mac(1));
            let frame = EthernetFrame::parse(&bytes).unwrap();
            let (_, reply) = handle_frame(&cfg, &mut tree, &frame, when);
            last_reply = reply;
        }
        let reply = last_reply.expect("should have claimed and replied by the 4th who-has");
        let frame = EthernetFrame::parse(&reply).unwrap();
        assert_eq!(frame.dst, mac(1));
        assert_eq!(frame.src, mac(0xee));
        let pkt = ArpPacket::parse(frame.payload).unwrap();
        assert_eq!(pkt.oper, ARP_OPER_IS_AT);
        assert_eq!(pkt.spa, target);
        assert_eq!(pkt.sha, mac(0xee));
        assert_eq!(pkt.tpa, asker);
        assert_eq!(pkt.tha, mac(1));
    }

    #[test]
    fn is_at_ethertype_falls_through_to_ip4() {
        let cfg = test_config(mac(0xee));
        let mut tree = ArpTree::new();
        let bytes = build_frame(mac(0xee), mac(1), ETHERTYPE_IPV4, &[0u8; 20]);
        let frame = EthernetFrame::parse(&bytes).unwrap();
        let (outcome, reply) = handle_frame(&cfg, &mut tree, &frame, 0);
        assert_eq!(outcome, EtherOutcome::NotArp);
        assert!(reply.is_none());
    }

    #[test]
    fn short_frame_fails_to_parse() {
        assert!(EthernetFrame::parse(&[0u8; 10]).is_none());
    }
}
