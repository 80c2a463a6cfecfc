//! ICMP echo-request responder.
//!
//! Header layout: type(1) code(1) checksum(2) id(2) seq(2) data(...). The
//! whole ICMP message (header + data) is summed on its own — unlike TCP/UDP,
//! ICMP has no pseudo-header.

use crate::ip4;
use crate::ip4::Ip4Flow;
use crate::wire::cksum;

const ICMP_HEADER_LEN: usize = 8;
const ICMP_TYPE_ECHO_REPLY: u8 = 0;
const ICMP_TYPE_ECHO_REQUEST: u8 = 8;

/// A logged ICMP outcome: `(type, code, payload_len)`, always exactly one
/// CSV record per valid packet.
pub struct IcmpLogRecord {
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub payload_len: usize,
}

/// Validate and act on an ICMP packet. Returns the record to log, and the
/// reply frame to transmit, if any.
pub fn handle(flow: &Ip4Flow, data: &[u8]) -> Option<(IcmpLogRecord, Option<Vec<u8>>)> {
    if data.len() < ICMP_HEADER_LEN {
        tracing::debug!(len = data.len(), "short ICMP packet");
        return None;
    }
    let sum = !cksum(0, data);
    if sum != 0 {
        tracing::debug!(checksum = format!("0x{:04x}", sum), "invalid ICMP checksum");
        return None;
    }

    let icmp_type = data[0];
    let code = data[1];
    let id = u16::from_be_bytes([data[4], data[5]]);
    let seq = u16::from_be_bytes([data[6], data[7]]);
    let payload = &data[ICMP_HEADER_LEN..];

    let reply = if icmp_type == ICMP_TYPE_ECHO_REQUEST {
        tracing::debug!(src = %flow.src, id, seq, "echo request");
        Some(build_echo_reply(flow, id, seq, payload))
    } else {
        tracing::trace!(icmp_type, code, "ICMP type ignored");
        None
    };

    Some((
        IcmpLogRecord {
            icmp_type,
            icmp_code: code,
            payload_len: payload.len(),
        },
        reply,
    ))
}

fn build_echo_reply(flow: &Ip4Flow, id: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut msg = vec![0u8; ICMP_HEADER_LEN + payload.len()];
    msg[0] = ICMP_TYPE_ECHO_REPLY;
    msg[1] = 0;
    msg[4..6].copy_from_slice(&id.to_be_bytes());
    msg[6..8].copy_from_slice(&seq.to_be_bytes());
    msg[ICMP_HEADER_LEN..].copy_from_slice(payload);

    let sum = cksum(0, &msg);
    msg[2..4].copy_from_slice(&(!sum).to_be_bytes());

    ip4::build_reply(flow, ip4::IP_PROTO_ICMP, &msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_flow() -> Ip4Flow {
        Ip4Flow {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            proto: ip4::IP_PROTO_ICMP,
            len: 0,
            pseudo_sum: 0,
        }
    }

    fn build_echo_request(id: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut msg = vec![0u8; ICMP_HEADER_LEN + payload.len()];
        msg[0] = ICMP_TYPE_ECHO_REQUEST;
        msg[4..6].copy_from_slice(&id.to_be_bytes());
        msg[6..8].copy_from_slice(&seq.to_be_bytes());
        msg[ICMP_HEADER_LEN..].copy_from_slice(payload);
        let sum = cksum(0, &msg);
        msg[2..4].copy_from_slice(&(!sum).to_be_bytes());
        msg
    }

    #[test]
    fn echo_request_gets_replied_with_id_seq_and_payload_preserved() {
        let flow = test_flow();
        let req = build_echo_request(0x1234, 0x5678, b"pingdata");
        let (record, reply) = handle(&flow, &req).unwrap();
        assert_eq!(record.icmp_type, ICMP_TYPE_ECHO_REQUEST);
        assert_eq!(record.payload_len, 8);

        let reply = reply.expect("echo request must produce a reply");
        // reply = ipv4 header (20) + icmp message
        let icmp = &reply[20..];
        assert_eq!(icmp[0], ICMP_TYPE_ECHO_REPLY);
        assert_eq!(&icmp[4..6], &0x1234u16.to_be_bytes());
        assert_eq!(&icmp[6..8], &0x5678u16.to_be_bytes());
        assert_eq!(&icmp[8..], b"pingdata");
        assert_eq!(cksum(0, icmp), 0);
    }

    #[test]
    fn bad_checksum_is_dropped() {
        let flow = test_flow();
        let mut req = build_echo_request(1, 1, &[]);
        req[2] ^= 0xff;
        assert!(handle(&flow, &req).is_none());
    }

    #[test]
    fn non_echo_type_logged_without_reply() {
        let flow = test_flow();
        let mut msg = vec![0u8; ICMP_HEADER_LEN];
        msg[0] = 3; // destination unreachable
        msg[1] = 1;
        let sum = cksum(0, &msg);
        msg[2..4].copy_from_slice(&(!sum).to_be_bytes());
        let (record, reply) = handle(&flow, &msg).unwrap();
        assert_eq!(record.icmp_type, 3);
        assert_eq!(record.icmp_code, 1);
        assert!(reply.is_none());
    }

    #[test]
    fn short_packet_is_dropped() {
        let flow = test_flow();
        assert!(handle(&flow, &[0u8; 4]).is_none());
    }
}
