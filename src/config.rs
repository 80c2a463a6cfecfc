//! Centralized runtime constants and the assembled sensor configuration.
//!
//! All tunable timing thresholds are collected here so they can be found and
//! adjusted in a single place rather than scattered across modules, matching
//! how the ARP claim engine's constants were centralized in the source this
//! was distilled from.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::ip4set::Ip4Set;
use crate::wire::EtherAddr;

/// Sentinel "never seen" value for the ARP claim engine's leaf timestamps.
pub const ARP_NEVER: u64 = u64::MAX;

/// Unanswered who-has observations required before an address may be claimed.
pub const ARP_MINREQ: u32 = 3;

/// Minimum span (ms) the `ARP_MINREQ` observations must cover before claiming.
pub const ARP_TIMEOUT: u64 = 3_000;

/// Gap (ms) after which an in-progress observation window is considered stale
/// and restarted from scratch.
pub const ARP_STALE: u64 = 30_000;

/// Age (ms) after which an address-tree node is pruned during expiry.
pub const ARP_EXPIRE: u64 = 300_000;

/// The TCP honeypot's single fixed outbound sequence number (§4.G).
///
/// Without per-connection state we cannot track our own sequence space, so
/// every outbound segment reuses this constant; the peer still makes
/// progress because we faithfully acknowledge theirs.
pub const TCP4_FIXED_SEQ: u32 = 0x1811_0902;

/// Fully assembled runtime configuration, built once at startup from parsed
/// CLI flags and never mutated afterward.
pub struct Config {
    pub interface: String,
    pub dry_run: bool,
    pub foreground: bool,
    pub debug: bool,
    pub verbose: bool,
    pub csv_path: Option<PathBuf>,
    pub pid_path: Option<PathBuf>,
    pub our_ether: EtherAddr,
    /// Destination addresses the sensor will claim / respond for; `None`
    /// means unfiltered (accept every destination), matching the original's
    /// `if (dst_set && !ip4s_lookup(...))` guard — an operator who never
    /// passes `-i`/`-x` gets the original's claim-everything default rather
    /// than an inert sensor.
    pub dst_set: Option<Ip4Set>,
    /// Optional source-address filter; `None` means unfiltered.
    pub src_set: Option<Ip4Set>,
}

impl Config {
    /// Is `addr` within the destination set this sensor is responsible for
    /// (or is there no filter configured)?
    pub fn accepts_dst(&self, addr: Ipv4Addr) -> bool {
        match &self.dst_set {
            Some(set) => set.lookup(addr),
            None => true,
        }
    }

    /// Is `addr` within the optional source filter (or is there no filter)?
    pub fn accepts_src(&self, addr: Ipv4Addr) -> bool {
        match &self.src_set {
            Some(set) => set.lookup(addr),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_threshold_requires_a_window_longer_than_a_single_stale_reset() {
        // ARP_TIMEOUT must be reachable without first tripping ARP_STALE,
        // or a leaf could never accumulate ARP_MINREQ observations within
        // one window.
        assert!(ARP_TIMEOUT < ARP_STALE);
    }

    #[test]
    fn expire_is_well_after_stale() {
        assert!(ARP_EXPIRE > ARP_STALE);
    }

    #[test]
    fn unset_dst_set_accepts_every_destination() {
        let cfg = Config {
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
        };
        assert!(cfg.accepts_dst("192.0.2.1".parse().unwrap()));
        assert!(cfg.accepts_dst("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn configured_dst_set_filters_non_members() {
        let mut set = Ip4Set::new();
        set.insert("10.0.0.0".parse().unwrap(), "10.0.0.255".parse().unwrap());
        let cfg = Config {
            interface: "test0".into(),
            dry_run: false,
            foreground: true,
            debug: false,
            verbose: false,
            csv_path: None,
            pid_path: None,
            our_ether: EtherAddr([0; 6]),
            dst_set: Some(set),
            src_set: None,
        };
        assert!(cfg.accepts_dst("10.0.0.5".parse().unwrap()));
        assert!(!cfg.accepts_dst("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn all_timing_constants_positive() {
        assert!(ARP_MINREQ > 0);
        assert!(ARP_TIMEOUT > 0);
        assert!(ARP_STALE > 0);
        assert!(ARP_EXPIRE > 0);
    }
}
