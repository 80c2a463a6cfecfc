//! Per-address ARP observation lifecycle: a radix-4 tree on IPv4 address
//! whose leaves track who-has history and decide when a dark address is
//! safe to claim.
//!
//! Every non-leaf level (`plen` 0, 4, …, 28) carries aggregate `oldest` /
//! `newest` fences over its descendants so expiry can skip whole subtrees
//! that have nothing old enough to prune — the leaves themselves (`plen ==
//! 32`) carry the actual observation state. This is the tagged leaf/inner
//! variant called for in the design notes, instead of the original's
//! overlapping-union node.

use std::net::Ipv4Addr;

use crate::config::{ARP_EXPIRE, ARP_MINREQ, ARP_NEVER, ARP_STALE, ARP_TIMEOUT};
use crate::wire::EtherAddr;

const SUBS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(u32);

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf {
        /// Start of the current observation window, or `ARP_NEVER` if the
        /// address has never been the subject of a who-has.
        first: u64,
        last: u64,
        nreq: u32,
        ether: Option<EtherAddr>,
        claimed: bool,
        reserved: bool,
    },
    Inner {
        oldest: u64,
        newest: u64,
        sub: [Option<NodeId>; SUBS],
    },
}

#[derive(Debug, Clone)]
struct Node {
    addr: u32,
    plen: u8,
    kind: NodeKind,
}

impl Node {
    fn new_inner(addr: u32, plen: u8) -> Node {
        Node {
            addr,
            plen,
            kind: NodeKind::Inner {
                oldest: ARP_NEVER,
                newest: 0,
                sub: [None; SUBS],
            },
        }
    }

    fn new_leaf(addr: u32) -> Node {
        Node {
            addr,
            plen: 32,
            kind: NodeKind::Leaf {
                first: ARP_NEVER,
                last: 0,
                nreq: 0,
                ether: None,
                claimed: false,
                reserved: false,
            },
        }
    }

    /// The node's "oldest" fence: `first` for a leaf, `oldest` for inner.
    fn age_min(&self) -> u64 {
        match self.kind {
            NodeKind::Leaf { first, .. } => first,
            NodeKind::Inner { oldest, .. } => oldest,
        }
    }

    /// The node's "newest" fence: `last` for a leaf, `newest` for inner.
    fn age_max(&self) -> u64 {
        match self.kind {
            NodeKind::Leaf { last, .. } => last,
            NodeKind::Inner { newest, .. } => newest,
        }
    }
}

/// The result of feeding a who-has observation through the claim engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhoHasAction {
    /// No reply: still counting, reserved, or out of bounds.
    None,
    /// Send (or refresh) an is-at reply for this address.
    SendIsAt,
}

/// A radix-4 tree of ARP observation state, keyed on IPv4 address.
pub struct ArpTree {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
}

impl Default for ArpTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ArpTree {
    const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        ArpTree {
            nodes: vec![Node::new_inner(0, 0)],
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.0 as usize] = node;
            id
        } else {
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(node);
            id
        }
    }

    /// Walk to the leaf for `addr`, creating inner nodes and the leaf itself
    /// on demand. Structural only — never touches timestamps.
    fn get_or_create_leaf(&mut self, addr: u32) -> NodeId {
        let mut id = Self::ROOT;
        loop {
            let plen = self.nodes[id.0 as usize].plen;
            if plen == 32 {
                return id;
            }
            let splen = plen as u32 + 4;
            let sub = ((addr >> (32 - splen)) as usize) % SUBS;
            let child = match &mut self.nodes[id.0 as usize].kind {
                NodeKind::Inner { sub: children, .. } => children[sub],
                NodeKind::Leaf { .. } => unreachable!(),
            };
            id = match child {
                Some(child) => child,
                None => {
                    let child_addr = self.nodes[id.0 as usize].addr | ((sub as u32) << (32 - splen));
                    let new_node = if splen == 32 {
                        Node::new_leaf(child_addr)
                    } else {
                        Node::new_inner(child_addr, splen as u8)
                    };
                    let new_id = self.alloc(new_node);
                    if let NodeKind::Inner { sub: children, .. } = &mut self.nodes[id.0 as usize].kind {
                        children[sub] = Some(new_id);
                    }
                    new_id
                }
            };
        }
    }

    fn find_leaf(&self, addr: u32) -> Option<NodeId> {
        let mut id = Self::ROOT;
        loop {
            let node = &self.nodes[id.0 as usize];
            if node.plen == 32 {
                return Some(id);
            }
            let splen = node.plen as u32 + 4;
            let sub = ((addr >> (32 - splen)) as usize) % SUBS;
            match &node.kind {
                NodeKind::Inner { sub: children, .. } => match children[sub] {
                    Some(child) => id = child,
                    None => return None,
                },
                NodeKind::Leaf { .. } => unreachable!(),
            }
        }
    }

    /// Recompute every ancestor's `oldest`/`newest` fence along the path to
    /// `addr` from the fences/timestamps of its immediate children.
    fn refresh_fences(&mut self, addr: u32) {
        let mut path = vec![Self::ROOT];
        loop {
            let node = &self.nodes[path.last().unwrap().0 as usize];
            if node.plen == 32 {
                break;
            }
            let splen = node.plen as u32 + 4;
            let sub = ((addr >> (32 - splen)) as usize) % SUBS;
            let child = match &node.kind {
                NodeKind::Inner { sub: children, .. } => children[sub],
                NodeKind::Leaf { .. } => unreachable!(),
            };
            match child {
                Some(child) => path.push(child),
                None => break,
            }
        }
        // Skip the leaf itself; recompute every inner ancestor bottom-up.
        for id in path.iter().rev().skip(1) {
            self.recompute_fences(*id);
        }
    }

    fn recompute_fences(&mut self, id: NodeId) {
        let children = match &self.nodes[id.0 as usize].kind {
            NodeKind::Inner { sub, .. } => *sub,
            NodeKind::Leaf { .. } => return,
        };
        let mut oldest = ARP_NEVER;
        let mut newest = 0u64;
        for child in children.into_iter().flatten() {
            let c = &self.nodes[child.0 as usize];
            oldest = oldest.min(c.age_min());
            newest = newest.max(c.age_max());
        }
        if let NodeKind::Inner {
            oldest: o, newest: n, ..
        } = &mut self.nodes[id.0 as usize].kind
        {
            *o = oldest;
            *n = newest;
        }
    }

    /// Record that `addr` is at `mac` as of `when`; resets the observation
    /// counter regardless of whether the mapping changed.
    pub fn register(&mut self, addr: Ipv4Addr, mac: EtherAddr, when: u64) {
        let id = self.get_or_create_leaf(u32::from(addr));
        if let NodeKind::Leaf { ether, nreq, .. } = &mut self.nodes[id.0 as usize].kind {
            match *ether {
                Some(old) if old != mac => {
                    tracing::warn!(%addr, from = %old, to = %mac, "address moved");
                }
                None => {
                    tracing::debug!(%addr, mac = %mac, "address registered");
                }
                _ => {}
            }
            *ether = Some(mac);
            *nreq = 0;
        }
        let _ = when;
    }

    /// Look up the last-observed Ethernet address for `addr`.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<EtherAddr> {
        let id = self.find_leaf(u32::from(addr))?;
        match self.nodes[id.0 as usize].kind {
            NodeKind::Leaf { ether, .. } => ether,
            NodeKind::Inner { .. } => None,
        }
    }

    /// Mark `addr` as reserved: it will never be claimed.
    pub fn reserve(&mut self, addr: Ipv4Addr) {
        let id = self.get_or_create_leaf(u32::from(addr));
        if let NodeKind::Leaf { reserved, .. } = &mut self.nodes[id.0 as usize].kind {
            *reserved = true;
        }
    }

    /// Is `claimed` true for `addr`? Exposed mainly for tests/telemetry.
    pub fn is_claimed(&self, addr: Ipv4Addr) -> bool {
        match self.find_leaf(u32::from(addr)) {
            Some(id) => matches!(self.nodes[id.0 as usize].kind, NodeKind::Leaf { claimed: true, .. }),
            None => false,
        }
    }

    /// Feed an observed who-has for `addr` at `when` through the claim state
    /// machine (§4.C steps 3-9), then run the expiry short-circuit check.
    ///
    /// The caller is responsible for the `dst_set` filter (step 1) and for
    /// registering the sender (step 2) before calling this.
    pub fn on_who_has(&mut self, addr: Ipv4Addr, when: u64) -> WhoHasAction {
        let id = self.get_or_create_leaf(u32::from(addr));
        let action = {
            let kind = &mut self.nodes[id.0 as usize].kind;
            let NodeKind::Leaf {
                first,
                last,
                nreq,
                claimed,
                reserved,
                ..
            } = kind
            else {
                unreachable!()
            };

            if *first == ARP_NEVER {
                *first = when;
            }

            let action = if *reserved {
                *nreq = 0;
                WhoHasAction::None
            } else if *claimed {
                *nreq = 0;
                WhoHasAction::SendIsAt
            } else if *nreq == 0 || when.saturating_sub(*last) >= ARP_STALE {
                *nreq = 1;
                *first = when;
                WhoHasAction::None
            } else if *nreq >= ARP_MINREQ && when.saturating_sub(*first) >= ARP_TIMEOUT {
                *claimed = true;
                *nreq = 0;
                tracing::info!(%addr, "claiming dark address");
                WhoHasAction::SendIsAt
            } else {
                *nreq += 1;
                WhoHasAction::None
            };

            // Every observation refreshes `last`, mirroring the original's
            // unconditional `n->last = when` in `arp_insert` before the claim
            // logic runs — otherwise the stale check measures the gap from
            // a fresh leaf's `last = 0` instead of from the prior observation,
            // and a claimed leaf's `last` never advances so expiry prunes it
            // ARP_EXPIRE after the claim instant regardless of later traffic.
            *last = when;

            action
        };

        self.refresh_fences(u32::from(addr));
        self.maybe_expire(when);
        action
    }

    fn maybe_expire(&mut self, when: u64) {
        let root_oldest = match self.nodes[Self::ROOT.0 as usize].kind {
            NodeKind::Inner { oldest, .. } => oldest,
            NodeKind::Leaf { .. } => unreachable!(),
        };
        let cutoff = when.saturating_sub(ARP_EXPIRE);
        if root_oldest < cutoff {
            self.expire_at(Self::ROOT, cutoff);
        }
    }

    /// Sweep the tree, removing nodes whose `newest` (leaf: `last`) predates
    /// `now - ARP_EXPIRE`, refreshing inner fences bottom-up as it goes.
    pub fn periodic(&mut self, now: u64) {
        self.expire_at(Self::ROOT, now.saturating_sub(ARP_EXPIRE));
    }

    fn expire_at(&mut self, id: NodeId, cutoff: u64) {
        let children = match &self.nodes[id.0 as usize].kind {
            NodeKind::Inner { sub, .. } => *sub,
            NodeKind::Leaf { .. } => return,
        };

        let mut oldest = ARP_NEVER;
        let mut newest = 0u64;

        let mut new_children = children;
        for slot in new_children.iter_mut() {
            let Some(child) = *slot else { continue };
            let is_inner = matches!(self.nodes[child.0 as usize].kind, NodeKind::Inner { .. });
            if is_inner && self.nodes[child.0 as usize].age_min() < cutoff {
                self.expire_at(child, cutoff);
            }
            if self.nodes[child.0 as usize].age_max() < cutoff {
                self.free_subtree(child);
                *slot = None;
                continue;
            }
            let c = &self.nodes[child.0 as usize];
            oldest = oldest.min(c.age_min());
            newest = newest.max(c.age_max());
        }

        if let NodeKind::Inner {
            oldest: o,
            newest: n,
            sub,
        } = &mut self.nodes[id.0 as usize].kind
        {
            *o = oldest;
            *n = newest;
            *sub = new_children;
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        if let NodeKind::Inner { sub, .. } = self.nodes[id.0 as usize].kind {
            for child in sub.into_iter().flatten() {
                self.free_subtree(child);
            }
        }
        self.free.push(id);
    }
}
