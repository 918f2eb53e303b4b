//! Protocol trace events.
//!
//! Every node keeps a log of the decisions it makes. The simulator drains
//! these with [`Node::take_events`](crate::Node::take_events) to check
//! properties across a run; the same decisions also go to `tracing`.

use crate::interface::InterfaceKind;
use crate::packet::PacketKind;
use crate::time::Timestamp;
use crate::types::{Address, DropReason};

/// Routing decisions recorded by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    /// A route was installed or replaced.
    RouteInstalled {
        timestamp: Timestamp,
        dst: Address,
        next_hop: Address,
        iface: InterfaceKind,
        hop_count: u8,
        seq: Option<u32>,
    },
    /// A route was invalidated by an error report or a broken link.
    RouteInvalidated {
        timestamp: Timestamp,
        dst: Address,
        seq: u32,
        reason: &'static str,
    },
    /// A route reached the end of its lifetime.
    RouteExpired { timestamp: Timestamp, dst: Address },
    /// Discovery started or retried.
    RreqSent {
        timestamp: Timestamp,
        dst: Address,
        id: u32,
        ttl: u8,
        retry: u8,
    },
    /// A request already seen was ignored.
    RreqDuplicate { origin: Address, id: u32 },
    /// A request was flooded onward.
    RreqForwarded {
        timestamp: Timestamp,
        origin: Address,
        dst: Address,
        hop_count: u8,
    },
    /// A reply was not relayed: a copy at least as short already went on,
    /// or it has crossed the network diameter.
    RrepDiscarded {
        timestamp: Timestamp,
        dst: Address,
        origin: Address,
        hop_count: u8,
    },
    /// A reply was generated.
    RrepSent {
        timestamp: Timestamp,
        dst: Address,
        origin: Address,
        hop_count: u8,
        intermediate: bool,
    },
    /// A reply completed our own discovery.
    DiscoveryComplete {
        timestamp: Timestamp,
        dst: Address,
        hop_count: u8,
        flushed: usize,
    },
    /// Discovery gave up.
    DiscoveryFailed {
        timestamp: Timestamp,
        dst: Address,
        dropped: usize,
    },
    /// An error report went out.
    RerrSent {
        timestamp: Timestamp,
        destinations: usize,
    },
    /// A control packet was replayed through the wormhole.
    TunnelReplay {
        timestamp: Timestamp,
        kind: PacketKind,
        hop_count: u8,
        peers: usize,
    },
    /// A data packet was discarded here.
    PacketDropped {
        timestamp: Timestamp,
        uid: u64,
        reason: DropReason,
    },
}
