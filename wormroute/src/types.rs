//! Core types and constants for the routing protocol.

use core::cmp::Ordering;
use std::net::Ipv4Addr;

/// Index of a node in the simulated network.
pub type NodeId = usize;

/// Network-layer address of an interface.
pub type Address = Ipv4Addr;

/// Link-layer broadcast address.
pub const BROADCAST: Address = Ipv4Addr::BROADCAST;

// Header sizes in bytes
pub const IPV4_HEADER_SIZE: u32 = 20;
pub const UDP_HEADER_SIZE: u32 = 8;

// Control message body sizes (type octet included)
pub const RREQ_SIZE: u32 = 24;
pub const RREP_SIZE: u32 = 20;
pub const RERR_BASE_SIZE: u32 = 4;
pub const RERR_ENTRY_SIZE: u32 = 8;

/// Routing protocol UDP port.
pub const AODV_PORT: u16 = 654;

/// Initial IP TTL for data packets.
pub const DEFAULT_DATA_TTL: u8 = 64;

// Address plan: one /24 for the radio, one for the tunnel.
const WIRELESS_NET: [u8; 3] = [10, 1, 1];
const TUNNEL_NET: [u8; 3] = [10, 1, 2];

/// Largest host index that fits the /24 address plan.
pub const MAX_HOSTS: usize = 254;

/// Wireless interface address of node `id`: `10.1.1.(id + 1)`.
///
/// Returns `None` when the id does not fit the address plan.
pub fn wireless_address(id: NodeId) -> Option<Address> {
    host_address(WIRELESS_NET, id)
}

/// Tunnel interface address of the `index`-th tunnel endpoint: `10.1.2.(index + 1)`.
pub fn tunnel_address(index: usize) -> Option<Address> {
    host_address(TUNNEL_NET, index)
}

fn host_address(net: [u8; 3], index: usize) -> Option<Address> {
    if index >= MAX_HOSTS {
        return None;
    }
    Some(Ipv4Addr::new(net[0], net[1], net[2], index as u8 + 1))
}

/// Recover the node id from a wireless interface address.
pub fn node_of_wireless(addr: Address) -> Option<NodeId> {
    let o = addr.octets();
    if o[..3] == WIRELESS_NET && o[3] != 0 && o[3] != 255 {
        Some(o[3] as usize - 1)
    } else {
        None
    }
}

/// Compare two destination sequence numbers with 32-bit wraparound.
///
/// `Greater` means `a` is fresher than `b`.
pub fn seq_cmp(a: u32, b: u32) -> Ordering {
    (a.wrapping_sub(b) as i32).cmp(&0)
}

/// Whether sequence number `a` is strictly fresher than `b`.
#[inline]
pub fn seq_newer(a: u32, b: u32) -> bool {
    seq_cmp(a, b) == Ordering::Greater
}

/// Why a data packet did not reach its destination.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// An intermediate node had no valid route.
    NoRoute,
    /// IP TTL reached zero.
    TtlExpired,
    /// Route discovery exhausted its retries.
    DestinationUnreachable,
    /// The discovery buffer was full.
    QueueFull,
    /// The packet waited in the discovery buffer too long.
    QueueTimeout,
    /// The next hop could not be reached.
    LinkFailure,
    /// A wormhole endpoint discarded the packet.
    WormholeDrop,
    /// The flow monitor gave up waiting for the packet.
    Timeout,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::NoRoute => "no_route",
            DropReason::TtlExpired => "ttl_expired",
            DropReason::DestinationUnreachable => "destination_unreachable",
            DropReason::QueueFull => "queue_full",
            DropReason::QueueTimeout => "queue_timeout",
            DropReason::LinkFailure => "link_failure",
            DropReason::WormholeDrop => "wormhole_drop",
            DropReason::Timeout => "timeout",
        }
    }
}

impl core::fmt::Display for DropReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
