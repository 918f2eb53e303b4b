//! Packets and link-layer frames.
//!
//! Packets stay structured for their whole life in the simulator; only their
//! on-air size is modeled. [`Frame::size`] adds the IPv4 and UDP headers to the
//! body so that airtime matches a real stack.

use crate::time::Duration;
use crate::types::{
    Address, IPV4_HEADER_SIZE, RERR_BASE_SIZE, RERR_ENTRY_SIZE, RREP_SIZE, RREQ_SIZE,
    UDP_HEADER_SIZE,
};

/// Route request, flooded toward an unknown destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rreq {
    /// Hops from the originator to the node handling the request.
    pub hop_count: u8,
    /// Per-originator request id used for flood dedup.
    pub id: u32,
    /// Destination being searched for.
    pub dst: Address,
    /// Last known destination sequence number.
    pub dst_seq: u32,
    /// Set when no destination sequence number is known.
    pub unknown_seq: bool,
    /// Node that started the discovery.
    pub origin: Address,
    /// Originator's own sequence number.
    pub origin_seq: u32,
    /// Ask intermediate repliers to also notify the destination.
    pub gratuitous: bool,
    /// Only the destination may answer.
    pub destination_only: bool,
}

/// Route reply, unicast back along the reverse path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rrep {
    /// Hops from the replying node's view of `dst` to the node handling the reply.
    pub hop_count: u8,
    pub dst: Address,
    pub dst_seq: u32,
    /// Node that asked for the route.
    pub origin: Address,
    /// How long the advertised route stays valid.
    pub lifetime: Duration,
}

/// Route error listing destinations that became unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rerr {
    pub unreachable: Vec<(Address, u32)>,
}

/// Application datagram carried hop by hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Simulation-wide unique id, stable across hops.
    pub uid: u64,
    pub src: Address,
    pub dst: Address,
    pub src_port: u16,
    pub dst_port: u16,
    /// Application payload size in bytes.
    pub payload_size: u32,
}

/// Closed set of packets the routing layer understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rreq(Rreq),
    Rrep(Rrep),
    Rerr(Rerr),
    Data(DataPacket),
}

/// Packet discriminant, used by traces and metrics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    Rreq,
    Rrep,
    Rerr,
    Data,
}

impl PacketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PacketKind::Rreq => "RREQ",
            PacketKind::Rrep => "RREP",
            PacketKind::Rerr => "RERR",
            PacketKind::Data => "DATA",
        }
    }

    pub fn is_control(self) -> bool {
        !matches!(self, PacketKind::Data)
    }
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Rreq(_) => PacketKind::Rreq,
            Packet::Rrep(_) => PacketKind::Rrep,
            Packet::Rerr(_) => PacketKind::Rerr,
            Packet::Data(_) => PacketKind::Data,
        }
    }

    /// Body size in bytes, excluding IP and UDP headers.
    pub fn body_size(&self) -> u32 {
        match self {
            Packet::Rreq(_) => RREQ_SIZE,
            Packet::Rrep(_) => RREP_SIZE,
            Packet::Rerr(rerr) => RERR_BASE_SIZE + RERR_ENTRY_SIZE * rerr.unreachable.len() as u32,
            Packet::Data(data) => data.payload_size,
        }
    }

    pub fn as_data(&self) -> Option<&DataPacket> {
        match self {
            Packet::Data(data) => Some(data),
            _ => None,
        }
    }
}

/// Link-layer destination of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkDest {
    Broadcast,
    Unicast(Address),
}

/// A packet in flight between two interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Address of the transmitting interface.
    pub sender: Address,
    pub receiver: LinkDest,
    /// IP time-to-live; bounds the flood radius of route requests.
    pub ttl: u8,
    pub packet: Packet,
}

impl Frame {
    pub fn broadcast(sender: Address, ttl: u8, packet: Packet) -> Self {
        Self {
            sender,
            receiver: LinkDest::Broadcast,
            ttl,
            packet,
        }
    }

    pub fn unicast(sender: Address, to: Address, ttl: u8, packet: Packet) -> Self {
        Self {
            sender,
            receiver: LinkDest::Unicast(to),
            ttl,
            packet,
        }
    }

    /// On-air size in bytes.
    pub fn size(&self) -> u32 {
        IPV4_HEADER_SIZE + UDP_HEADER_SIZE + self.packet.body_size()
    }

    pub fn kind(&self) -> PacketKind {
        self.packet.kind()
    }

    /// Unicast next hop, if any.
    pub fn next_hop(&self) -> Option<Address> {
        match self.receiver {
            LinkDest::Unicast(addr) => Some(addr),
            LinkDest::Broadcast => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn data(size: u32) -> Packet {
        Packet::Data(DataPacket {
            uid: 1,
            src: Ipv4Addr::new(10, 1, 1, 2),
            dst: Ipv4Addr::new(10, 1, 1, 5),
            src_port: 49153,
            dst_port: 9,
            payload_size: size,
        })
    }

    #[test]
    fn test_frame_size_includes_headers() {
        let frame = Frame::broadcast(Ipv4Addr::new(10, 1, 1, 2), 1, data(1024));
        assert_eq!(frame.size(), 1052);
        assert_eq!(frame.kind(), PacketKind::Data);
        assert_eq!(frame.next_hop(), None);
    }

    #[test]
    fn test_rerr_size_grows_with_entries() {
        let rerr = Packet::Rerr(Rerr {
            unreachable: vec![
                (Ipv4Addr::new(10, 1, 1, 3), 4),
                (Ipv4Addr::new(10, 1, 1, 4), 9),
            ],
        });
        assert_eq!(rerr.body_size(), 20);
        assert!(rerr.kind().is_control());
    }
}
