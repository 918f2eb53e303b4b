//! Data forwarding and route maintenance.
//!
//! Broken routes are detected two ways: a neighbor reports them with a route
//! error, or the link layer tells us a unicast to the next hop failed. Either
//! way the affected routes are invalidated (bumping their sequence number)
//! and, when someone upstream depends on them, an error is broadcast.

use crate::interface::InterfaceKind;
use crate::node::{Node, Output, QueuedPacket, CONTROL_TTL};
use crate::packet::{DataPacket, Frame, Packet, Rerr};
use crate::table::Invalidated;
use crate::time::{Duration, Timestamp};
use crate::trace::RouteEvent;
use crate::types::{Address, DropReason, DEFAULT_DATA_TTL};

impl Node {
    /// Originate a data packet from this node.
    ///
    /// Without a usable route the packet is buffered and discovery starts.
    pub fn send_data(&mut self, packet: DataPacket, now: Timestamp) {
        self.purge(now);

        if self.owns(packet.dst) {
            self.emit(Output::Deliver { packet });
            return;
        }

        if self.table.lookup(packet.dst, now).is_some() {
            self.route_data(packet, DEFAULT_DATA_TTL, now);
            return;
        }

        let dst = packet.dst;
        self.enqueue(packet, now);
        self.start_discovery(dst, now);
    }

    fn enqueue(&mut self, packet: DataPacket, now: Timestamp) {
        if self.queue.len() >= self.config().max_queue_len {
            if let Some(oldest) = self.queue.pop_front() {
                self.fail_delivery(oldest.packet, DropReason::QueueFull, now);
            }
        }
        self.queue.push_back(QueuedPacket {
            packet,
            enqueued: now,
        });
    }

    /// Hand a data packet to the next hop of its route.
    ///
    /// Returns false, leaving the packet untouched, when no usable route exists.
    pub(crate) fn route_data(&mut self, packet: DataPacket, ttl: u8, now: Timestamp) -> bool {
        let Some(route) = self.table.lookup(packet.dst, now) else {
            return false;
        };
        let (next_hop, iface) = (route.next_hop, route.iface);

        let lifetime = self.config().active_route_timeout;
        self.table.refresh(packet.dst, lifetime, now);
        self.table.refresh(next_hop, lifetime, now);

        match iface {
            InterfaceKind::Tunnel => self.tunnel_data(packet, ttl, next_hop, now),
            InterfaceKind::Wireless => {
                let frame = Frame::unicast(self.address(), next_hop, ttl, Packet::Data(packet));
                self.emit(Output::Transmit {
                    iface,
                    frame,
                    delay: Duration::ZERO,
                });
            }
        }
        true
    }

    pub(crate) fn handle_data(&mut self, packet: DataPacket, ttl: u8, now: Timestamp) {
        let lifetime = self.config().active_route_timeout;

        if self.owns(packet.dst) {
            self.table.refresh(packet.src, lifetime, now);
            self.emit(Output::Deliver { packet });
            return;
        }

        if ttl <= 1 {
            self.drop_packet(packet, DropReason::TtlExpired, now);
            return;
        }

        self.table.refresh(packet.src, lifetime, now);

        if self.table.lookup(packet.dst, now).is_none() {
            let dst = packet.dst;
            let seq = self.table.get(dst).and_then(|e| e.seq).unwrap_or(0);
            self.drop_packet(packet, DropReason::NoRoute, now);
            self.send_rerr(vec![(dst, seq)], now);
            return;
        }

        self.route_data(packet, ttl - 1, now);
    }

    pub(crate) fn handle_rerr(&mut self, rerr: Rerr, sender: Address, now: Timestamp) {
        let broken = self
            .table
            .invalidate_reported(sender, &rerr.unreachable, now);
        self.propagate_breakage(broken, "route error", now);
    }

    /// The link layer could not deliver `frame` to its next hop.
    pub fn handle_link_failure(&mut self, frame: Frame, now: Timestamp) {
        self.purge(now);

        let Some(next_hop) = frame.next_hop() else {
            return;
        };
        tracing::debug!(node = self.id(), next_hop = %next_hop, kind = frame.kind().as_str(), "link failure");

        let broken = self.table.invalidate_next_hop(next_hop, now);
        self.propagate_breakage(broken, "link failure", now);

        if let Packet::Data(packet) = frame.packet {
            if self.owns(packet.src) {
                // our own packet: look for another way
                let dst = packet.dst;
                self.enqueue(packet, now);
                self.start_discovery(dst, now);
            } else {
                self.drop_packet(packet, DropReason::LinkFailure, now);
            }
        }
    }

    fn propagate_breakage(&mut self, broken: Vec<Invalidated>, reason: &'static str, now: Timestamp) {
        let mut report = Vec::new();
        for inv in broken {
            tracing::trace!(node = self.id(), dst = %inv.dst, seq = inv.seq, reason, "route invalidated");
            self.record(RouteEvent::RouteInvalidated {
                timestamp: now,
                dst: inv.dst,
                seq: inv.seq,
                reason,
            });
            if inv.had_precursors {
                report.push((inv.dst, inv.seq));
            }
        }
        if !report.is_empty() {
            self.send_rerr(report, now);
        }
    }

    fn send_rerr(&mut self, unreachable: Vec<(Address, u32)>, now: Timestamp) {
        self.record(RouteEvent::RerrSent {
            timestamp: now,
            destinations: unreachable.len(),
        });
        self.broadcast(Packet::Rerr(Rerr { unreachable }), CONTROL_TTL);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AodvConfig;
    use crate::interface::InterfaceKind;
    use crate::node::{Node, Output, RouteState};
    use crate::packet::{DataPacket, Frame, LinkDest, Packet, Rerr};
    use crate::table::RouteUpdate;
    use crate::time::{Duration, Timestamp};
    use crate::types::{wireless_address, Address, DropReason, NodeId};

    fn addr(id: NodeId) -> Address {
        wireless_address(id).unwrap()
    }

    fn data(uid: u64, src: NodeId, dst: NodeId) -> DataPacket {
        DataPacket {
            uid,
            src: addr(src),
            dst: addr(dst),
            src_port: 49153,
            dst_port: 9,
            payload_size: 512,
        }
    }

    fn route(dst: NodeId, next: NodeId, hops: u8) -> RouteUpdate {
        RouteUpdate {
            dst: addr(dst),
            next_hop: addr(next),
            iface: InterfaceKind::Wireless,
            hop_count: hops,
            seq: Some(3),
            lifetime: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_forward_along_route_decrements_ttl() {
        let mut node = Node::new(3, AodvConfig::deterministic(), 1);
        let now = Timestamp::from_secs(2);
        node.install(route(6, 5, 2), now);

        let frame = Frame::unicast(addr(2), addr(3), 64, Packet::Data(data(1, 1, 6)));
        node.handle_frame(frame, InterfaceKind::Wireless, now);

        match node.take_outputs().as_slice() {
            [Output::Transmit { frame, .. }] => {
                assert_eq!(frame.receiver, LinkDest::Unicast(addr(5)));
                assert_eq!(frame.ttl, 63);
                assert_eq!(frame.sender, addr(3));
            }
            other => panic!("unexpected outputs {other:?}"),
        }
    }

    #[test]
    fn test_delivery_to_destination() {
        let mut node = Node::new(6, AodvConfig::deterministic(), 1);
        let frame = Frame::unicast(addr(5), addr(6), 60, Packet::Data(data(1, 1, 6)));
        node.handle_frame(frame, InterfaceKind::Wireless, Timestamp::from_secs(2));
        assert!(matches!(
            node.take_outputs().as_slice(),
            [Output::Deliver { packet }] if packet.uid == 1
        ));
    }

    #[test]
    fn test_no_route_drops_and_reports() {
        let mut node = Node::new(3, AodvConfig::deterministic(), 1);
        let frame = Frame::unicast(addr(2), addr(3), 64, Packet::Data(data(1, 1, 9)));
        node.handle_frame(frame, InterfaceKind::Wireless, Timestamp::from_secs(2));

        let outputs = node.take_outputs();
        assert!(outputs.iter().any(|o| matches!(
            o,
            Output::Dropped {
                reason: DropReason::NoRoute,
                ..
            }
        )));
        assert!(outputs.iter().any(|o| matches!(
            o,
            Output::Transmit { frame, .. } if matches!(&frame.packet, Packet::Rerr(rerr) if rerr.unreachable[0].0 == addr(9))
        )));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut node = Node::new(3, AodvConfig::deterministic(), 1);
        let now = Timestamp::from_secs(2);
        node.install(route(6, 5, 2), now);
        let frame = Frame::unicast(addr(2), addr(3), 1, Packet::Data(data(1, 1, 6)));
        node.handle_frame(frame, InterfaceKind::Wireless, now);
        assert!(matches!(
            node.take_outputs().as_slice(),
            [Output::Dropped {
                reason: DropReason::TtlExpired,
                ..
            }]
        ));
    }

    #[test]
    fn test_link_failure_invalidates_and_reports_to_precursors() {
        let mut node = Node::new(3, AodvConfig::deterministic(), 1);
        let now = Timestamp::from_secs(2);
        node.install(route(6, 5, 2), now);
        node.table.add_precursor(addr(6), addr(2));

        let lost = Frame::unicast(addr(3), addr(5), 63, Packet::Data(data(1, 1, 6)));
        node.handle_link_failure(lost, now);

        assert_eq!(node.route_state(addr(6), now), RouteState::Expired);
        let outputs = node.take_outputs();
        let rerr = outputs.iter().find_map(|o| match o {
            Output::Transmit { frame, .. } => match &frame.packet {
                Packet::Rerr(rerr) => Some(rerr.clone()),
                _ => None,
            },
            _ => None,
        });
        assert_eq!(
            rerr,
            Some(Rerr {
                unreachable: vec![(addr(6), 4)]
            })
        );
        assert!(outputs.iter().any(|o| matches!(
            o,
            Output::Dropped {
                reason: DropReason::LinkFailure,
                ..
            }
        )));
    }

    #[test]
    fn test_link_failure_at_source_rediscovers() {
        let mut node = Node::new(1, AodvConfig::deterministic(), 1);
        let now = Timestamp::from_secs(2);
        node.install(route(6, 3, 3), now);
        node.send_data(data(1, 1, 6), now);
        let sent = node
            .take_outputs()
            .into_iter()
            .find_map(|o| match o {
                Output::Transmit { frame, .. } => Some(frame),
                _ => None,
            })
            .unwrap();

        node.handle_link_failure(sent, now + Duration::from_millis(5));
        assert_eq!(node.queue_len(), 1);
        assert_eq!(
            node.route_state(addr(6), now + Duration::from_millis(5)),
            RouteState::Discovering
        );
    }

    #[test]
    fn test_rerr_from_next_hop_invalidates() {
        let mut node = Node::new(1, AodvConfig::deterministic(), 1);
        let now = Timestamp::from_secs(2);
        node.install(route(6, 3, 3), now);
        node.install(route(7, 2, 3), now);

        let rerr = Rerr {
            unreachable: vec![(addr(6), 5), (addr(7), 5)],
        };
        node.handle_frame(
            Frame::broadcast(addr(3), 1, Packet::Rerr(rerr)),
            InterfaceKind::Wireless,
            now,
        );

        assert_eq!(node.route_state(addr(6), now), RouteState::Expired);
        assert_eq!(node.route_state(addr(7), now), RouteState::Valid);
        // no precursors, nothing to propagate
        assert!(node.take_outputs().is_empty());
    }
}
