//! Wormhole endpoint behavior.
//!
//! A wormhole endpoint is an ordinary router with a second, out-of-band
//! interface to its colluding peers. Whenever a route request or reply comes
//! in over the radio, the endpoint handles it like any honest node and also
//! replays it, unchanged, to every peer through the tunnel. Crossing the
//! tunnel adds no hop, so routes through it look shorter than they are and
//! the ordinary freshness rule picks them.
//!
//! What happens to data that then flows into the tunnel is the attacker's
//! choice, described by [`DataPolicy`].

use serde::{Deserialize, Serialize};

use crate::interface::InterfaceKind;
use crate::node::{Node, Output};
use crate::packet::{DataPacket, Frame, Packet};
use crate::time::{Duration, Timestamp};
use crate::trace::RouteEvent;
use crate::types::{Address, DropReason};

/// Treatment of data packets routed into the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPolicy {
    /// Relay faithfully.
    #[default]
    Forward,
    /// Silently discard.
    Drop,
    /// Hold each packet for the given time before relaying.
    Delay(Duration),
}

/// Immutable attack configuration of one tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WormholeAttack {
    /// This endpoint's tunnel interface address.
    pub tunnel_address: Address,
    /// Tunnel addresses of the colluding endpoints.
    pub peers: Vec<Address>,
    pub data_policy: DataPolicy,
}

impl WormholeAttack {
    pub fn new(tunnel_address: Address, peers: Vec<Address>, data_policy: DataPolicy) -> Self {
        Self {
            tunnel_address,
            peers,
            data_policy,
        }
    }
}

impl Node {
    /// Replay a control packet heard over the radio to every tunnel peer.
    ///
    /// `packet` already carries the hop count as recorded on receipt here.
    pub(crate) fn tunnel_control(&mut self, packet: &Packet, ttl: u8, now: Timestamp) {
        if !self.tunnel_up() {
            return;
        }
        let Some(attack) = self.attack() else {
            return;
        };
        let sender = attack.tunnel_address;
        let peers = attack.peers.clone();

        let (hop_count, key) = match packet {
            Packet::Rreq(rreq) => (
                rreq.hop_count,
                (packet.kind(), rreq.origin, rreq.dst, rreq.origin_seq),
            ),
            Packet::Rrep(rrep) => (
                rrep.hop_count,
                (packet.kind(), rrep.origin, rrep.dst, rrep.dst_seq),
            ),
            Packet::Rerr(_) | Packet::Data(_) => return,
        };

        // each request or reply crosses the tunnel once per endpoint
        if self.replayed.contains_key(&key) {
            return;
        }
        let expires = now + self.config().path_discovery_time;
        self.replayed.insert(key, expires);

        tracing::trace!(
            node = self.id(),
            kind = packet.kind().as_str(),
            hop_count,
            peers = peers.len(),
            "replaying control packet through tunnel"
        );
        self.record(RouteEvent::TunnelReplay {
            timestamp: now,
            kind: packet.kind(),
            hop_count,
            peers: peers.len(),
        });

        for peer in peers {
            self.emit(Output::Transmit {
                iface: InterfaceKind::Tunnel,
                frame: Frame::unicast(sender, peer, ttl, packet.clone()),
                delay: Duration::ZERO,
            });
        }
    }

    /// Send a data packet into the tunnel according to the data policy.
    pub(crate) fn tunnel_data(&mut self, packet: DataPacket, ttl: u8, next_hop: Address, now: Timestamp) {
        let (sender, policy) = match self.attack() {
            Some(attack) => (attack.tunnel_address, attack.data_policy),
            None => return,
        };

        let delay = match policy {
            DataPolicy::Forward => Duration::ZERO,
            DataPolicy::Delay(hold) => hold,
            DataPolicy::Drop => {
                tracing::debug!(
                    node = self.id(),
                    uid = packet.uid,
                    dst = %packet.dst,
                    "wormhole discarding data packet"
                );
                self.record(RouteEvent::PacketDropped {
                    timestamp: now,
                    uid: packet.uid,
                    reason: DropReason::WormholeDrop,
                });
                self.emit(Output::Dropped {
                    packet,
                    reason: DropReason::WormholeDrop,
                });
                return;
            }
        };

        self.emit(Output::Transmit {
            iface: InterfaceKind::Tunnel,
            frame: Frame::unicast(sender, next_hop, ttl, Packet::Data(packet)),
            delay,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AodvConfig;
    use crate::packet::{LinkDest, Rrep, Rreq};
    use crate::types::{tunnel_address, wireless_address};

    fn endpoint(policy: DataPolicy) -> Node {
        let attack = WormholeAttack::new(
            tunnel_address(0).unwrap(),
            vec![tunnel_address(1).unwrap()],
            policy,
        );
        Node::new(2, AodvConfig::deterministic(), 7).with_wormhole(attack)
    }

    fn rreq_from(origin: usize) -> Rreq {
        Rreq {
            hop_count: 0,
            id: 1,
            dst: wireless_address(9).unwrap(),
            dst_seq: 0,
            unknown_seq: true,
            origin: wireless_address(origin).unwrap(),
            origin_seq: 1,
            gratuitous: false,
            destination_only: false,
        }
    }

    fn tunnel_frames(outputs: &[Output]) -> Vec<&Frame> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Transmit {
                    iface: InterfaceKind::Tunnel,
                    frame,
                    ..
                } => Some(frame),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_wireless_rreq_is_replayed_with_received_hop_count() {
        let mut node = endpoint(DataPolicy::Forward);
        let sender = wireless_address(1).unwrap();
        let frame = Frame::broadcast(sender, 35, Packet::Rreq(rreq_from(1)));

        node.handle_frame(frame, InterfaceKind::Wireless, Timestamp::from_secs(2));
        let outputs = node.take_outputs();
        let replays = tunnel_frames(&outputs);
        assert_eq!(replays.len(), 1);

        let replay = replays[0];
        assert_eq!(replay.sender, tunnel_address(0).unwrap());
        assert_eq!(replay.receiver, LinkDest::Unicast(tunnel_address(1).unwrap()));
        match &replay.packet {
            Packet::Rreq(rreq) => assert_eq!(rreq.hop_count, 1),
            other => panic!("unexpected replay {other:?}"),
        }
    }

    #[test]
    fn test_tunnel_arrivals_are_not_replayed() {
        let mut node = endpoint(DataPolicy::Forward);
        let mut rreq = rreq_from(1);
        rreq.hop_count = 1;
        let frame = Frame::unicast(
            tunnel_address(1).unwrap(),
            tunnel_address(0).unwrap(),
            35,
            Packet::Rreq(rreq),
        );

        node.handle_frame(frame, InterfaceKind::Tunnel, Timestamp::from_secs(2));
        let outputs = node.take_outputs();
        assert!(tunnel_frames(&outputs).is_empty());

        // crossing the tunnel adds no hop
        let route = node.route(wireless_address(1).unwrap(), Timestamp::from_secs(2)).unwrap();
        assert_eq!(route.hop_count, 1);
        assert_eq!(route.iface, InterfaceKind::Tunnel);
    }

    fn rrep_to(origin: usize, hop_count: u8) -> Rrep {
        Rrep {
            hop_count,
            dst: wireless_address(9).unwrap(),
            dst_seq: 4,
            origin: wireless_address(origin).unwrap(),
            lifetime: Duration::from_secs(6),
        }
    }

    fn wireless_unicasts(outputs: &[Output]) -> usize {
        outputs
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    Output::Transmit {
                        iface: InterfaceKind::Wireless,
                        frame: Frame {
                            receiver: LinkDest::Unicast(_),
                            ..
                        },
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn test_reply_crosses_tunnel_once() {
        let mut node = endpoint(DataPolicy::Forward);
        let now = Timestamp::from_secs(2);
        let me = wireless_address(2).unwrap();

        // reverse route to node 0 through node 1
        let flood = Frame::broadcast(wireless_address(1).unwrap(), 35, Packet::Rreq(rreq_from(0)));
        node.handle_frame(flood, InterfaceKind::Wireless, now);
        node.take_outputs();

        let reply = |hops| Frame::unicast(wireless_address(3).unwrap(), me, 35, Packet::Rrep(rrep_to(0, hops)));

        node.handle_frame(reply(3), InterfaceKind::Wireless, now);
        let outputs = node.take_outputs();
        assert_eq!(tunnel_frames(&outputs).len(), 1);
        assert_eq!(wireless_unicasts(&outputs), 1);

        // an identical copy goes nowhere
        node.handle_frame(reply(3), InterfaceKind::Wireless, now);
        assert!(node.take_outputs().is_empty());
        assert!(node
            .take_events()
            .iter()
            .any(|e| matches!(e, RouteEvent::RrepDiscarded { hop_count: 4, .. })));

        // a shorter copy is relayed but not replayed again
        node.handle_frame(reply(1), InterfaceKind::Wireless, now);
        let outputs = node.take_outputs();
        assert!(tunnel_frames(&outputs).is_empty());
        assert_eq!(wireless_unicasts(&outputs), 1);
    }

    #[test]
    fn test_reply_past_network_diameter_is_discarded() {
        let mut node = endpoint(DataPolicy::Forward);
        let now = Timestamp::from_secs(2);
        let diameter = node.config().net_diameter;
        let frame = Frame::unicast(
            wireless_address(3).unwrap(),
            wireless_address(2).unwrap(),
            35,
            Packet::Rrep(rrep_to(0, diameter - 1)),
        );

        node.handle_frame(frame, InterfaceKind::Wireless, now);
        assert!(node.take_outputs().is_empty());
        assert!(node.route(wireless_address(9).unwrap(), now).is_none());
    }

    #[test]
    fn test_disabled_tunnel_behaves_honestly() {
        let mut node = endpoint(DataPolicy::Forward);
        node.set_tunnel_link(false);
        let frame = Frame::broadcast(
            wireless_address(1).unwrap(),
            35,
            Packet::Rreq(rreq_from(1)),
        );

        node.handle_frame(frame, InterfaceKind::Wireless, Timestamp::from_secs(2));
        let outputs = node.take_outputs();
        assert!(tunnel_frames(&outputs).is_empty());
    }

    #[test]
    fn test_drop_policy_discards_data() {
        let mut node = endpoint(DataPolicy::Drop);
        let packet = DataPacket {
            uid: 11,
            src: wireless_address(1).unwrap(),
            dst: wireless_address(9).unwrap(),
            src_port: 49153,
            dst_port: 9,
            payload_size: 1024,
        };
        node.tunnel_data(packet, 63, tunnel_address(1).unwrap(), Timestamp::from_secs(3));

        let outputs = node.take_outputs();
        assert!(matches!(
            outputs.as_slice(),
            [Output::Dropped {
                reason: DropReason::WormholeDrop,
                ..
            }]
        ));
    }

    #[test]
    fn test_delay_policy_holds_data() {
        let mut node = endpoint(DataPolicy::Delay(Duration::from_millis(50)));
        let packet = DataPacket {
            uid: 12,
            src: wireless_address(1).unwrap(),
            dst: wireless_address(9).unwrap(),
            src_port: 49153,
            dst_port: 9,
            payload_size: 64,
        };
        node.tunnel_data(packet, 63, tunnel_address(1).unwrap(), Timestamp::from_secs(3));

        match node.take_outputs().as_slice() {
            [Output::Transmit { iface, delay, .. }] => {
                assert_eq!(*iface, InterfaceKind::Tunnel);
                assert_eq!(*delay, Duration::from_millis(50));
            }
            other => panic!("unexpected outputs {other:?}"),
        }
    }
}
