//! Node implementation - the routing state machine.
//!
//! A [`Node`] owns every piece of routing state for one simulated host:
//! - its interfaces (one radio, at most one wormhole tunnel);
//! - the route table, pending discoveries and the discovery buffer;
//! - its own sequence number and request id counter.
//!
//! It is fully event-driven and never touches the network or the clock
//! directly. The driver calls a handler ([`Node::handle_frame`],
//! [`Node::handle_timer`], [`Node::send_data`], [`Node::handle_link_failure`])
//! with the current time and then drains [`Node::take_outputs`], applying each
//! [`Output`] itself. Protocol handlers live in `discovery`, `forwarding` and
//! `wormhole`.
//!
//! # Usage
//!
//! ```
//! use wormroute::{AodvConfig, Node, Output, Timestamp};
//! use wormroute::packet::DataPacket;
//!
//! let mut node = Node::new(1, AodvConfig::default(), 42);
//! let packet = DataPacket {
//!     uid: 1,
//!     src: node.address(),
//!     dst: "10.1.1.5".parse().unwrap(),
//!     src_port: 49153,
//!     dst_port: 9,
//!     payload_size: 1024,
//! };
//!
//! // No route yet: the packet is buffered and a request is flooded.
//! node.send_data(packet, Timestamp::from_secs(2));
//! let outputs = node.take_outputs();
//! assert!(outputs.iter().any(|o| matches!(o, Output::SetTimer { .. })));
//! assert_eq!(node.queue_len(), 1);
//! ```

use std::collections::VecDeque;

use hashbrown::HashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::AodvConfig;
use crate::interface::{Interface, InterfaceKind};
use crate::packet::{DataPacket, Frame, Packet, PacketKind};
use crate::table::{Offer, RouteEntry, RouteTable, RouteUpdate};
use crate::time::{Duration, Timestamp};
use crate::trace::RouteEvent;
use crate::types::{wireless_address, Address, DropReason, NodeId};
use crate::wormhole::WormholeAttack;

/// TTL for hop-by-hop control packets.
pub(crate) const CONTROL_TTL: u8 = 1;

/// Timers a node can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Discovery for a destination timed out.
    RouteRequest(Address),
}

/// Side effects requested by a node handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Put a frame on an interface after `delay`.
    Transmit {
        iface: InterfaceKind,
        frame: Frame,
        delay: Duration,
    },
    /// Arm (or re-arm) a timer.
    SetTimer { timer: TimerId, at: Timestamp },
    /// Disarm a timer; a no-op if it already fired.
    CancelTimer { timer: TimerId },
    /// A data packet reached its destination here.
    Deliver { packet: DataPacket },
    /// A packet originated here could not be delivered.
    DeliveryFailed {
        packet: DataPacket,
        reason: DropReason,
    },
    /// A packet in transit was discarded here.
    Dropped {
        packet: DataPacket,
        reason: DropReason,
    },
}

/// Routing state toward one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Never heard of.
    Unknown,
    /// A request is outstanding.
    Discovering,
    /// A usable route exists.
    Valid,
    /// A route existed but has been invalidated or has lapsed.
    Expired,
}

/// Outstanding discovery.
#[derive(Clone, Debug)]
pub(crate) struct PendingRequest {
    pub id: u32,
    /// Full-diameter retries already spent.
    pub retries: u8,
    pub ttl: u8,
}

/// A data packet waiting for a route.
#[derive(Clone, Debug)]
pub(crate) struct QueuedPacket {
    pub packet: DataPacket,
    pub enqueued: Timestamp,
}

pub(crate) type PendingMap = HashMap<Address, PendingRequest>;
/// Request dedup cache: (originator, request id) -> expiry.
pub(crate) type SeenRequests = HashMap<(Address, u32), Timestamp>;
/// Reply identity: (originator, destination, destination sequence number).
pub(crate) type ReplyKey = (Address, Address, u32);
/// Relayed replies: best hop count relayed so far and cache expiry.
pub(crate) type RelayedReplies = HashMap<ReplyKey, (u8, Timestamp)>;
/// Control packets already replayed through the tunnel: (kind, origin, dst, seq) -> expiry.
pub(crate) type ReplayedControl = HashMap<(PacketKind, Address, Address, u32), Timestamp>;

/// The routing state machine of one node.
pub struct Node {
    id: NodeId,
    config: AodvConfig,

    // Interfaces
    wireless: Interface,
    tunnel: Option<Interface>,
    attack: Option<WormholeAttack>,

    // Routing state
    pub(crate) table: RouteTable,
    pub(crate) seq_no: u32,
    pub(crate) rreq_id: u32,
    pub(crate) rreq_seen: SeenRequests,
    pub(crate) rrep_relayed: RelayedReplies,
    pub(crate) replayed: ReplayedControl,
    pub(crate) pending: PendingMap,
    pub(crate) queue: VecDeque<QueuedPacket>,

    rng: ChaCha8Rng,
    outputs: Vec<Output>,
    events: Vec<RouteEvent>,
}

impl Node {
    /// Create an honest node with address `10.1.1.(id + 1)`.
    ///
    /// # Panics
    ///
    /// If `id` does not fit the /24 address plan.
    pub fn new(id: NodeId, config: AodvConfig, seed: u64) -> Self {
        let address = match wireless_address(id) {
            Some(addr) => addr,
            None => panic!("node id {id} does not fit the wireless address plan"),
        };
        let table = RouteTable::new(config.delete_period);
        Self {
            id,
            config,
            wireless: Interface::new(InterfaceKind::Wireless, address),
            tunnel: None,
            attack: None,
            table,
            seq_no: 0,
            rreq_id: 0,
            rreq_seen: HashMap::new(),
            rrep_relayed: HashMap::new(),
            replayed: HashMap::new(),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            outputs: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Turn this node into a wormhole endpoint.
    pub fn with_wormhole(mut self, attack: WormholeAttack) -> Self {
        self.tunnel = Some(Interface::new(InterfaceKind::Tunnel, attack.tunnel_address));
        self.attack = Some(attack);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Wireless interface address.
    pub fn address(&self) -> Address {
        self.wireless.address()
    }

    pub fn tunnel_address(&self) -> Option<Address> {
        self.tunnel.as_ref().map(|t| t.address())
    }

    pub fn config(&self) -> &AodvConfig {
        &self.config
    }

    pub fn attack(&self) -> Option<&WormholeAttack> {
        self.attack.as_ref()
    }

    pub fn is_endpoint(&self) -> bool {
        self.attack.is_some()
    }

    /// Own destination sequence number.
    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    /// Whether `addr` is one of this node's interface addresses.
    pub fn owns(&self, addr: Address) -> bool {
        self.wireless.address() == addr || self.tunnel_address() == Some(addr)
    }

    pub(crate) fn iface_address(&self, iface: InterfaceKind) -> Address {
        match iface {
            InterfaceKind::Wireless => self.wireless.address(),
            InterfaceKind::Tunnel => self
                .tunnel_address()
                .unwrap_or_else(|| self.wireless.address()),
        }
    }

    /// Bring the tunnel link up or down. Ignored on honest nodes.
    pub fn set_tunnel_link(&mut self, up: bool) {
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.set_up(up);
        }
    }

    pub fn tunnel_up(&self) -> bool {
        self.tunnel.as_ref().is_some_and(|t| t.is_up())
    }

    /// Usable route to `dst`.
    pub fn route(&self, dst: Address, now: Timestamp) -> Option<&RouteEntry> {
        self.table.lookup(dst, now)
    }

    /// Every table entry, usable or not.
    pub fn routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.table.iter()
    }

    pub fn route_state(&self, dst: Address, now: Timestamp) -> RouteState {
        if self.table.lookup(dst, now).is_some() {
            RouteState::Valid
        } else if self.pending.contains_key(&dst) {
            RouteState::Discovering
        } else if self.table.get(dst).is_some() {
            RouteState::Expired
        } else {
            RouteState::Unknown
        }
    }

    /// Packets waiting for discovery.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drain requested side effects.
    pub fn take_outputs(&mut self) -> Vec<Output> {
        core::mem::take(&mut self.outputs)
    }

    /// Drain the protocol trace.
    pub fn take_events(&mut self) -> Vec<RouteEvent> {
        core::mem::take(&mut self.events)
    }

    /// Handle a frame received on `iface`.
    pub fn handle_frame(&mut self, frame: Frame, iface: InterfaceKind, now: Timestamp) {
        self.purge(now);

        if let Some(to) = frame.next_hop() {
            if !self.owns(to) {
                return;
            }
        }
        if iface == InterfaceKind::Tunnel && !self.tunnel_up() {
            return;
        }

        let Frame {
            sender,
            ttl,
            packet,
            ..
        } = frame;

        self.heard_neighbor(sender, iface, now);

        match packet {
            Packet::Rreq(rreq) => self.handle_rreq(rreq, sender, ttl, iface, now),
            Packet::Rrep(rrep) => self.handle_rrep(rrep, sender, iface, now),
            Packet::Rerr(rerr) => self.handle_rerr(rerr, sender, now),
            Packet::Data(data) => self.handle_data(data, ttl, now),
        }
    }

    /// Handle a timer armed through [`Output::SetTimer`].
    pub fn handle_timer(&mut self, timer: TimerId, now: Timestamp) {
        self.purge(now);
        match timer {
            TimerId::RouteRequest(dst) => self.handle_rreq_timeout(dst, now),
        }
    }

    /// Apply lazy expiry to routes, the dedup cache and the discovery buffer.
    pub(crate) fn purge(&mut self, now: Timestamp) {
        for dst in self.table.purge(now) {
            tracing::trace!(node = self.id, dst = %dst, "route expired");
            self.events.push(RouteEvent::RouteExpired {
                timestamp: now,
                dst,
            });
        }

        self.rreq_seen.retain(|_, expires| *expires > now);
        self.rrep_relayed.retain(|_, (_, expires)| *expires > now);
        self.replayed.retain(|_, expires| *expires > now);

        let max_wait = self.config.max_queue_time;
        while let Some(front) = self.queue.front() {
            if front.enqueued + max_wait > now {
                break;
            }
            if let Some(stale) = self.queue.pop_front() {
                self.fail_delivery(stale.packet, DropReason::QueueTimeout, now);
            }
        }
    }

    fn heard_neighbor(&mut self, neighbor: Address, iface: InterfaceKind, now: Timestamp) {
        let before = self
            .table
            .lookup(neighbor, now)
            .map(|r| (r.next_hop, r.iface, r.hop_count));
        self.table
            .update_neighbor(neighbor, iface, self.config.active_route_timeout, now);
        if before != Some((neighbor, iface, 1)) {
            self.record_route(neighbor, now);
        }
    }

    /// Offer a route and trace it if it was taken.
    pub(crate) fn install(&mut self, update: RouteUpdate, now: Timestamp) -> Offer {
        let offer = self.table.offer(update, now);
        if offer.accepted() {
            self.record_route(update.dst, now);
        }
        offer
    }

    fn record_route(&mut self, dst: Address, now: Timestamp) {
        let Some(entry) = self.table.get(dst) else {
            return;
        };
        tracing::trace!(
            node = self.id,
            dst = %dst,
            next_hop = %entry.next_hop,
            hops = entry.hop_count,
            iface = entry.iface.as_str(),
            "route installed"
        );
        let event = RouteEvent::RouteInstalled {
            timestamp: now,
            dst,
            next_hop: entry.next_hop,
            iface: entry.iface,
            hop_count: entry.hop_count,
            seq: entry.seq,
        };
        self.events.push(event);
    }

    pub(crate) fn emit(&mut self, output: Output) {
        self.outputs.push(output);
    }

    pub(crate) fn record(&mut self, event: RouteEvent) {
        self.events.push(event);
    }

    /// Random pre-broadcast delay, so neighbors do not rebroadcast in lockstep.
    fn jitter(&mut self) -> Duration {
        let max = self.config.broadcast_jitter.as_micros();
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.rng.gen_range(0..=max))
    }

    pub(crate) fn broadcast(&mut self, packet: Packet, ttl: u8) {
        let delay = self.jitter();
        let frame = Frame::broadcast(self.address(), ttl, packet);
        self.emit(Output::Transmit {
            iface: InterfaceKind::Wireless,
            frame,
            delay,
        });
    }

    pub(crate) fn unicast(&mut self, next_hop: Address, iface: InterfaceKind, packet: Packet) {
        let frame = Frame::unicast(self.iface_address(iface), next_hop, CONTROL_TTL, packet);
        self.emit(Output::Transmit {
            iface,
            frame,
            delay: Duration::ZERO,
        });
    }

    /// Report a locally originated packet as undeliverable.
    pub(crate) fn fail_delivery(&mut self, packet: DataPacket, reason: DropReason, now: Timestamp) {
        tracing::debug!(node = self.id, uid = packet.uid, dst = %packet.dst, %reason, "delivery failed");
        self.events.push(RouteEvent::PacketDropped {
            timestamp: now,
            uid: packet.uid,
            reason,
        });
        self.emit(Output::DeliveryFailed { packet, reason });
    }

    /// Discard a packet in transit.
    pub(crate) fn drop_packet(&mut self, packet: DataPacket, reason: DropReason, now: Timestamp) {
        tracing::debug!(node = self.id, uid = packet.uid, dst = %packet.dst, %reason, "dropping packet");
        self.events.push(RouteEvent::PacketDropped {
            timestamp: now,
            uid: packet.uid,
            reason,
        });
        self.emit(Output::Dropped { packet, reason });
    }
}
