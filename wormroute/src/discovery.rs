//! Route discovery: requests, replies, retries and the discovery buffer.

use crate::interface::InterfaceKind;
use crate::node::{Node, Output, PendingRequest, TimerId, CONTROL_TTL};
use crate::packet::{DataPacket, Packet, Rrep, Rreq};
use crate::table::RouteUpdate;
use crate::time::Timestamp;
use crate::trace::RouteEvent;
use crate::types::{seq_newer, Address, DropReason, DEFAULT_DATA_TTL};

impl Node {
    /// Begin discovery for `dst` unless one is already running.
    pub(crate) fn start_discovery(&mut self, dst: Address, now: Timestamp) {
        if self.pending.contains_key(&dst) {
            return;
        }
        let ttl = self.config().initial_ttl();
        self.send_rreq(dst, 0, ttl, now);
    }

    fn send_rreq(&mut self, dst: Address, retries: u8, ttl: u8, now: Timestamp) {
        self.seq_no = self.seq_no.wrapping_add(1);
        self.rreq_id = self.rreq_id.wrapping_add(1);
        let id = self.rreq_id;

        let (dst_seq, unknown_seq) = match self.table.get(dst).and_then(|e| e.seq) {
            Some(seq) => (seq, false),
            None => (0, true),
        };
        let rreq = Rreq {
            hop_count: 0,
            id,
            dst,
            dst_seq,
            unknown_seq,
            origin: self.address(),
            origin_seq: self.seq_no,
            gratuitous: self.config().gratuitous_reply,
            destination_only: self.config().destination_only,
        };

        // our own flood will echo back from neighbors
        let seen_until = now + self.config().path_discovery_time;
        let origin = self.address();
        self.rreq_seen.insert((origin, id), seen_until);
        self.pending.insert(dst, PendingRequest { id, retries, ttl });

        let timeout = self.config().discovery_timeout(ttl, retries);
        self.emit(Output::SetTimer {
            timer: TimerId::RouteRequest(dst),
            at: now + timeout,
        });

        tracing::debug!(node = self.id(), dst = %dst, id, ttl, retries, "sending route request");
        self.record(RouteEvent::RreqSent {
            timestamp: now,
            dst,
            id,
            ttl,
            retry: retries,
        });
        self.broadcast(Packet::Rreq(rreq), ttl);
    }

    pub(crate) fn handle_rreq_timeout(&mut self, dst: Address, now: Timestamp) {
        let Some(pending) = self.pending.remove(&dst) else {
            return;
        };

        // a route may have arrived without a reply to us, e.g. from a request
        if self.table.lookup(dst, now).is_some() {
            self.complete_discovery(dst, now);
            return;
        }

        let full_flood = pending.ttl >= self.config().net_diameter;
        if full_flood && pending.retries >= self.config().rreq_retries {
            self.fail_discovery(dst, now);
            return;
        }

        // ring stages do not count against the retry budget
        let retries = if full_flood {
            pending.retries + 1
        } else {
            pending.retries
        };
        let ttl = self.config().next_ttl(pending.ttl);
        tracing::trace!(node = self.id(), dst = %dst, id = pending.id, "route request timed out");
        self.send_rreq(dst, retries, ttl, now);
    }

    fn fail_discovery(&mut self, dst: Address, now: Timestamp) {
        let waiting = self.take_queued(dst);
        tracing::info!(
            node = self.id(),
            dst = %dst,
            dropped = waiting.len(),
            "route discovery failed"
        );
        self.record(RouteEvent::DiscoveryFailed {
            timestamp: now,
            dst,
            dropped: waiting.len(),
        });
        for packet in waiting {
            self.fail_delivery(packet, DropReason::DestinationUnreachable, now);
        }
    }

    /// A usable route to `dst` exists: stop discovery and drain the buffer.
    pub(crate) fn complete_discovery(&mut self, dst: Address, now: Timestamp) {
        if self.pending.remove(&dst).is_some() {
            self.emit(Output::CancelTimer {
                timer: TimerId::RouteRequest(dst),
            });
        }
        let hop_count = self.table.lookup(dst, now).map_or(0, |r| r.hop_count);

        let waiting = self.take_queued(dst);
        let flushed = waiting.len();
        for packet in waiting {
            self.route_data(packet, DEFAULT_DATA_TTL, now);
        }

        tracing::debug!(node = self.id(), dst = %dst, hop_count, flushed, "route discovered");
        self.record(RouteEvent::DiscoveryComplete {
            timestamp: now,
            dst,
            hop_count,
            flushed,
        });
    }

    fn take_queued(&mut self, dst: Address) -> Vec<DataPacket> {
        let mut taken = Vec::new();
        let mut kept = std::collections::VecDeque::with_capacity(self.queue.len());
        for queued in self.queue.drain(..) {
            if queued.packet.dst == dst {
                taken.push(queued.packet);
            } else {
                kept.push_back(queued);
            }
        }
        self.queue = kept;
        taken
    }

    pub(crate) fn handle_rreq(
        &mut self,
        mut rreq: Rreq,
        sender: Address,
        ttl: u8,
        iface: InterfaceKind,
        now: Timestamp,
    ) {
        if self.owns(rreq.origin) {
            return;
        }

        let key = (rreq.origin, rreq.id);
        if self.rreq_seen.contains_key(&key) {
            self.record(RouteEvent::RreqDuplicate {
                origin: rreq.origin,
                id: rreq.id,
            });
            return;
        }
        let seen_until = now + self.config().path_discovery_time;
        self.rreq_seen.insert(key, seen_until);

        // the tunnel is invisible to hop counting
        if iface == InterfaceKind::Wireless {
            rreq.hop_count = rreq.hop_count.saturating_add(1);
        }

        let lifetime = self.config().reverse_route_lifetime(rreq.hop_count);
        self.install(
            RouteUpdate {
                dst: rreq.origin,
                next_hop: sender,
                iface,
                hop_count: rreq.hop_count,
                seq: Some(rreq.origin_seq),
                lifetime,
            },
            now,
        );

        if iface == InterfaceKind::Wireless {
            self.tunnel_control(&Packet::Rreq(rreq.clone()), ttl, now);
        }

        if self.owns(rreq.dst) {
            self.reply_as_destination(&rreq, now);
            return;
        }

        if self.can_reply_from_cache(&rreq, now) {
            self.reply_from_cache(&rreq, now);
            return;
        }

        if ttl <= 1 {
            return;
        }

        // carry the freshest destination sequence number we know of
        if let Some(seq) = self.table.get(rreq.dst).and_then(|e| e.seq) {
            if rreq.unknown_seq || seq_newer(seq, rreq.dst_seq) {
                rreq.dst_seq = seq;
                rreq.unknown_seq = false;
            }
        }

        self.record(RouteEvent::RreqForwarded {
            timestamp: now,
            origin: rreq.origin,
            dst: rreq.dst,
            hop_count: rreq.hop_count,
        });
        self.broadcast(Packet::Rreq(rreq), ttl - 1);
    }

    fn can_reply_from_cache(&self, rreq: &Rreq, now: Timestamp) -> bool {
        if rreq.destination_only || self.config().destination_only {
            return false;
        }
        let Some(route) = self.table.lookup(rreq.dst, now) else {
            return false;
        };
        match route.seq {
            Some(seq) => rreq.unknown_seq || !seq_newer(rreq.dst_seq, seq),
            None => false,
        }
    }

    fn reply_as_destination(&mut self, rreq: &Rreq, now: Timestamp) {
        if !rreq.unknown_seq && rreq.dst_seq == self.seq_no.wrapping_add(1) {
            self.seq_no = rreq.dst_seq;
        }
        let rrep = Rrep {
            hop_count: 0,
            dst: rreq.dst,
            dst_seq: self.seq_no,
            origin: rreq.origin,
            lifetime: self.config().my_route_timeout,
        };
        self.send_rrep(rrep, false, now);
    }

    fn reply_from_cache(&mut self, rreq: &Rreq, now: Timestamp) {
        let Some(to_dst) = self.table.lookup(rreq.dst, now) else {
            return;
        };
        let (dst_hop, dst_hops, dst_seq, dst_left) = (
            to_dst.next_hop,
            to_dst.hop_count,
            to_dst.seq.unwrap_or(rreq.dst_seq),
            to_dst.remaining(now),
        );
        let Some(to_origin) = self.table.lookup(rreq.origin, now) else {
            return;
        };
        let (origin_hop, origin_hops, origin_left) =
            (to_origin.next_hop, to_origin.hop_count, to_origin.remaining(now));

        self.table.add_precursor(rreq.dst, origin_hop);
        self.table.add_precursor(rreq.origin, dst_hop);

        let rrep = Rrep {
            hop_count: dst_hops,
            dst: rreq.dst,
            dst_seq,
            origin: rreq.origin,
            lifetime: dst_left,
        };
        self.send_rrep(rrep, true, now);

        if rreq.gratuitous {
            // tell the destination how to reach the originator
            let notice = Rrep {
                hop_count: origin_hops,
                dst: rreq.origin,
                dst_seq: rreq.origin_seq,
                origin: rreq.dst,
                lifetime: origin_left,
            };
            self.send_rrep(notice, true, now);
        }
    }

    /// Unicast a reply toward `rrep.origin` along the reverse route.
    fn send_rrep(&mut self, rrep: Rrep, intermediate: bool, now: Timestamp) {
        let Some(back) = self.table.lookup(rrep.origin, now) else {
            tracing::debug!(node = self.id(), origin = %rrep.origin, "no reverse route for reply");
            return;
        };
        let (next_hop, iface) = (back.next_hop, back.iface);

        self.record(RouteEvent::RrepSent {
            timestamp: now,
            dst: rrep.dst,
            origin: rrep.origin,
            hop_count: rrep.hop_count,
            intermediate,
        });
        self.unicast(next_hop, iface, Packet::Rrep(rrep));
    }

    pub(crate) fn handle_rrep(
        &mut self,
        mut rrep: Rrep,
        sender: Address,
        iface: InterfaceKind,
        now: Timestamp,
    ) {
        if iface == InterfaceKind::Wireless {
            rrep.hop_count = rrep.hop_count.saturating_add(1);
        }
        if rrep.hop_count >= self.config().net_diameter {
            self.discard_rrep(&rrep, now);
            return;
        }
        if iface == InterfaceKind::Wireless {
            self.tunnel_control(&Packet::Rrep(rrep.clone()), CONTROL_TTL, now);
        }

        if self.owns(rrep.dst) {
            return;
        }

        self.install(
            RouteUpdate {
                dst: rrep.dst,
                next_hop: sender,
                iface,
                hop_count: rrep.hop_count,
                seq: Some(rrep.dst_seq),
                lifetime: rrep.lifetime,
            },
            now,
        );

        if self.owns(rrep.origin) {
            // later replies only refine the route
            if self.pending.contains_key(&rrep.dst) && self.table.lookup(rrep.dst, now).is_some() {
                self.complete_discovery(rrep.dst, now);
            }
            return;
        }

        // relay each reply once, unless a copy with fewer hops shows up
        let key = (rrep.origin, rrep.dst, rrep.dst_seq);
        if let Some(&(best, _)) = self.rrep_relayed.get(&key) {
            if rrep.hop_count >= best {
                self.discard_rrep(&rrep, now);
                return;
            }
        }

        // relay toward the originator
        let Some(back) = self.table.lookup(rrep.origin, now) else {
            tracing::debug!(node = self.id(), origin = %rrep.origin, "dropping reply without reverse route");
            return;
        };
        let (back_hop, back_iface) = (back.next_hop, back.iface);
        let lifetime = self.config().active_route_timeout;
        self.table.refresh(rrep.origin, lifetime, now);
        self.table.add_precursor(rrep.dst, back_hop);
        self.table.add_precursor(rrep.origin, sender);

        let expires = now + self.config().path_discovery_time;
        self.rrep_relayed.insert(key, (rrep.hop_count, expires));
        self.unicast(back_hop, back_iface, Packet::Rrep(rrep));
    }

    fn discard_rrep(&mut self, rrep: &Rrep, now: Timestamp) {
        tracing::trace!(
            node = self.id(),
            dst = %rrep.dst,
            origin = %rrep.origin,
            hop_count = rrep.hop_count,
            "discarding reply"
        );
        self.record(RouteEvent::RrepDiscarded {
            timestamp: now,
            dst: rrep.dst,
            origin: rrep.origin,
            hop_count: rrep.hop_count,
        });
    }
}
