//! Per-flow packet accounting.
//!
//! The monitor observes application datagrams where they enter and leave the
//! network and reconstructs per-flow statistics from those events alone. A flow
//! is identified by its (source, destination) address pair; flow ids are handed
//! out in order of first observation, starting at 1.
//!
//! Every packet id has one fate. Once a packet is received, dropped or declared
//! lost, later events for it are ignored, so a straggler that shows up after
//! [`FlowMonitor::check_for_lost_packets`] gave up on it is not counted twice.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use wormroute::{Address, DropReason, Duration, Timestamp};

/// Default age after which an in-flight packet is declared lost.
pub const DEFAULT_MAX_PER_HOP_DELAY: Duration = Duration::from_secs(10);

/// Flow identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: Address,
    pub dst: Address,
}

impl FlowKey {
    pub fn new(src: Address, dst: Address) -> Self {
        Self { src, dst }
    }
}

/// Accumulated statistics of one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    pub flow_id: u32,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub first_tx: Option<Timestamp>,
    pub last_tx: Option<Timestamp>,
    pub first_rx: Option<Timestamp>,
    pub last_rx: Option<Timestamp>,
    /// Sum of end-to-end delays of received packets.
    pub delay_sum: Duration,
    /// Hops taken by packets of this flow beyond the first.
    pub times_forwarded: u64,
    pub drops: BTreeMap<DropReason, u64>,
}

impl FlowStats {
    fn new(flow_id: u32) -> Self {
        Self {
            flow_id,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_packets: 0,
            rx_packets: 0,
            first_tx: None,
            last_tx: None,
            first_rx: None,
            last_rx: None,
            delay_sum: Duration::ZERO,
            times_forwarded: 0,
            drops: BTreeMap::new(),
        }
    }

    /// Packets sent but not received.
    pub fn lost_packets(&self) -> u64 {
        self.tx_packets.saturating_sub(self.rx_packets)
    }

    /// Received bits over the first-send to last-receive interval, in Mbps
    /// (2^20 bits per second).
    ///
    /// `None` when nothing arrived or the interval is empty.
    pub fn throughput_mbps(&self) -> Option<f64> {
        let (first_tx, last_rx) = (self.first_tx?, self.last_rx?);
        let secs = last_rx.checked_sub(first_tx)?.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some(self.rx_bytes as f64 * 8.0 / secs / 1024.0 / 1024.0)
    }

    pub fn mean_delay(&self) -> Option<Duration> {
        if self.rx_packets == 0 {
            return None;
        }
        Some(Duration::from_micros(
            self.delay_sum.as_micros() / self.rx_packets,
        ))
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.drops.get(&reason).copied().unwrap_or(0)
    }
}

/// What happened to a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketFate {
    InFlight,
    Received,
    Dropped(DropReason),
    /// Overdue and given up on.
    Lost,
}

#[derive(Debug, Clone)]
struct Tracked {
    key: FlowKey,
    sent: Timestamp,
    fate: PacketFate,
}

#[derive(Serialize)]
struct FlowEntry<'a> {
    src: Address,
    dst: Address,
    #[serde(flatten)]
    stats: &'a FlowStats,
}

/// Collects flow statistics over a run.
#[derive(Debug, Clone, Default)]
pub struct FlowMonitor {
    flows: BTreeMap<FlowKey, FlowStats>,
    packets: HashMap<u64, Tracked>,
    next_flow_id: u32,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn stats_mut(&mut self, key: FlowKey) -> &mut FlowStats {
        let next_id = &mut self.next_flow_id;
        self.flows.entry(key).or_insert_with(|| {
            *next_id += 1;
            FlowStats::new(*next_id)
        })
    }

    /// A packet entered the network at its source.
    pub fn on_transmit(&mut self, key: FlowKey, packet_id: u64, bytes: u32, now: Timestamp) {
        let stats = self.stats_mut(key);
        stats.tx_bytes += u64::from(bytes);
        stats.tx_packets += 1;
        stats.first_tx.get_or_insert(now);
        stats.last_tx = Some(now);
        self.packets.insert(
            packet_id,
            Tracked {
                key,
                sent: now,
                fate: PacketFate::InFlight,
            },
        );
    }

    /// A packet reached its destination application.
    pub fn on_receive(&mut self, key: FlowKey, packet_id: u64, bytes: u32, now: Timestamp) {
        let Some(sent) = self.settle(packet_id, PacketFate::Received) else {
            tracing::trace!(packet_id, "ignoring receive of settled or unknown packet");
            return;
        };
        let stats = self.stats_mut(key);
        stats.rx_bytes += u64::from(bytes);
        stats.rx_packets += 1;
        stats.first_rx.get_or_insert(now);
        stats.last_rx = Some(now);
        stats.delay_sum += now.saturating_sub(sent);
    }

    /// A packet was relayed by an intermediate node.
    pub fn on_forward(&mut self, key: FlowKey, packet_id: u64) {
        if !self.is_in_flight(packet_id) {
            return;
        }
        self.stats_mut(key).times_forwarded += 1;
    }

    /// A packet was discarded somewhere in the network.
    pub fn on_drop(&mut self, key: FlowKey, packet_id: u64, reason: DropReason, now: Timestamp) {
        if self.settle(packet_id, PacketFate::Dropped(reason)).is_none() {
            return;
        }
        tracing::debug!(packet_id, %reason, time = %now, "flow packet dropped");
        *self.stats_mut(key).drops.entry(reason).or_insert(0) += 1;
    }

    /// Declare every packet in flight for longer than `max_delay` lost.
    ///
    /// Returns how many were given up on.
    pub fn check_for_lost_packets(&mut self, now: Timestamp, max_delay: Duration) -> usize {
        let mut overdue: Vec<(u64, FlowKey)> = self
            .packets
            .iter()
            .filter(|(_, t)| t.fate == PacketFate::InFlight && now.saturating_sub(t.sent) > max_delay)
            .map(|(&id, t)| (id, t.key))
            .collect();
        overdue.sort_unstable_by_key(|(id, _)| *id);

        for (id, key) in &overdue {
            if let Some(tracked) = self.packets.get_mut(id) {
                tracked.fate = PacketFate::Lost;
            }
            *self
                .stats_mut(*key)
                .drops
                .entry(DropReason::Timeout)
                .or_insert(0) += 1;
        }
        overdue.len()
    }

    pub fn is_in_flight(&self, packet_id: u64) -> bool {
        self.packet_fate(packet_id) == Some(PacketFate::InFlight)
    }

    pub fn packet_fate(&self, packet_id: u64) -> Option<PacketFate> {
        self.packets.get(&packet_id).map(|t| t.fate)
    }

    pub fn flow(&self, key: &FlowKey) -> Option<&FlowStats> {
        self.flows.get(key)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Deterministically ordered copy of all flow statistics.
    pub fn snapshot(&self) -> BTreeMap<FlowKey, FlowStats> {
        self.flows.clone()
    }

    /// Serialize all flows, in key order.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let entries: Vec<FlowEntry<'_>> = self
            .flows
            .iter()
            .map(|(key, stats)| FlowEntry {
                src: key.src,
                dst: key.dst,
                stats,
            })
            .collect();
        serde_json::to_string_pretty(&entries)
    }

    /// Move an in-flight packet to its final fate, returning its send time.
    fn settle(&mut self, packet_id: u64, fate: PacketFate) -> Option<Timestamp> {
        let tracked = self.packets.get_mut(&packet_id)?;
        if tracked.fate != PacketFate::InFlight {
            return None;
        }
        tracked.fate = fate;
        Some(tracked.sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use wormroute::types::wireless_address;

    fn key(src: usize, dst: usize) -> FlowKey {
        FlowKey::new(wireless_address(src).unwrap(), wireless_address(dst).unwrap())
    }

    #[derive(Clone, Copy)]
    enum Step {
        Tx(FlowKey, u64, Timestamp),
        Rx(FlowKey, u64, Timestamp),
        Fwd(FlowKey, u64),
        Drop(FlowKey, u64, Timestamp),
    }

    fn apply(monitor: &mut FlowMonitor, trace: &[Step]) {
        for step in trace {
            match *step {
                Step::Tx(k, id, t) => monitor.on_transmit(k, id, 1024, t),
                Step::Rx(k, id, t) => monitor.on_receive(k, id, 1024, t),
                Step::Fwd(k, id) => monitor.on_forward(k, id),
                Step::Drop(k, id, t) => monitor.on_drop(k, id, DropReason::NoRoute, t),
            }
        }
    }

    #[test]
    fn test_single_flow_statistics() {
        let mut m = FlowMonitor::new();
        let k = key(1, 4);
        m.on_transmit(k, 1, 1024, Timestamp::from_secs(2));
        m.on_forward(k, 1);
        m.on_forward(k, 1);
        m.on_receive(k, 1, 1024, Timestamp::from_millis(2500));

        let stats = m.flow(&k).unwrap();
        assert_eq!(stats.flow_id, 1);
        assert_eq!(stats.tx_bytes, 1024);
        assert_eq!(stats.rx_bytes, 1024);
        assert_eq!(stats.times_forwarded, 2);
        assert_eq!(stats.lost_packets(), 0);
        assert_eq!(stats.mean_delay(), Some(Duration::from_millis(500)));
        // 8192 bits in 0.5 s
        let mbps = stats.throughput_mbps().unwrap();
        assert!((mbps - 16384.0 / 1024.0 / 1024.0).abs() < 1e-12);
        assert_eq!(m.packet_fate(1), Some(PacketFate::Received));
    }

    #[test]
    fn test_throughput_undefined_without_reception() {
        let mut m = FlowMonitor::new();
        m.on_transmit(key(1, 4), 1, 1024, Timestamp::from_secs(2));
        assert_eq!(m.flow(&key(1, 4)).unwrap().throughput_mbps(), None);
    }

    #[test]
    fn test_flow_ids_follow_first_observation() {
        let mut m = FlowMonitor::new();
        m.on_transmit(key(9, 1), 1, 10, Timestamp::ZERO);
        m.on_transmit(key(1, 4), 2, 10, Timestamp::ZERO);
        m.on_transmit(key(9, 1), 3, 10, Timestamp::ZERO);
        assert_eq!(m.flow(&key(9, 1)).unwrap().flow_id, 1);
        assert_eq!(m.flow(&key(1, 4)).unwrap().flow_id, 2);
        // snapshot iterates by key, not by id
        let keys: Vec<_> = m.snapshot().into_keys().collect();
        assert_eq!(keys, vec![key(1, 4), key(9, 1)]);
    }

    #[test]
    fn test_loss_is_tx_minus_rx() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut m = FlowMonitor::new();
        let k = key(1, 4);
        let mut received = 0;
        for id in 0..100u64 {
            let t = Timestamp::from_millis(id * 10);
            m.on_transmit(k, id, 512, t);
            if rng.gen_bool(0.6) {
                m.on_receive(k, id, 512, t + Duration::from_millis(3));
                received += 1;
            }
        }
        let stats = m.flow(&k).unwrap();
        assert_eq!(stats.tx_packets, 100);
        assert_eq!(stats.rx_packets, received);
        assert_eq!(stats.lost_packets(), 100 - received);
    }

    #[test]
    fn test_late_arrival_after_loss_is_ignored() {
        let mut m = FlowMonitor::new();
        let k = key(1, 4);
        m.on_transmit(k, 1, 1024, Timestamp::from_secs(2));
        m.on_transmit(k, 2, 1024, Timestamp::from_secs(11));

        let lost = m.check_for_lost_packets(Timestamp::from_secs(13), DEFAULT_MAX_PER_HOP_DELAY);
        assert_eq!(lost, 1);
        assert_eq!(m.packet_fate(1), Some(PacketFate::Lost));
        assert!(m.is_in_flight(2));

        m.on_receive(k, 1, 1024, Timestamp::from_secs(14));
        let stats = m.flow(&k).unwrap();
        assert_eq!(stats.rx_packets, 0);
        assert_eq!(stats.dropped(DropReason::Timeout), 1);
    }

    #[test]
    fn test_drop_then_receive_counts_once() {
        let mut m = FlowMonitor::new();
        let k = key(1, 9);
        m.on_transmit(k, 1, 1024, Timestamp::from_secs(2));
        m.on_drop(k, 1, DropReason::WormholeDrop, Timestamp::from_secs(2));
        m.on_drop(k, 1, DropReason::NoRoute, Timestamp::from_secs(2));
        m.on_receive(k, 1, 1024, Timestamp::from_secs(3));

        let stats = m.flow(&k).unwrap();
        assert_eq!(stats.dropped(DropReason::WormholeDrop), 1);
        assert_eq!(stats.dropped(DropReason::NoRoute), 0);
        assert_eq!(stats.rx_bytes, 0);
        assert_eq!(stats.lost_packets(), 1);
    }

    #[test]
    fn test_replay_gives_identical_json() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let flows = [key(1, 4), key(4, 1), key(2, 9), key(16, 0)];
        let mut trace = Vec::new();
        for id in 0..300u64 {
            let k = flows[rng.gen_range(0..flows.len())];
            let t = Timestamp::from_millis(id * 7);
            trace.push(Step::Tx(k, id, t));
            for _ in 0..rng.gen_range(0..4) {
                trace.push(Step::Fwd(k, id));
            }
            match rng.gen_range(0..3) {
                0 => trace.push(Step::Rx(k, id, t + Duration::from_millis(rng.gen_range(1..50)))),
                1 => trace.push(Step::Drop(k, id, t)),
                _ => {}
            }
        }

        let mut a = FlowMonitor::new();
        let mut b = FlowMonitor::new();
        apply(&mut a, &trace);
        apply(&mut b, &trace);
        a.check_for_lost_packets(Timestamp::from_secs(60), DEFAULT_MAX_PER_HOP_DELAY);
        b.check_for_lost_packets(Timestamp::from_secs(60), DEFAULT_MAX_PER_HOP_DELAY);

        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_json_layout() {
        let mut m = FlowMonitor::new();
        m.on_transmit(key(1, 4), 1, 1024, Timestamp::from_secs(2));
        let value: serde_json::Value = serde_json::from_str(&m.to_json().unwrap()).unwrap();
        assert_eq!(value[0]["src"], "10.1.1.2");
        assert_eq!(value[0]["dst"], "10.1.1.5");
        assert_eq!(value[0]["tx_bytes"], 1024);
        assert_eq!(value[0]["flow_id"], 1);
    }
}
