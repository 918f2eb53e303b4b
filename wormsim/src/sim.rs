//! Discrete event simulator for wormhole scenarios.

use wormroute::types::node_of_wireless;
use wormroute::{
    Address, DataPacket, Duration, DropReason, Frame, InterfaceKind, LinkDest, Node, NodeId,
    Output, PacketKind, RouteEvent, Timestamp,
};

use crate::error::ScenarioError;
use crate::event::{Event, ScenarioAction};
use crate::flow::{FlowKey, FlowMonitor, DEFAULT_MAX_PER_HOP_DELAY};
use crate::metrics::{Direction, SimMetrics, SimulationResult, TraceRecord};
use crate::node::SimNode;
use crate::report::FlowReport;
use crate::scenario::ScenarioConfig;
use crate::scheduler::Scheduler;
use crate::topology::{LinkOracle, RangeTopology};
use crate::traffic::{EchoClient, EchoServer, EPHEMERAL_PORT_BASE};
use crate::tunnel::{TunnelRegistry, DEFAULT_TUNNEL_LATENCY};

/// Per-node RNG seeds are spread this far apart.
const NODE_SEED_STRIDE: u64 = 1000;

/// Discrete event simulator for one scenario.
///
/// Nodes never see each other. Every `Output` a node produces is applied
/// here: transmissions become delivery events routed through the link oracle
/// or the tunnel registry, timers become scheduled events, and application
/// deliveries drive the echo apps and the flow monitor.
pub struct Simulator {
    /// Indexed by node id.
    nodes: Vec<SimNode>,
    topology: RangeTopology,
    tunnels: TunnelRegistry,
    scheduler: Scheduler<Event>,
    clients: Vec<EchoClient>,
    servers: Vec<EchoServer>,
    monitor: Option<FlowMonitor>,
    metrics: SimMetrics,
    /// Packet trace, when enabled.
    trace: Option<Vec<TraceRecord>>,
    data_rate_bps: u64,
    /// Next data packet uid; 0 is never handed out.
    next_uid: u64,
    stop: Timestamp,
    max_delay: Duration,
}

impl Simulator {
    /// Validate `config` and set up nodes, apps and scheduled actions.
    pub fn from_config(config: &ScenarioConfig) -> Result<Self, ScenarioError> {
        config.validate()?;

        let positions = config.placement.positions(config.nodes);
        let topology = RangeTopology::from_positions(positions.clone(), config.range);
        let tunnels = TunnelRegistry::new(config.tunnels.clone(), config.nodes)?;

        let nodes: Vec<SimNode> = positions
            .into_iter()
            .enumerate()
            .map(|(id, position)| {
                let seed = config
                    .seed
                    .wrapping_add((id as u64).wrapping_mul(NODE_SEED_STRIDE));
                let mut node = Node::new(id, config.routing.clone(), seed);
                if let Some(attack) = tunnels.attack_for(id) {
                    node = node.with_wormhole(attack);
                    node.set_tunnel_link(tunnels.is_enabled_for(id));
                }
                SimNode::new(node, position)
            })
            .collect();

        let mut clients = Vec::with_capacity(config.flows.len());
        let mut servers: Vec<EchoServer> = Vec::new();
        for (index, flow) in config.flows.iter().enumerate() {
            let local = nodes[flow.client].address();
            let remote = nodes[flow.server].address();
            let port = EPHEMERAL_PORT_BASE.wrapping_add(index as u16);
            clients.push(EchoClient::new(flow.clone(), local, remote, port));
            if !servers
                .iter()
                .any(|s| s.node() == flow.server && s.port() == flow.port)
            {
                servers.push(EchoServer::new(flow, remote));
            }
        }

        let mut sim = Self {
            nodes,
            topology,
            tunnels,
            scheduler: Scheduler::new(),
            clients,
            servers,
            monitor: config.flow_monitor.then(FlowMonitor::new),
            metrics: SimMetrics::new(),
            trace: config.packet_trace.then(Vec::new),
            data_rate_bps: config.data_rate_bps,
            next_uid: 1,
            stop: config.stop,
            max_delay: DEFAULT_MAX_PER_HOP_DELAY,
        };

        for (client, flow) in config.flows.iter().enumerate() {
            sim.scheduler
                .schedule_at(flow.client_start, Event::AppSend { client });
        }
        for timed in &config.actions {
            sim.schedule_action(timed.at, timed.action.clone());
        }

        tracing::debug!(
            nodes = sim.nodes.len(),
            tunnels = sim.tunnels.len(),
            flows = sim.clients.len(),
            stop = %sim.stop,
            "simulator ready"
        );
        Ok(sim)
    }

    /// Set how long a packet may stay in flight before it counts as lost.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    /// Current simulation time.
    pub fn now(&self) -> Timestamp {
        self.scheduler.now()
    }

    /// Configured stop time.
    pub fn stop_time(&self) -> Timestamp {
        self.stop
    }

    pub fn topology(&self) -> &RangeTopology {
        &self.topology
    }

    pub fn tunnels(&self) -> &TunnelRegistry {
        &self.tunnels
    }

    pub fn clients(&self) -> &[EchoClient] {
        &self.clients
    }

    pub fn servers(&self) -> &[EchoServer] {
        &self.servers
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn monitor(&self) -> Option<&FlowMonitor> {
        self.monitor.as_ref()
    }

    /// Events still queued.
    pub fn pending_events(&self) -> usize {
        self.scheduler.len()
    }

    /// Current flow report, when the monitor is enabled.
    pub fn flow_report(&self) -> Option<FlowReport> {
        self.monitor.as_ref().map(FlowReport::from_monitor)
    }

    /// Hop count of `from`'s usable route to `to`'s wireless address.
    pub fn hop_count(&self, from: NodeId, to: NodeId) -> Option<u8> {
        let dst = self.nodes.get(to)?.address();
        self.nodes.get(from)?.hop_count(dst, self.now())
    }

    /// Drain the packet trace. Empty when tracing is disabled.
    pub fn take_trace(&mut self) -> Vec<TraceRecord> {
        self.trace.as_mut().map(core::mem::take).unwrap_or_default()
    }

    /// Drain every node's protocol trace, tagged with the node id.
    pub fn take_route_events(&mut self) -> Vec<(NodeId, RouteEvent)> {
        let mut events = Vec::new();
        for node in &mut self.nodes {
            // pick up anything not yet archived
            let pending = node.inner_mut().take_events();
            let id = node.id();
            events.extend(
                node.take_route_events()
                    .into_iter()
                    .chain(pending)
                    .map(|e| (id, e)),
            );
        }
        events
    }

    /// Schedule a scenario action. Times already past run next.
    pub fn schedule_action(&mut self, at: Timestamp, action: ScenarioAction) {
        let at = at.max(self.now());
        self.scheduler.schedule_at(at, Event::ScenarioAction(action));
    }

    /// Run to the configured stop time, then account for lost packets.
    pub fn run(&mut self) -> SimulationResult {
        let mut result = self.run_until(self.stop);
        let now = self.now();
        if let Some(monitor) = self.monitor.as_mut() {
            let lost = monitor.check_for_lost_packets(now, self.max_delay);
            if lost > 0 {
                tracing::info!(lost, "packets still in flight at end of run");
            }
        }
        result.report = self.flow_report();
        result
    }

    /// Run simulation until the specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some((_, event)) = self.scheduler.pop_next(end_time) {
            self.process_event(event);
        }
        self.scheduler.advance_to(end_time);
        self.metrics.events_executed = self.scheduler.executed();

        SimulationResult {
            end_time: self.now(),
            metrics: self.metrics.clone(),
            queue_exhausted: self.scheduler.is_empty(),
            report: self.flow_report(),
        }
    }

    /// Run simulation for the specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.now() + duration)
    }

    fn process_event(&mut self, event: Event) {
        let now = self.now();
        match event {
            Event::FrameDelivery { to, iface, frame } => {
                self.metrics.frames_delivered += 1;
                self.record_trace(to, Some(iface), Direction::Rx, &frame);
                self.nodes[to].inner_mut().handle_frame(frame, iface, now);
                self.collect_outputs(to);
            }
            Event::LinkFailure { node, frame } => {
                self.metrics.link_failures += 1;
                self.nodes[node].inner_mut().handle_link_failure(frame, now);
                self.collect_outputs(node);
            }
            Event::TimerFire { node, timer } => {
                if self.nodes[node].timer_fired(timer) {
                    self.nodes[node].inner_mut().handle_timer(timer, now);
                    self.collect_outputs(node);
                }
            }
            Event::AppSend { client } => self.client_send(client),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn client_send(&mut self, index: usize) {
        let now = self.now();
        let uid = self.next_uid;
        let Some(client) = self.clients.get_mut(index) else {
            return;
        };
        let Some(packet) = client.next_packet(uid, now) else {
            return;
        };
        let (node, next) = (client.node(), client.next_send(now));
        self.next_uid += 1;
        if let Some(at) = next {
            self.scheduler
                .schedule_at(at, Event::AppSend { client: index });
        }
        self.originate(node, packet);
    }

    /// Hand an application packet to its source node.
    fn originate(&mut self, node: NodeId, packet: DataPacket) {
        let now = self.now();
        tracing::debug!(
            node,
            uid = packet.uid,
            dst = %packet.dst,
            size = packet.payload_size,
            "application send"
        );
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.on_transmit(
                FlowKey::new(packet.src, packet.dst),
                packet.uid,
                packet.payload_size,
                now,
            );
        }
        self.nodes[node].inner_mut().send_data(packet, now);
        self.collect_outputs(node);
    }

    /// Apply everything a node asked for.
    fn collect_outputs(&mut self, node: NodeId) {
        for output in self.nodes[node].take_outputs() {
            self.apply_output(node, output);
        }
    }

    fn apply_output(&mut self, node: NodeId, output: Output) {
        let now = self.now();
        match output {
            Output::Transmit {
                iface,
                frame,
                delay,
            } => self.transmit(node, iface, frame, delay),
            Output::SetTimer { timer, at } => {
                let handle = self
                    .scheduler
                    .schedule_at(at.max(now), Event::TimerFire { node, timer });
                if let Some(stale) = self.nodes[node].arm_timer(timer, handle) {
                    self.scheduler.cancel(stale);
                }
            }
            Output::CancelTimer { timer } => {
                if let Some(handle) = self.nodes[node].disarm_timer(timer) {
                    self.scheduler.cancel(handle);
                }
            }
            Output::Deliver { packet } => self.deliver(node, packet),
            Output::DeliveryFailed { packet, reason } => {
                self.packet_lost(node, &packet, reason);
                if let Some(client) = self
                    .clients
                    .iter_mut()
                    .find(|c| c.node() == node && c.sent_packet(&packet))
                {
                    client.on_failure(&packet, reason, now);
                }
            }
            Output::Dropped { packet, reason } => self.packet_lost(node, &packet, reason),
        }
    }

    /// Put a frame on the air or into the tunnel.
    fn transmit(&mut self, node: NodeId, iface: InterfaceKind, frame: Frame, delay: Duration) {
        let start = self.now() + delay;
        self.metrics.record_sent(frame.kind());
        self.record_trace(node, Some(iface), Direction::Tx, &frame);

        if let Some(data) = frame.packet.as_data() {
            if !self.nodes[node].inner().owns(data.src) {
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.on_forward(FlowKey::new(data.src, data.dst), data.uid);
                }
            }
        }

        match iface {
            InterfaceKind::Wireless => {
                let arrival = start + self.airtime(frame.size());
                match frame.receiver {
                    LinkDest::Broadcast => {
                        for to in self.topology.neighbors(node, start) {
                            self.scheduler.schedule_at(
                                arrival,
                                Event::FrameDelivery {
                                    to,
                                    iface,
                                    frame: frame.clone(),
                                },
                            );
                        }
                    }
                    LinkDest::Unicast(next_hop) => {
                        let event = match self.wireless_peer(next_hop) {
                            Some(to) if self.topology.can_communicate(node, to, start) => {
                                Event::FrameDelivery { to, iface, frame }
                            }
                            _ => Event::LinkFailure { node, frame },
                        };
                        self.scheduler.schedule_at(arrival, event);
                    }
                }
            }
            InterfaceKind::Tunnel => {
                let peer = frame.next_hop().and_then(|a| self.tunnels.resolve(a));
                match peer {
                    Some(to)
                        if self.tunnels.is_enabled_for(node) && self.tunnels.is_enabled_for(to) =>
                    {
                        let latency = self
                            .tunnels
                            .latency_for(node)
                            .unwrap_or(DEFAULT_TUNNEL_LATENCY);
                        self.metrics.tunnel_frames += 1;
                        self.scheduler.schedule_at(
                            start + latency,
                            Event::FrameDelivery { to, iface, frame },
                        );
                    }
                    _ => {
                        tracing::debug!(node, "tunnel unavailable");
                        self.scheduler
                            .schedule_at(start, Event::LinkFailure { node, frame });
                    }
                }
            }
        }
    }

    /// Node owning a wireless address, if it exists in this scenario.
    fn wireless_peer(&self, address: Address) -> Option<NodeId> {
        node_of_wireless(address).filter(|&id| id < self.nodes.len())
    }

    /// Time to put `bytes` on the air.
    fn airtime(&self, bytes: u32) -> Duration {
        let bits = u64::from(bytes) * 8 * 1_000_000;
        Duration::from_micros(bits.div_ceil(self.data_rate_bps))
    }

    /// A data packet reached the application on `node`.
    fn deliver(&mut self, node: NodeId, packet: DataPacket) {
        let now = self.now();
        self.metrics.packets_delivered += 1;
        if let Some(trace) = self.trace.as_mut() {
            trace.push(TraceRecord {
                time: now,
                node,
                iface: None,
                direction: Direction::Deliver,
                size: packet.payload_size,
                kind: PacketKind::Data,
            });
        }
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.on_receive(
                FlowKey::new(packet.src, packet.dst),
                packet.uid,
                packet.payload_size,
                now,
            );
        }

        let uid = self.next_uid;
        let answer = self
            .servers
            .iter_mut()
            .find(|s| s.node() == node && s.accepts(&packet))
            .map(|server| server.on_request(&packet, uid, now));
        match answer {
            Some(Some(reply)) => {
                self.next_uid += 1;
                self.originate(node, reply);
            }
            Some(None) => {}
            None => {
                if let Some(client) = self
                    .clients
                    .iter_mut()
                    .find(|c| c.node() == node && c.accepts(&packet))
                {
                    client.on_reply(&packet, now);
                } else {
                    tracing::debug!(node, uid = packet.uid, "no application bound");
                }
            }
        }
    }

    fn packet_lost(&mut self, node: NodeId, packet: &DataPacket, reason: DropReason) {
        let now = self.now();
        tracing::debug!(node, uid = packet.uid, %reason, "data packet lost");
        self.metrics.record_drop(reason);
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.on_drop(FlowKey::new(packet.src, packet.dst), packet.uid, reason, now);
        }
    }

    fn record_trace(
        &mut self,
        node: NodeId,
        iface: Option<InterfaceKind>,
        direction: Direction,
        frame: &Frame,
    ) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push(TraceRecord {
                time: self.scheduler.now(),
                node,
                iface,
                direction,
                size: frame.size(),
                kind: frame.kind(),
            });
        }
    }

    /// Execute a scenario action.
    fn execute_action(&mut self, action: ScenarioAction) {
        tracing::info!(time = %self.now(), ?action, "scenario action");
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { a, b } => self.topology.disable_link(a, b),
            ScenarioAction::EnableLink { a, b } => self.topology.enable_link(a, b),
            ScenarioAction::EnableTunnel { tunnel } => self.set_tunnel(tunnel, true),
            ScenarioAction::DisableTunnel { tunnel } => self.set_tunnel(tunnel, false),
            ScenarioAction::CheckLostPackets => {
                let now = self.now();
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.check_for_lost_packets(now, self.max_delay);
                }
            }
        }
    }

    fn set_tunnel(&mut self, tunnel: usize, enabled: bool) {
        let Some(endpoints) = self.tunnels.set_enabled(tunnel, enabled) else {
            tracing::warn!(tunnel, "unknown tunnel");
            return;
        };
        for node in endpoints {
            if let Some(n) = self.nodes.get_mut(node) {
                n.inner_mut().set_tunnel_link(enabled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioBuilder;
    use crate::traffic::EchoFlow;
    use crate::tunnel::TunnelConfig;
    use wormroute::AodvConfig;

    fn build(builder: ScenarioBuilder) -> Simulator {
        builder.build().unwrap()
    }

    #[test]
    fn test_simulator_creation() {
        let sim = build(
            ScenarioBuilder::new(4)
                .with_tunnel(TunnelConfig::pair(0, 3))
                .with_flow(EchoFlow::new(1, 2)),
        );
        assert_eq!(sim.now(), Timestamp::ZERO);
        assert_eq!(sim.nodes().len(), 4);
        assert!(sim.node(0).unwrap().inner().is_endpoint());
        assert!(!sim.node(1).unwrap().inner().is_endpoint());
        // first send is queued
        assert_eq!(sim.pending_events(), 1);
    }

    #[test]
    fn test_airtime_at_one_megabit() {
        let sim = build(ScenarioBuilder::new(2));
        assert_eq!(sim.airtime(52), Duration::from_micros(416));
        assert_eq!(sim.airtime(1052), Duration::from_micros(8416));
    }

    #[test]
    fn test_neighbor_echo() {
        let mut sim = build(
            ScenarioBuilder::new(2)
                .with_routing(AodvConfig::deterministic())
                .with_flow(EchoFlow::new(0, 1))
                .with_stop(Timestamp::from_secs(10)),
        );
        let result = sim.run();

        let report = result.report.unwrap();
        let a = sim.node(0).unwrap().address();
        let b = sim.node(1).unwrap().address();
        let request = report.flow(a, b).unwrap();
        assert_eq!(request.tx_bytes, 1024);
        assert_eq!(request.rx_bytes, 1024);
        let reply = report.flow(b, a).unwrap();
        assert_eq!(reply.rx_packets, 1);
        assert_eq!(sim.clients()[0].replies(), 1);
        assert_eq!(sim.servers()[0].received(), 1);
        assert_eq!(result.metrics.sent(PacketKind::Rreq), 1);
        assert_eq!(result.metrics.sent(PacketKind::Rrep), 1);
        assert_eq!(result.metrics.packets_delivered, 2);
        assert_eq!(result.end_time, Timestamp::from_secs(10));
    }

    #[test]
    fn test_unreachable_destination_counts_loss() {
        // no two nodes are within range
        let mut sim = build(
            ScenarioBuilder::new(3)
                .line_topology(250.0)
                .with_range(200.0)
                .with_flow(EchoFlow::new(0, 2))
                .with_stop(Timestamp::from_secs(60)),
        );
        let result = sim.run();
        let report = result.report.unwrap();
        let flow = &report.flows[0];
        assert_eq!(flow.tx_packets, 1);
        assert_eq!(flow.rx_packets, 0);
        assert_eq!(flow.lost_packets, 1);
        assert_eq!(flow.throughput_mbps, None);
        assert_eq!(
            result.metrics.dropped(DropReason::DestinationUnreachable),
            1
        );
        // the source hears about it
        assert_eq!(sim.clients()[0].failures(), 1);
        assert_eq!(sim.clients()[0].replies(), 0);
    }

    #[test]
    fn test_schedule_action() {
        let mut sim = build(ScenarioBuilder::new(3));
        sim.schedule_action(
            Timestamp::from_millis(500),
            ScenarioAction::Partition {
                groups: vec![vec![0], vec![1, 2]],
            },
        );
        sim.run_for(Duration::from_secs(1));
        assert!(!sim.topology().can_communicate(0, 1, sim.now()));
        assert!(sim.topology().can_communicate(1, 2, sim.now()));
    }

    #[test]
    fn test_tunnel_toggle_reaches_endpoints() {
        let mut sim = build(ScenarioBuilder::new(6).with_tunnel(TunnelConfig::pair(0, 5)));
        assert!(sim.node(5).unwrap().inner().tunnel_up());

        sim.schedule_action(Timestamp::from_secs(1), ScenarioAction::DisableTunnel { tunnel: 0 });
        sim.run_until(Timestamp::from_secs(1));
        assert!(!sim.node(0).unwrap().inner().tunnel_up());
        assert!(!sim.node(5).unwrap().inner().tunnel_up());
        assert!(!sim.tunnels().is_enabled_for(0));
    }

    #[test]
    fn test_packet_trace() {
        let mut sim = build(
            ScenarioBuilder::new(2)
                .with_routing(AodvConfig::deterministic())
                .with_flow(EchoFlow::new(0, 1).with_echo(false))
                .with_packet_trace(true)
                .with_stop(Timestamp::from_secs(5)),
        );
        sim.run();
        let trace = sim.take_trace();
        let deliveries: Vec<_> = trace
            .iter()
            .filter(|r| r.direction == Direction::Deliver)
            .collect();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].node, 1);
        assert_eq!(deliveries[0].size, 1024);
        assert!(trace
            .iter()
            .any(|r| r.direction == Direction::Tx && r.kind == PacketKind::Rreq && r.size == 52));
        assert!(sim.take_trace().is_empty());
    }
}
