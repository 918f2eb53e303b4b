//! Scenario configuration and builder.
//!
//! [`ScenarioConfig`] is the complete, serializable description of a run; the
//! CLI loads it from JSON. [`ScenarioBuilder`] assembles one in code.

use serde::{Deserialize, Serialize};
use wormroute::types::MAX_HOSTS;
use wormroute::{AodvConfig, DataPolicy, NodeId, Timestamp};

use crate::error::ScenarioError;
use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::{Position, DEFAULT_RANGE};
use crate::traffic::EchoFlow;
use crate::tunnel::{TunnelConfig, TunnelRegistry};

/// Default radio data rate (DSSS 1 Mbps).
pub const DEFAULT_DATA_RATE_BPS: u64 = 1_000_000;

/// Where nodes are placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Along the x axis, `spacing` apart.
    Line { spacing: f64 },
    /// Explicit coordinates, one per node.
    Positions(Vec<Position>),
}

impl Default for Placement {
    fn default() -> Self {
        Placement::Line { spacing: 100.0 }
    }
}

impl Placement {
    /// Coordinates for `n` nodes.
    pub fn positions(&self, n: usize) -> Vec<Position> {
        match self {
            Placement::Line { spacing } => (0..n)
                .map(|i| Position::new(i as f64 * spacing, 0.0, 0.0))
                .collect(),
            Placement::Positions(positions) => positions.clone(),
        }
    }
}

/// A scenario action bound to its time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedAction {
    pub at: Timestamp,
    #[serde(flatten)]
    pub action: ScenarioAction,
}

/// Complete description of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub nodes: usize,
    pub placement: Placement,
    /// Radio range in placement units.
    pub range: f64,
    pub data_rate_bps: u64,
    pub tunnels: Vec<TunnelConfig>,
    pub flows: Vec<EchoFlow>,
    pub routing: AodvConfig,
    pub seed: u64,
    pub stop: Timestamp,
    pub flow_monitor: bool,
    pub packet_trace: bool,
    pub actions: Vec<TimedAction>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            nodes: 0,
            placement: Placement::default(),
            range: DEFAULT_RANGE,
            data_rate_bps: DEFAULT_DATA_RATE_BPS,
            tunnels: Vec::new(),
            flows: Vec::new(),
            routing: AodvConfig::default(),
            seed: 42,
            stop: Timestamp::from_secs(100),
            flow_monitor: true,
            packet_trace: false,
            actions: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    /// Reject scenarios that cannot be simulated.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.nodes == 0 {
            return Err(ScenarioError::NoNodes);
        }
        if self.nodes > MAX_HOSTS {
            return Err(ScenarioError::TooManyNodes {
                nodes: self.nodes,
                max: MAX_HOSTS,
            });
        }
        match &self.placement {
            Placement::Line { spacing } => {
                if !spacing.is_finite() || *spacing <= 0.0 {
                    return Err(ScenarioError::InvalidSpacing(*spacing));
                }
            }
            Placement::Positions(positions) => {
                if positions.len() != self.nodes {
                    return Err(ScenarioError::PositionCountMismatch {
                        nodes: self.nodes,
                        positions: positions.len(),
                    });
                }
                if let Some(node) = positions.iter().position(|p| !p.is_finite()) {
                    return Err(ScenarioError::NonFinitePosition { node });
                }
            }
        }
        // finite coordinates can still be far enough apart to overflow
        let positions = self.placement.positions(self.nodes);
        for (a, pa) in positions.iter().enumerate() {
            for (b, pb) in positions.iter().enumerate().skip(a + 1) {
                if !pa.distance(pb).is_finite() {
                    return Err(ScenarioError::UnboundedDistance { a, b });
                }
            }
        }
        if !self.range.is_finite() || self.range <= 0.0 {
            return Err(ScenarioError::InvalidRange(self.range));
        }
        if self.data_rate_bps == 0 {
            return Err(ScenarioError::InvalidDataRate);
        }

        TunnelRegistry::new(self.tunnels.clone(), self.nodes)?;

        for (index, flow) in self.flows.iter().enumerate() {
            flow.validate(index, self.nodes)?;
        }

        for timed in &self.actions {
            self.validate_action(timed)?;
        }
        Ok(())
    }

    fn validate_action(&self, timed: &TimedAction) -> Result<(), ScenarioError> {
        let unknown = |what, index| ScenarioError::UnknownActionTarget {
            at: timed.at,
            what,
            index,
        };
        match &timed.action {
            ScenarioAction::Partition { groups } => {
                if let Some(&node) = groups.iter().flatten().find(|&&n| n >= self.nodes) {
                    return Err(unknown("node", node));
                }
            }
            ScenarioAction::DisableLink { a, b } | ScenarioAction::EnableLink { a, b } => {
                for node in [*a, *b] {
                    if node >= self.nodes {
                        return Err(unknown("node", node));
                    }
                }
            }
            ScenarioAction::EnableTunnel { tunnel } | ScenarioAction::DisableTunnel { tunnel } => {
                if *tunnel >= self.tunnels.len() {
                    return Err(unknown("tunnel", *tunnel));
                }
            }
            ScenarioAction::HealPartition | ScenarioAction::CheckLostPackets => {}
        }
        Ok(())
    }
}

/// Builder for simulation scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    config: ScenarioConfig,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a scenario of `num_nodes` nodes on a line 100 units apart.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            config: ScenarioConfig {
                nodes: num_nodes,
                ..ScenarioConfig::default()
            },
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ScenarioConfig) -> Self {
        Self { config }
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Place nodes on a line.
    pub fn line_topology(mut self, spacing: f64) -> Self {
        self.config.placement = Placement::Line { spacing };
        self
    }

    /// Place nodes at explicit coordinates.
    pub fn positions(mut self, positions: Vec<Position>) -> Self {
        self.config.placement = Placement::Positions(positions);
        self
    }

    pub fn with_range(mut self, range: f64) -> Self {
        self.config.range = range;
        self
    }

    pub fn with_data_rate(mut self, bps: u64) -> Self {
        self.config.data_rate_bps = bps;
        self
    }

    pub fn with_routing(mut self, routing: AodvConfig) -> Self {
        self.config.routing = routing;
        self
    }

    pub fn with_tunnel(mut self, tunnel: TunnelConfig) -> Self {
        self.config.tunnels.push(tunnel);
        self
    }

    /// Apply one data policy to every tunnel added so far.
    pub fn with_attack_policy(mut self, policy: DataPolicy) -> Self {
        for tunnel in &mut self.config.tunnels {
            tunnel.data_policy = policy;
        }
        self
    }

    /// Keep the tunnels configured but start them disabled.
    pub fn tunnels_disabled(mut self) -> Self {
        for tunnel in &mut self.config.tunnels {
            tunnel.enabled = false;
        }
        self
    }

    /// Drop every tunnel.
    pub fn without_tunnels(mut self) -> Self {
        self.config.tunnels.clear();
        self
    }

    pub fn with_flow(mut self, flow: EchoFlow) -> Self {
        self.config.flows.push(flow);
        self
    }

    pub fn with_stop(mut self, stop: Timestamp) -> Self {
        self.config.stop = stop;
        self
    }

    pub fn with_flow_monitor(mut self, enabled: bool) -> Self {
        self.config.flow_monitor = enabled;
        self
    }

    pub fn with_packet_trace(mut self, enabled: bool) -> Self {
        self.config.packet_trace = enabled;
        self
    }

    /// Schedule an arbitrary action.
    pub fn action_at(mut self, at: Timestamp, action: ScenarioAction) -> Self {
        self.config.actions.push(TimedAction { at, action });
        self
    }

    /// Schedule a network partition at the specified time.
    pub fn partition_at(self, at: Timestamp, groups: Vec<Vec<NodeId>>) -> Self {
        self.action_at(at, ScenarioAction::Partition { groups })
    }

    /// Schedule partition healing at the specified time.
    pub fn heal_at(self, at: Timestamp) -> Self {
        self.action_at(at, ScenarioAction::HealPartition)
    }

    pub fn disable_link_at(self, at: Timestamp, a: NodeId, b: NodeId) -> Self {
        self.action_at(at, ScenarioAction::DisableLink { a, b })
    }

    pub fn disable_tunnel_at(self, at: Timestamp, tunnel: usize) -> Self {
        self.action_at(at, ScenarioAction::DisableTunnel { tunnel })
    }

    pub fn enable_tunnel_at(self, at: Timestamp, tunnel: usize) -> Self {
        self.action_at(at, ScenarioAction::EnableTunnel { tunnel })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn into_config(self) -> ScenarioConfig {
        self.config
    }

    /// Validate and build the simulator.
    pub fn build(self) -> Result<Simulator, ScenarioError> {
        Simulator::from_config(&self.config)
    }

    /// Build and run to the configured stop time.
    pub fn run(self) -> Result<SimulationResult, ScenarioError> {
        let mut sim = self.build()?;
        Ok(sim.run())
    }
}

/// 18 nodes on a 100-unit line with four wormholes (0-5, 2-8, 7-10, 11-16)
/// and one 1024-byte echo from node 1 to node 4 at t = 2 s.
pub fn wormhole_line_scenario(policy: DataPolicy) -> ScenarioBuilder {
    ScenarioBuilder::new(18)
        .line_topology(100.0)
        .with_range(DEFAULT_RANGE)
        .with_tunnel(TunnelConfig::pair(0, 5))
        .with_tunnel(TunnelConfig::pair(2, 8))
        .with_tunnel(TunnelConfig::pair(7, 10))
        .with_tunnel(TunnelConfig::pair(11, 16))
        .with_attack_policy(policy)
        .with_flow(EchoFlow::new(1, 4))
        .with_stop(Timestamp::from_secs(100))
}
