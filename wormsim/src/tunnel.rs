//! Out-of-band wormhole channel.
//!
//! The routing side of the attack lives in `wormroute::wormhole`; this is the
//! wire between colluding endpoints. It ignores the radio topology entirely and
//! delivers after a fixed latency while enabled.
//!
//! Tunnel interface addresses are handed out in declaration order across all
//! tunnels: the first endpoint of the first tunnel gets `10.1.2.1`, the next
//! one `10.1.2.2`, and so on.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use wormroute::types::tunnel_address;
use wormroute::{Address, DataPolicy, Duration, NodeId, WormholeAttack};

use crate::error::ScenarioError;

/// Default one-way tunnel latency.
pub const DEFAULT_TUNNEL_LATENCY: Duration = Duration::from_micros(10);

fn default_latency() -> Duration {
    DEFAULT_TUNNEL_LATENCY
}

fn default_enabled() -> bool {
    true
}

/// One wormhole: a set of colluding endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub endpoints: Vec<NodeId>,
    #[serde(default = "default_latency")]
    pub latency: Duration,
    /// Initial state; scenario actions may toggle it.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub data_policy: DataPolicy,
}

impl TunnelConfig {
    /// Two-endpoint tunnel with default latency, enabled.
    pub fn pair(a: NodeId, b: NodeId) -> Self {
        Self {
            endpoints: vec![a, b],
            latency: DEFAULT_TUNNEL_LATENCY,
            enabled: true,
            data_policy: DataPolicy::Forward,
        }
    }

    pub fn with_policy(mut self, policy: DataPolicy) -> Self {
        self.data_policy = policy;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Debug, Clone)]
struct Endpoint {
    tunnel: usize,
    address: Address,
}

/// All tunnels of a scenario with their address assignment.
#[derive(Debug, Clone, Default)]
pub struct TunnelRegistry {
    tunnels: Vec<TunnelConfig>,
    endpoints: HashMap<NodeId, Endpoint>,
    by_address: HashMap<Address, NodeId>,
}

impl TunnelRegistry {
    /// Validate tunnels against a network of `node_count` nodes and assign
    /// tunnel addresses.
    pub fn new(tunnels: Vec<TunnelConfig>, node_count: usize) -> Result<Self, ScenarioError> {
        let mut endpoints: HashMap<NodeId, Endpoint> = HashMap::new();
        let mut by_address = HashMap::new();
        let mut next_index = 0usize;

        for (tunnel, cfg) in tunnels.iter().enumerate() {
            if cfg.endpoints.len() < 2 {
                return Err(ScenarioError::TunnelTooSmall {
                    tunnel,
                    endpoints: cfg.endpoints.len(),
                });
            }
            for (i, &node) in cfg.endpoints.iter().enumerate() {
                if node >= node_count {
                    return Err(ScenarioError::EndpointOutOfRange { tunnel, node });
                }
                if cfg.endpoints[..i].contains(&node) {
                    return Err(ScenarioError::DuplicateEndpoint { tunnel, node });
                }
                if let Some(existing) = endpoints.get(&node) {
                    return Err(ScenarioError::EndpointInTwoTunnels {
                        node,
                        first: existing.tunnel,
                        second: tunnel,
                    });
                }
                let address = tunnel_address(next_index).ok_or(ScenarioError::TooManyEndpoints {
                    max: wormroute::types::MAX_HOSTS,
                })?;
                next_index += 1;
                endpoints.insert(node, Endpoint { tunnel, address });
                by_address.insert(address, node);
            }
        }

        Ok(Self {
            tunnels,
            endpoints,
            by_address,
        })
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    pub fn get(&self, tunnel: usize) -> Option<&TunnelConfig> {
        self.tunnels.get(tunnel)
    }

    /// Tunnel that `node` is an endpoint of.
    pub fn tunnel_of(&self, node: NodeId) -> Option<usize> {
        self.endpoints.get(&node).map(|e| e.tunnel)
    }

    pub fn address_of(&self, node: NodeId) -> Option<Address> {
        self.endpoints.get(&node).map(|e| e.address)
    }

    /// Node owning a tunnel interface address.
    pub fn resolve(&self, address: Address) -> Option<NodeId> {
        self.by_address.get(&address).copied()
    }

    /// Attack configuration for an endpoint: its address plus every sibling's.
    pub fn attack_for(&self, node: NodeId) -> Option<WormholeAttack> {
        let endpoint = self.endpoints.get(&node)?;
        let cfg = &self.tunnels[endpoint.tunnel];
        let peers = cfg
            .endpoints
            .iter()
            .filter(|&&peer| peer != node)
            .filter_map(|&peer| self.address_of(peer))
            .collect();
        Some(WormholeAttack::new(
            endpoint.address,
            peers,
            cfg.data_policy,
        ))
    }

    /// Whether the tunnel `node` belongs to is currently carrying traffic.
    pub fn is_enabled_for(&self, node: NodeId) -> bool {
        self.tunnel_of(node)
            .is_some_and(|t| self.tunnels[t].enabled)
    }

    pub fn latency_for(&self, node: NodeId) -> Option<Duration> {
        self.tunnel_of(node).map(|t| self.tunnels[t].latency)
    }

    /// Toggle a tunnel. Returns its endpoints, or `None` for an unknown index.
    pub fn set_enabled(&mut self, tunnel: usize, enabled: bool) -> Option<Vec<NodeId>> {
        let cfg = self.tunnels.get_mut(tunnel)?;
        cfg.enabled = enabled;
        Some(cfg.endpoints.clone())
    }
}
