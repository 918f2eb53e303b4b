//! Scenario validation errors.

use thiserror::Error;
use wormroute::{NodeId, Timestamp};

/// A scenario that cannot be simulated. Reported before any event runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScenarioError {
    #[error("scenario has no nodes")]
    NoNodes,

    #[error("scenario has {nodes} nodes but {positions} positions")]
    PositionCountMismatch { nodes: usize, positions: usize },

    #[error("node {node} has a non-finite position")]
    NonFinitePosition { node: NodeId },

    #[error("distance between nodes {a} and {b} is not finite")]
    UnboundedDistance { a: NodeId, b: NodeId },

    #[error("radio range must be positive, got {0}")]
    InvalidRange(f64),

    #[error("node spacing must be positive, got {0}")]
    InvalidSpacing(f64),

    #[error("data rate must be positive")]
    InvalidDataRate,

    #[error("scenario has {nodes} nodes, the address plan allows at most {max}")]
    TooManyNodes { nodes: usize, max: usize },

    #[error("tunnels declare more than {max} endpoints")]
    TooManyEndpoints { max: usize },

    #[error("tunnel {tunnel} needs at least two endpoints, got {endpoints}")]
    TunnelTooSmall { tunnel: usize, endpoints: usize },

    #[error("tunnel {tunnel} endpoint {node} is not a node of the scenario")]
    EndpointOutOfRange { tunnel: usize, node: NodeId },

    #[error("tunnel {tunnel} lists node {node} twice")]
    DuplicateEndpoint { tunnel: usize, node: NodeId },

    #[error("node {node} is an endpoint of tunnels {first} and {second}")]
    EndpointInTwoTunnels {
        node: NodeId,
        first: usize,
        second: usize,
    },

    #[error("flow {flow} references node {node}, which does not exist")]
    TrafficNodeOutOfRange { flow: usize, node: NodeId },

    #[error("flow {flow} uses node {node} as both client and server")]
    ClientIsServer { flow: usize, node: NodeId },

    #[error("flow {flow} has a zero packet size")]
    ZeroPacketSize { flow: usize },

    #[error("flow {flow} has a zero send interval")]
    ZeroInterval { flow: usize },

    #[error("{what} stops at {stop} before it starts at {start}")]
    StopBeforeStart {
        what: String,
        start: Timestamp,
        stop: Timestamp,
    },

    #[error("action at {at} references unknown {what} {index}")]
    UnknownActionTarget {
        at: Timestamp,
        what: &'static str,
        index: usize,
    },
}
