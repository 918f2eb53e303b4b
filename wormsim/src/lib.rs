//! wormsim - Discrete event simulator for wormhole attacks on on-demand routing.
//!
//! Runs a network of [`wormroute`] nodes on a single-threaded, deterministic
//! clock. Nodes sit at fixed positions and hear each other within a radio
//! range; selected nodes are joined by wormhole tunnels. UDP echo flows drive
//! route discovery, and a flow monitor reports what each flow sent, received
//! and lost.
//!
//! # Features
//!
//! - **Discrete event simulation**: no real-time delays, FIFO among equal times
//! - **Range topology**: unit-disk radio model with link breaks and partitions
//! - **Wormhole tunnels**: any number of disjoint tunnels with forward, drop
//!   or delay data policies, switchable at run time
//! - **Echo traffic**: UDP echo clients and servers
//! - **Flow monitor**: per-flow bytes, packets, loss, delay and throughput
//!
//! # Example
//!
//! ```
//! use wormsim::{wormhole_line_scenario, DataPolicy};
//!
//! let result = wormhole_line_scenario(DataPolicy::Forward)
//!     .with_seed(42)
//!     .run()
//!     .unwrap();
//!
//! let report = result.report.unwrap();
//! assert_eq!(report.flows[0].tx_bytes, 1024);
//! ```
//!
//! # Architecture
//!
//! The simulator keeps a time-ordered queue of events. The main loop:
//! 1. Pop the next event and advance the clock to it
//! 2. Call the node handler (`handle_frame`, `handle_timer`, ...)
//! 3. Drain the node's outputs
//! 4. Turn transmissions into deliveries via the topology or the tunnels,
//!    and timers into scheduled events

pub mod error;
pub mod event;
pub mod flow;
pub mod metrics;
pub mod node;
pub mod report;
pub mod scenario;
pub mod scheduler;
pub mod sim;
pub mod topology;
pub mod traffic;
pub mod tunnel;

// Re-export main types
pub use error::ScenarioError;
pub use event::{Event, ScenarioAction};
pub use flow::{FlowKey, FlowMonitor, FlowStats, PacketFate};
pub use metrics::{Direction, SimMetrics, SimulationResult, TraceRecord};
pub use node::SimNode;
pub use report::{FlowRecord, FlowReport};
pub use scenario::{wormhole_line_scenario, Placement, ScenarioBuilder, ScenarioConfig, TimedAction};
pub use scheduler::{RunOutcome, Scheduler};
pub use sim::Simulator;
pub use topology::{LinkOracle, Position, RangeTopology};
pub use traffic::{EchoClient, EchoFlow, EchoServer};
pub use tunnel::{TunnelConfig, TunnelRegistry};
pub use wormroute::{AodvConfig, DataPolicy, Duration, DropReason, NodeId, Timestamp};
