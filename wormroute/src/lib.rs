#![forbid(unsafe_code)]
//! wormroute - On-demand distance-vector routing with wormhole endpoints
//!
//! A reactive routing state machine in the AODV family, written as a pure
//! event handler so it can be driven by a discrete event simulator. Any node
//! can additionally be configured as the endpoint of a wormhole tunnel, an
//! out-of-band link between colluding nodes that replays route discovery
//! traffic and makes distant parts of the network look one hop apart.
//!
//! # Key Properties
//!
//! - Routes are discovered on demand by flooding route requests; replies
//!   travel back along reverse routes installed by the flood
//! - Destination sequence numbers (compared with 32-bit wraparound) decide
//!   which of two routes is fresher; hop count breaks ties
//! - Broken links are reported upstream with route errors
//! - No clock: every handler takes the current time explicitly
//! - No I/O: handlers queue [`Output`]s that the driver applies
//!
//! # Example
//!
//! ```
//! use wormroute::{AodvConfig, InterfaceKind, Node, Output, Timestamp};
//! use wormroute::wormhole::{DataPolicy, WormholeAttack};
//! use wormroute::types::tunnel_address;
//!
//! let attack = WormholeAttack::new(
//!     tunnel_address(0).unwrap(),
//!     vec![tunnel_address(1).unwrap()],
//!     DataPolicy::Drop,
//! );
//! let mut endpoint = Node::new(2, AodvConfig::default(), 7).with_wormhole(attack);
//! assert!(endpoint.tunnel_up());
//!
//! endpoint.set_tunnel_link(false);
//! assert!(!endpoint.tunnel_up());
//! assert!(endpoint.take_outputs().is_empty());
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Addresses, constants, sequence number arithmetic
//! - [`packet`] - Control and data packets, link-layer frames
//! - [`table`] - Route table and the freshness rule
//! - [`node`] - Node struct, outputs, timers
//! - `discovery` - Route requests and replies
//! - `forwarding` - Data forwarding, route errors, link failures
//! - [`wormhole`] - Tunnel endpoint behavior
//! - [`trace`] - Protocol trace events
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Protocol parameters

pub mod config;
mod discovery;
mod forwarding;
pub mod interface;
pub mod node;
pub mod packet;
pub mod table;
pub mod time;
pub mod trace;
pub mod types;
pub mod wormhole;

// Re-export main types at crate root
pub use config::AodvConfig;
pub use interface::{Interface, InterfaceKind};
pub use node::{Node, Output, RouteState, TimerId};
pub use packet::{DataPacket, Frame, LinkDest, Packet, PacketKind};
pub use table::{RouteEntry, RouteTable};
pub use time::{Duration, Timestamp};
pub use trace::RouteEvent;
pub use types::{Address, DropReason, NodeId};
pub use wormhole::{DataPolicy, WormholeAttack};
