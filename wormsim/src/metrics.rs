//! Metrics collection for simulation analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wormroute::{DropReason, InterfaceKind, NodeId, PacketKind, Timestamp};

use crate::report::FlowReport;

/// Which way a traced frame was going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Tx,
    Rx,
    /// Handed to the application.
    Deliver,
}

/// One entry of the per-packet trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub time: Timestamp,
    pub node: NodeId,
    /// `None` for application deliveries.
    pub iface: Option<InterfaceKind>,
    pub direction: Direction,
    /// Bytes on the air, or payload bytes for deliveries.
    pub size: u32,
    pub kind: PacketKind,
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimMetrics {
    /// Frames put on an interface.
    pub frames_sent: u64,
    /// Frame receptions, one per receiving node.
    pub frames_delivered: u64,
    pub frames_by_kind: BTreeMap<PacketKind, u64>,
    /// Frames that crossed a wormhole tunnel.
    pub tunnel_frames: u64,
    /// Unicasts the link layer could not deliver.
    pub link_failures: u64,
    /// Data packets handed to an application.
    pub packets_delivered: u64,
    pub drops: BTreeMap<DropReason, u64>,
    pub events_executed: u64,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, kind: PacketKind) {
        self.frames_sent += 1;
        *self.frames_by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn record_drop(&mut self, reason: DropReason) {
        *self.drops.entry(reason).or_insert(0) += 1;
    }

    pub fn sent(&self, kind: PacketKind) -> u64 {
        self.frames_by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.drops.get(&reason).copied().unwrap_or(0)
    }

    /// Control frames sent, of any kind.
    pub fn control_overhead(&self) -> u64 {
        self.frames_by_kind
            .iter()
            .filter(|(kind, _)| kind.is_control())
            .map(|(_, n)| n)
            .sum()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time limit).
    pub queue_exhausted: bool,
    /// Flow statistics, when the monitor was enabled.
    pub report: Option<FlowReport>,
}
