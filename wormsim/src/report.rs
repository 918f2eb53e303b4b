//! End-of-run flow report.

use core::fmt;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wormroute::{Address, DropReason};

use crate::flow::FlowMonitor;

/// Final figures for one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: u32,
    pub src: Address,
    pub dst: Address,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    /// Absent when nothing was received.
    pub throughput_mbps: Option<f64>,
    /// Mean end-to-end delay in seconds.
    pub mean_delay_secs: Option<f64>,
    pub drops: BTreeMap<DropReason, u64>,
}

/// Per-flow summary, ordered by flow id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowReport {
    pub flows: Vec<FlowRecord>,
}

impl FlowReport {
    pub fn from_monitor(monitor: &FlowMonitor) -> Self {
        let mut flows: Vec<FlowRecord> = monitor
            .snapshot()
            .into_iter()
            .map(|(key, stats)| FlowRecord {
                flow_id: stats.flow_id,
                src: key.src,
                dst: key.dst,
                tx_bytes: stats.tx_bytes,
                rx_bytes: stats.rx_bytes,
                tx_packets: stats.tx_packets,
                rx_packets: stats.rx_packets,
                lost_packets: stats.lost_packets(),
                throughput_mbps: stats.throughput_mbps(),
                mean_delay_secs: stats.mean_delay().map(|d| d.as_secs_f64()),
                drops: stats.drops,
            })
            .collect();
        flows.sort_by_key(|f| f.flow_id);
        Self { flows }
    }

    pub fn flow(&self, src: Address, dst: Address) -> Option<&FlowRecord> {
        self.flows.iter().find(|f| f.src == src && f.dst == dst)
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for FlowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flow in &self.flows {
            writeln!(f, "Flow {} ({} -> {})", flow.flow_id, flow.src, flow.dst)?;
            writeln!(f, "  Tx Bytes:   {}", flow.tx_bytes)?;
            writeln!(f, "  Rx Bytes:   {}", flow.rx_bytes)?;
            match flow.throughput_mbps {
                Some(mbps) => writeln!(f, "  Throughput: {mbps} Mbps")?,
                None => writeln!(f, "  Throughput: n/a")?,
            }
        }
        Ok(())
    }
}
