//! Event types for discrete event simulation.

use serde::{Deserialize, Serialize};
use wormroute::{Frame, InterfaceKind, NodeId, TimerId, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Position of an event in the queue.
///
/// Ordered by time, then by insertion sequence, so events scheduled for the
/// same instant run first-in first-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub time: Timestamp,
    pub seq: SequenceNumber,
}

/// Handle returned by scheduling, used to cancel the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub(crate) EventKey);

impl EventHandle {
    /// When the event is (or was) due.
    pub fn time(&self) -> Timestamp {
        self.0.time
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Partition the radio network into isolated groups.
    Partition { groups: Vec<Vec<NodeId>> },
    /// Heal all partitions.
    HealPartition,
    /// Break a specific radio link.
    DisableLink { a: NodeId, b: NodeId },
    /// Restore a specific radio link.
    EnableLink { a: NodeId, b: NodeId },
    /// Bring a wormhole tunnel up.
    EnableTunnel { tunnel: usize },
    /// Take a wormhole tunnel down.
    DisableTunnel { tunnel: usize },
    /// Declare overdue packets lost.
    CheckLostPackets,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame arrives at a node's interface.
    FrameDelivery {
        to: NodeId,
        iface: InterfaceKind,
        frame: Frame,
    },
    /// The link layer reports that a unicast could not be delivered.
    LinkFailure { node: NodeId, frame: Frame },
    /// A node timer fires.
    TimerFire { node: NodeId, timer: TimerId },
    /// An echo client sends its next request.
    AppSend { client: usize },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

impl Event {
    /// Node the event is addressed to, if any.
    pub fn owner(&self) -> Option<NodeId> {
        match self {
            Event::FrameDelivery { to, .. } => Some(*to),
            Event::LinkFailure { node, .. } | Event::TimerFire { node, .. } => Some(*node),
            Event::AppSend { .. } | Event::ScenarioAction(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let e1 = EventKey {
            time: Timestamp::from_secs(10),
            seq: SequenceNumber::new(1),
        };
        let e2 = EventKey {
            time: Timestamp::from_secs(5),
            seq: SequenceNumber::new(2),
        };

        // e2 has earlier time, so it runs first
        assert!(e2 < e1);
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        let e1 = EventKey {
            time: Timestamp::from_secs(10),
            seq: SequenceNumber::new(1),
        };
        let e2 = EventKey {
            time: Timestamp::from_secs(10),
            seq: SequenceNumber::new(2),
        };

        // Same time, e1 has lower sequence, so e1 should be processed first
        assert!(e1 < e2);
    }

    #[test]
    fn test_scenario_action_json() {
        let action: ScenarioAction =
            serde_json::from_str(r#"{"action": "disable_tunnel", "tunnel": 1}"#).unwrap();
        assert_eq!(action, ScenarioAction::DisableTunnel { tunnel: 1 });
    }
}
