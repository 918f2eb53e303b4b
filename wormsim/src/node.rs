//! SimNode wrapper for simulated routing nodes.

use hashbrown::HashMap;
use wormroute::{Address, Node, NodeId, Output, RouteEvent, RouteState, TimerId, Timestamp};

use crate::event::EventHandle;
use crate::topology::Position;

/// A routing node plus the simulator-side bookkeeping it needs.
///
/// The node itself never sees the scheduler. Timers it arms are registered
/// here as (timer id -> event handle) so that a later cancel, or a re-arm of
/// the same id, can find and remove the pending event.
pub struct SimNode {
    inner: Node,
    position: Position,
    timers: HashMap<TimerId, EventHandle>,
    route_events: Vec<RouteEvent>,
}

impl SimNode {
    pub fn new(inner: Node, position: Position) -> Self {
        Self {
            inner,
            position,
            timers: HashMap::new(),
            route_events: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id()
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Get reference to inner routing node.
    pub fn inner(&self) -> &Node {
        &self.inner
    }

    /// Get mutable reference to inner routing node.
    pub fn inner_mut(&mut self) -> &mut Node {
        &mut self.inner
    }

    pub fn route_state(&self, dst: Address, now: Timestamp) -> RouteState {
        self.inner.route_state(dst, now)
    }

    /// Hop count of the usable route to `dst`.
    pub fn hop_count(&self, dst: Address, now: Timestamp) -> Option<u8> {
        self.inner.route(dst, now).map(|r| r.hop_count)
    }

    /// Register a newly armed timer, returning the handle it replaces.
    pub fn arm_timer(&mut self, timer: TimerId, handle: EventHandle) -> Option<EventHandle> {
        self.timers.insert(timer, handle)
    }

    /// Forget a timer, returning its pending handle if any.
    pub fn disarm_timer(&mut self, timer: TimerId) -> Option<EventHandle> {
        self.timers.remove(&timer)
    }

    /// A timer event ran. Returns `false` if the timer was disarmed meanwhile.
    pub fn timer_fired(&mut self, timer: TimerId) -> bool {
        self.timers.remove(&timer).is_some()
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.len()
    }

    /// Drain the node's pending outputs, archiving its trace events.
    pub fn take_outputs(&mut self) -> Vec<Output> {
        self.route_events.extend(self.inner.take_events());
        self.inner.take_outputs()
    }

    pub fn route_events(&self) -> &[RouteEvent] {
        &self.route_events
    }

    pub fn take_route_events(&mut self) -> Vec<RouteEvent> {
        core::mem::take(&mut self.route_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKey, SequenceNumber};
    use wormroute::packet::DataPacket;
    use wormroute::AodvConfig;

    fn handle(seq: u64) -> EventHandle {
        EventHandle(EventKey {
            time: Timestamp::from_secs(1),
            seq: SequenceNumber::new(seq),
        })
    }

    #[test]
    fn test_timer_registry() {
        let mut node = SimNode::new(Node::new(0, AodvConfig::default(), 1), Position::default());
        let dst: Address = "10.1.1.9".parse().unwrap();
        let timer = TimerId::RouteRequest(dst);

        assert_eq!(node.arm_timer(timer, handle(1)), None);
        assert_eq!(node.arm_timer(timer, handle(2)), Some(handle(1)));
        assert_eq!(node.armed_timers(), 1);
        assert!(node.timer_fired(timer));
        assert!(!node.timer_fired(timer));
        assert_eq!(node.armed_timers(), 0);
        assert_eq!(node.disarm_timer(timer), None);
    }

    #[test]
    fn test_outputs_archive_events() {
        let mut node = SimNode::new(Node::new(1, AodvConfig::default(), 1), Position::default());
        let packet = DataPacket {
            uid: 1,
            src: node.address(),
            dst: "10.1.1.5".parse().unwrap(),
            src_port: 49153,
            dst_port: 9,
            payload_size: 1024,
        };
        node.inner_mut().send_data(packet, Timestamp::from_secs(2));
        assert!(!node.take_outputs().is_empty());
        assert!(node
            .route_events()
            .iter()
            .any(|e| matches!(e, RouteEvent::RreqSent { .. })));
    }
}
