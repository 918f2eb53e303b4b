//! Network topology and the link availability oracle.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use wormroute::{NodeId, Timestamp};

/// Default radio range, in placement units.
pub const DEFAULT_RANGE: f64 = 250.0;

/// Answers whether two nodes can exchange frames over the radio.
///
/// Implementations must be free of side effects: asking twice at the same
/// time gives the same answer.
pub trait LinkOracle {
    fn can_communicate(&self, a: NodeId, b: NodeId, at: Timestamp) -> bool;
}

/// Static node position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Euclidean distance.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Unit-disk radio model: two nodes hear each other within `range`.
///
/// Individual links can be disabled and the network can be partitioned into
/// groups; both are runtime overrides on top of the geometry.
#[derive(Debug, Clone)]
pub struct RangeTopology {
    positions: Vec<Position>,
    range: f64,
    /// Disabled links, stored with the lower id first.
    disabled: HashSet<(NodeId, NodeId)>,
    /// Group index per node while partitioned.
    groups: Option<Vec<Option<usize>>>,
}

impl RangeTopology {
    /// Place nodes explicitly.
    ///
    /// # Panics
    ///
    /// If a position is not finite or the range is not positive.
    pub fn from_positions(positions: Vec<Position>, range: f64) -> Self {
        assert!(
            range.is_finite() && range > 0.0,
            "radio range must be positive, got {range}"
        );
        for (id, p) in positions.iter().enumerate() {
            assert!(p.is_finite(), "node {id} has a non-finite position {p:?}");
        }
        Self {
            positions,
            range,
            disabled: HashSet::new(),
            groups: None,
        }
    }

    /// `n` nodes on the x axis, `spacing` apart, starting at the origin.
    pub fn line(n: usize, spacing: f64, range: f64) -> Self {
        let positions = (0..n)
            .map(|i| Position::new(i as f64 * spacing, 0.0, 0.0))
            .collect();
        Self::from_positions(positions, range)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn position(&self, node: NodeId) -> Option<Position> {
        self.positions.get(node).copied()
    }

    /// Distance between two placed nodes.
    ///
    /// # Panics
    ///
    /// If either node is unknown or the geometry yields a distance that is
    /// negative or not finite.
    pub fn distance(&self, a: NodeId, b: NodeId) -> f64 {
        let (pa, pb) = match (self.positions.get(a), self.positions.get(b)) {
            (Some(pa), Some(pb)) => (pa, pb),
            _ => panic!("distance query for unplaced node ({a}, {b})"),
        };
        let d = pa.distance(pb);
        assert!(
            d.is_finite() && d >= 0.0,
            "inconsistent distance {d} between {a} and {b}"
        );
        d
    }

    /// Nodes `a` can reach at time `at`, in id order.
    pub fn neighbors(&self, a: NodeId, at: Timestamp) -> Vec<NodeId> {
        (0..self.positions.len())
            .filter(|&b| self.can_communicate(a, b, at))
            .collect()
    }

    pub fn disable_link(&mut self, a: NodeId, b: NodeId) {
        self.disabled.insert(canonical_pair(a, b));
    }

    pub fn enable_link(&mut self, a: NodeId, b: NodeId) {
        self.disabled.remove(&canonical_pair(a, b));
    }

    pub fn is_link_disabled(&self, a: NodeId, b: NodeId) -> bool {
        self.disabled.contains(&canonical_pair(a, b))
    }

    /// Cut every link crossing between groups. Nodes not listed form one
    /// extra group of their own.
    pub fn partition(&mut self, groups: &[Vec<NodeId>]) {
        let mut assignment = vec![None; self.positions.len()];
        for (index, group) in groups.iter().enumerate() {
            for &node in group {
                if let Some(slot) = assignment.get_mut(node) {
                    *slot = Some(index);
                }
            }
        }
        self.groups = Some(assignment);
    }

    /// Remove the partition. Individually disabled links stay disabled.
    pub fn heal(&mut self) {
        self.groups = None;
    }

    pub fn is_partitioned(&self) -> bool {
        self.groups.is_some()
    }

    fn same_group(&self, a: NodeId, b: NodeId) -> bool {
        match &self.groups {
            None => true,
            Some(groups) => groups.get(a) == groups.get(b),
        }
    }
}

impl LinkOracle for RangeTopology {
    fn can_communicate(&self, a: NodeId, b: NodeId, _at: Timestamp) -> bool {
        if a == b || a >= self.positions.len() || b >= self.positions.len() {
            return false;
        }
        if self.is_link_disabled(a, b) || !self.same_group(a, b) {
            return false;
        }
        self.distance(a, b) <= self.range
    }
}

/// Canonical pair ordering for consistent link storage.
fn canonical_pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
