//! Runtime configuration for the routing state machine.
//!
//! `AodvConfig::default()` carries the usual reactive routing defaults
//! (3 s active route timeout, 40 ms node traversal time, network diameter 35).
//! `AodvConfig::deterministic()` is the same with broadcast jitter disabled,
//! which makes flood races depend only on topology and airtime.
//!
//! # Derived timers
//!
//! | Timer | Formula | Default |
//! |-------|---------|--------:|
//! | net traversal time | 2 × node traversal × net diameter | 2.8 s |
//! | path discovery time | 2 × net traversal time | 5.6 s |
//! | my route timeout | 2 × active route timeout | 6 s |
//! | delete period | 5 × active route timeout | 15 s |

use serde::{Deserialize, Serialize};

use crate::time::Duration;

/// Tunable protocol parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AodvConfig {
    /// Lifetime granted to a route each time it carries data.
    pub active_route_timeout: Duration,
    /// Lifetime a destination puts in its own replies.
    pub my_route_timeout: Duration,
    /// Conservative per-hop traversal estimate.
    pub node_traversal_time: Duration,
    /// Maximum hops across the network.
    pub net_diameter: u8,
    /// Lifetime of RREQ dedup cache entries.
    pub path_discovery_time: Duration,
    /// Time an invalidated route lingers before removal.
    pub delete_period: Duration,
    /// Retransmissions of a request before giving up.
    pub rreq_retries: u8,
    /// Packets buffered per node while discovery runs.
    pub max_queue_len: usize,
    /// Longest a packet may wait for a route.
    pub max_queue_time: Duration,
    /// Only destinations answer requests.
    pub destination_only: bool,
    /// Intermediate repliers also notify the destination.
    pub gratuitous_reply: bool,
    /// Grow the flood radius on each retry instead of flooding the whole network.
    pub expanding_ring: bool,
    pub ttl_start: u8,
    pub ttl_increment: u8,
    pub ttl_threshold: u8,
    /// Upper bound of the random delay before each broadcast.
    pub broadcast_jitter: Duration,
}

impl Default for AodvConfig {
    fn default() -> Self {
        Self {
            active_route_timeout: Duration::from_secs(3),
            my_route_timeout: Duration::from_secs(6),
            node_traversal_time: Duration::from_millis(40),
            net_diameter: 35,
            path_discovery_time: Duration::from_millis(5600),
            delete_period: Duration::from_secs(15),
            rreq_retries: 2,
            max_queue_len: 64,
            max_queue_time: Duration::from_secs(30),
            destination_only: false,
            gratuitous_reply: true,
            expanding_ring: false,
            ttl_start: 1,
            ttl_increment: 2,
            ttl_threshold: 7,
            broadcast_jitter: Duration::from_millis(10),
        }
    }
}

impl AodvConfig {
    /// Defaults with broadcast jitter disabled.
    pub fn deterministic() -> Self {
        Self {
            broadcast_jitter: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Round-trip bound across the whole network.
    pub fn net_traversal_time(&self) -> Duration {
        self.node_traversal_time
            .saturating_mul(2 * u64::from(self.net_diameter))
    }

    /// Round-trip bound for a flood limited to `ttl` hops.
    pub fn ring_traversal_time(&self, ttl: u8) -> Duration {
        // two hops of slack for the reply to turn around
        self.node_traversal_time
            .saturating_mul(2 * (u64::from(ttl) + 2))
    }

    /// Wait before retry number `retry` (0-based) of a full-network flood.
    pub fn rreq_timeout(&self, retry: u8) -> Duration {
        self.net_traversal_time()
            .saturating_mul(1u64 << retry.min(16))
    }

    /// TTL for the first request of a discovery.
    pub fn initial_ttl(&self) -> u8 {
        if self.expanding_ring {
            self.ttl_start
        } else {
            self.net_diameter
        }
    }

    /// TTL for the next request after one with `ttl` timed out.
    ///
    /// Past the threshold the ring jumps straight to the full diameter.
    pub fn next_ttl(&self, ttl: u8) -> u8 {
        if !self.expanding_ring || ttl >= self.net_diameter {
            return self.net_diameter;
        }
        let grown = ttl.saturating_add(self.ttl_increment);
        if grown > self.ttl_threshold {
            self.net_diameter
        } else {
            grown
        }
    }

    /// Timeout that goes with a request of `ttl` on retry `retry`.
    pub fn discovery_timeout(&self, ttl: u8, retry: u8) -> Duration {
        if self.expanding_ring && ttl < self.net_diameter {
            self.ring_traversal_time(ttl)
        } else {
            self.rreq_timeout(retry)
        }
    }

    /// Lifetime for a reverse route learned from a request that traveled `hops`.
    pub fn reverse_route_lifetime(&self, hops: u8) -> Duration {
        self.net_traversal_time()
            .saturating_mul(2)
            .saturating_sub(self.node_traversal_time.saturating_mul(2 * u64::from(hops)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cfg = AodvConfig::default();
        assert_eq!(cfg.net_traversal_time(), Duration::from_millis(2800));
        assert_eq!(cfg.path_discovery_time, cfg.net_traversal_time() * 2);
        assert_eq!(cfg.my_route_timeout, cfg.active_route_timeout * 2);
        assert_eq!(cfg.max_queue_len, 64);
        assert_eq!(cfg.rreq_retries, 2);
        assert_eq!(cfg.broadcast_jitter, Duration::from_millis(10));
    }

    #[test]
    fn test_deterministic_has_no_jitter() {
        let cfg = AodvConfig::deterministic();
        assert_eq!(cfg.broadcast_jitter, Duration::ZERO);
        assert_eq!(cfg.active_route_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_binary_exponential_backoff() {
        let cfg = AodvConfig::default();
        assert_eq!(cfg.rreq_timeout(0), Duration::from_millis(2800));
        assert_eq!(cfg.rreq_timeout(1), Duration::from_millis(5600));
        assert_eq!(cfg.rreq_timeout(2), Duration::from_millis(11200));
    }

    #[test]
    fn test_expanding_ring_ttls() {
        let cfg = AodvConfig {
            expanding_ring: true,
            ..AodvConfig::default()
        };
        assert_eq!(cfg.initial_ttl(), 1);
        assert_eq!(cfg.next_ttl(1), 3);
        assert_eq!(cfg.next_ttl(5), 7);
        assert_eq!(cfg.next_ttl(7), 35);
        assert_eq!(cfg.discovery_timeout(1, 0), Duration::from_millis(240));
        assert_eq!(cfg.discovery_timeout(35, 0), Duration::from_millis(2800));

        let flat = AodvConfig::default();
        assert_eq!(flat.initial_ttl(), 35);
        assert_eq!(flat.next_ttl(35), 35);
    }

    #[test]
    fn test_reverse_route_lifetime_shrinks_with_hops() {
        let cfg = AodvConfig::default();
        assert_eq!(cfg.reverse_route_lifetime(0), Duration::from_millis(5600));
        assert_eq!(cfg.reverse_route_lifetime(5), Duration::from_millis(5200));
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let cfg: AodvConfig =
            serde_json::from_str(r#"{"rreq_retries": 4, "broadcast_jitter": 0}"#).unwrap();
        assert_eq!(cfg.rreq_retries, 4);
        assert_eq!(cfg.broadcast_jitter, Duration::ZERO);
        assert_eq!(cfg.net_diameter, 35);
    }
}
