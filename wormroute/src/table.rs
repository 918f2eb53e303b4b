//! Route table with sequence-number freshness.
//!
//! Entries move between two flags:
//! - `Valid` until their lifetime runs out, an error report names them, or
//!   the link to their next hop breaks;
//! - `Invalid` for one delete period, during which they still remember the
//!   last sequence number so later updates can be judged against it.
//!
//! Expiry is lazy: [`RouteTable::purge`] applies it and is called at the top
//! of every node handler.

use hashbrown::{HashMap, HashSet};

use crate::interface::InterfaceKind;
use crate::time::{Duration, Timestamp};
use crate::types::{seq_newer, Address};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFlag {
    Valid,
    Invalid,
}

/// One destination in the table.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub dst: Address,
    pub next_hop: Address,
    /// Interface the next hop is reached through.
    pub iface: InterfaceKind,
    pub hop_count: u8,
    /// Destination sequence number, `None` when never learned.
    pub seq: Option<u32>,
    /// Valid: end of lifetime. Invalid: removal time.
    pub expires: Timestamp,
    pub flag: RouteFlag,
    /// Upstream neighbors that route through us toward `dst`.
    pub precursors: HashSet<Address>,
}

impl RouteEntry {
    /// Valid and not yet past its lifetime.
    pub fn is_usable(&self, now: Timestamp) -> bool {
        self.flag == RouteFlag::Valid && self.expires > now
    }

    /// Remaining lifetime, zero once expired.
    pub fn remaining(&self, now: Timestamp) -> Duration {
        self.expires.saturating_sub(now)
    }
}

/// A candidate route learned from a control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteUpdate {
    pub dst: Address,
    pub next_hop: Address,
    pub iface: InterfaceKind,
    pub hop_count: u8,
    pub seq: Option<u32>,
    pub lifetime: Duration,
}

/// Outcome of offering an update to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// No entry existed.
    Installed,
    /// An existing entry was replaced.
    Updated,
    /// The existing entry is fresher or shorter.
    Rejected,
}

impl Offer {
    pub fn accepted(self) -> bool {
        !matches!(self, Offer::Rejected)
    }
}

/// A route that was just invalidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidated {
    pub dst: Address,
    /// Sequence number after the invalidation bump.
    pub seq: u32,
    pub had_precursors: bool,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    entries: HashMap<Address, RouteEntry>,
    delete_period: Duration,
}

impl RouteTable {
    pub fn new(delete_period: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            delete_period,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    /// Expire lapsed valid routes and drop invalid ones past their delete period.
    ///
    /// Returns the destinations that just turned invalid.
    pub fn purge(&mut self, now: Timestamp) -> Vec<Address> {
        let mut expired = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.flag == RouteFlag::Valid && entry.expires <= now {
                entry.flag = RouteFlag::Invalid;
                entry.expires = entry.expires.saturating_add(self.delete_period);
                expired.push(entry.dst);
            }
        }
        self.entries
            .retain(|_, e| e.flag == RouteFlag::Valid || e.expires > now);
        expired.sort();
        expired
    }

    /// Usable route to `dst`.
    pub fn lookup(&self, dst: Address, now: Timestamp) -> Option<&RouteEntry> {
        self.entries.get(&dst).filter(|e| e.is_usable(now))
    }

    /// Entry for `dst` whatever its flag.
    pub fn get(&self, dst: Address) -> Option<&RouteEntry> {
        self.entries.get(&dst)
    }

    /// Offer a route, applying the freshness rule.
    ///
    /// An existing valid entry is replaced only by a fresher sequence number,
    /// or the same sequence number with fewer hops. An invalid entry takes
    /// any update.
    pub fn offer(&mut self, update: RouteUpdate, now: Timestamp) -> Offer {
        let Some(existing) = self.entries.get_mut(&update.dst) else {
            self.entries.insert(
                update.dst,
                RouteEntry {
                    dst: update.dst,
                    next_hop: update.next_hop,
                    iface: update.iface,
                    hop_count: update.hop_count,
                    seq: update.seq,
                    expires: now + update.lifetime,
                    flag: RouteFlag::Valid,
                    precursors: HashSet::new(),
                },
            );
            return Offer::Installed;
        };

        let valid = existing.is_usable(now);
        if valid {
            let fresher = match (update.seq, existing.seq) {
                (Some(new), Some(old)) => {
                    seq_newer(new, old) || (new == old && update.hop_count < existing.hop_count)
                }
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => update.hop_count < existing.hop_count,
            };
            if !fresher {
                return Offer::Rejected;
            }
        }

        existing.next_hop = update.next_hop;
        existing.iface = update.iface;
        existing.hop_count = update.hop_count;
        existing.seq = update.seq.or(existing.seq);
        existing.expires = if valid {
            existing.expires.max(now + update.lifetime)
        } else {
            now + update.lifetime
        };
        existing.flag = RouteFlag::Valid;
        Offer::Updated
    }

    /// Record that `neighbor` was just heard directly.
    ///
    /// A one-hop route never loses to a longer one, so this bypasses the
    /// freshness rule and keeps whatever sequence number was known.
    pub fn update_neighbor(
        &mut self,
        neighbor: Address,
        iface: InterfaceKind,
        lifetime: Duration,
        now: Timestamp,
    ) -> Offer {
        match self.entries.get_mut(&neighbor) {
            Some(entry) => {
                let deadline = now + lifetime;
                entry.expires = if entry.is_usable(now) {
                    entry.expires.max(deadline)
                } else {
                    deadline
                };
                entry.next_hop = neighbor;
                entry.iface = iface;
                entry.hop_count = 1;
                entry.flag = RouteFlag::Valid;
                Offer::Updated
            }
            None => self.offer(
                RouteUpdate {
                    dst: neighbor,
                    next_hop: neighbor,
                    iface,
                    hop_count: 1,
                    seq: None,
                    lifetime,
                },
                now,
            ),
        }
    }

    /// Extend the lifetime of a usable route.
    pub fn refresh(&mut self, dst: Address, lifetime: Duration, now: Timestamp) {
        if let Some(entry) = self.entries.get_mut(&dst) {
            if entry.is_usable(now) {
                entry.expires = entry.expires.max(now + lifetime);
            }
        }
    }

    pub fn add_precursor(&mut self, dst: Address, precursor: Address) {
        if let Some(entry) = self.entries.get_mut(&dst) {
            entry.precursors.insert(precursor);
        }
    }

    /// Invalidate one destination, bumping its sequence number.
    pub fn invalidate(&mut self, dst: Address, now: Timestamp) -> Option<Invalidated> {
        let delete_period = self.delete_period;
        let entry = self.entries.get_mut(&dst)?;
        if entry.flag != RouteFlag::Valid {
            return None;
        }
        Some(Self::invalidate_entry(entry, delete_period, now))
    }

    /// Invalidate every valid route whose next hop is `next_hop`.
    pub fn invalidate_next_hop(&mut self, next_hop: Address, now: Timestamp) -> Vec<Invalidated> {
        let delete_period = self.delete_period;
        let mut broken: Vec<Invalidated> = self
            .entries
            .values_mut()
            .filter(|e| e.flag == RouteFlag::Valid && e.next_hop == next_hop)
            .map(|e| Self::invalidate_entry(e, delete_period, now))
            .collect();
        broken.sort_by_key(|inv| inv.dst);
        broken
    }

    /// Invalidate the listed destinations if they route through `via`.
    ///
    /// The sequence number from the error report is adopted when it is fresher.
    pub fn invalidate_reported(
        &mut self,
        via: Address,
        reported: &[(Address, u32)],
        now: Timestamp,
    ) -> Vec<Invalidated> {
        let delete_period = self.delete_period;
        let mut broken = Vec::new();
        for &(dst, seq) in reported {
            let Some(entry) = self.entries.get_mut(&dst) else {
                continue;
            };
            if entry.flag != RouteFlag::Valid || entry.next_hop != via {
                continue;
            }
            entry.flag = RouteFlag::Invalid;
            entry.expires = now + delete_period;
            let adopted = match entry.seq {
                Some(old) if !seq_newer(seq, old) => old,
                _ => seq,
            };
            entry.seq = Some(adopted);
            broken.push(Invalidated {
                dst,
                seq: adopted,
                had_precursors: !entry.precursors.is_empty(),
            });
        }
        broken
    }

    fn invalidate_entry(entry: &mut RouteEntry, delete_period: Duration, now: Timestamp) -> Invalidated {
        let bumped = entry.seq.map_or(0, |s| s.wrapping_add(1));
        entry.seq = entry.seq.map(|s| s.wrapping_add(1));
        entry.flag = RouteFlag::Invalid;
        entry.expires = now + delete_period;
        Invalidated {
            dst: entry.dst,
            seq: bumped,
            had_precursors: !entry.precursors.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Ipv4Addr::new(10, 1, 1, last)
    }

    fn update(dst: u8, next: u8, hops: u8, seq: Option<u32>) -> RouteUpdate {
        RouteUpdate {
            dst: addr(dst),
            next_hop: addr(next),
            iface: InterfaceKind::Wireless,
            hop_count: hops,
            seq,
            lifetime: Duration::from_secs(3),
        }
    }

    fn table() -> RouteTable {
        RouteTable::new(Duration::from_secs(15))
    }

    #[test]
    fn test_install_and_lookup() {
        let mut t = table();
        let now = Timestamp::from_secs(1);
        assert_eq!(t.offer(update(9, 2, 4, Some(3)), now), Offer::Installed);

        let route = t.lookup(addr(9), now).unwrap();
        assert_eq!(route.next_hop, addr(2));
        assert_eq!(route.hop_count, 4);
        assert_eq!(route.seq, Some(3));
        assert!(t.lookup(addr(8), now).is_none());
    }

    #[test]
    fn test_fresher_sequence_wins() {
        let mut t = table();
        let now = Timestamp::ZERO;
        t.offer(update(9, 2, 2, Some(5)), now);

        // older seq with fewer hops loses
        assert_eq!(t.offer(update(9, 3, 1, Some(4)), now), Offer::Rejected);
        // same seq, more hops loses
        assert_eq!(t.offer(update(9, 3, 3, Some(5)), now), Offer::Rejected);
        // same seq, equal hops loses
        assert_eq!(t.offer(update(9, 3, 2, Some(5)), now), Offer::Rejected);
        // same seq, fewer hops wins
        assert_eq!(t.offer(update(9, 3, 1, Some(5)), now), Offer::Updated);
        // fresher seq wins even with more hops
        assert_eq!(t.offer(update(9, 4, 6, Some(6)), now), Offer::Updated);

        let route = t.lookup(addr(9), now).unwrap();
        assert_eq!(route.next_hop, addr(4));
        assert_eq!(route.hop_count, 6);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut t = table();
        let now = Timestamp::ZERO;
        t.offer(update(9, 2, 2, Some(u32::MAX)), now);
        assert_eq!(t.offer(update(9, 3, 5, Some(0)), now), Offer::Updated);
    }

    #[test]
    fn test_invalid_entry_accepts_any_update() {
        let mut t = table();
        let now = Timestamp::ZERO;
        t.offer(update(9, 2, 2, Some(5)), now);
        let inv = t.invalidate(addr(9), now).unwrap();
        assert_eq!(inv.seq, 6);
        assert!(t.lookup(addr(9), now).is_none());

        // older seq is fine once invalidated
        assert_eq!(t.offer(update(9, 3, 4, Some(4)), now), Offer::Updated);
        assert_eq!(t.lookup(addr(9), now).unwrap().seq, Some(4));
    }

    #[test]
    fn test_unknown_sequence_rules() {
        let mut t = table();
        let now = Timestamp::ZERO;
        t.offer(update(9, 2, 3, None), now);
        assert_eq!(t.offer(update(9, 3, 4, None), now), Offer::Rejected);
        assert_eq!(t.offer(update(9, 3, 2, None), now), Offer::Updated);
        assert_eq!(t.offer(update(9, 4, 7, Some(1)), now), Offer::Updated);
        assert_eq!(t.offer(update(9, 5, 1, None), now), Offer::Rejected);
    }

    #[test]
    fn test_lazy_expiry_and_delete_period() {
        let mut t = table();
        t.offer(update(9, 2, 2, Some(1)), Timestamp::ZERO);

        let later = Timestamp::from_secs(3);
        assert!(t.lookup(addr(9), later).is_none());
        assert_eq!(t.purge(later), vec![addr(9)]);
        assert_eq!(t.get(addr(9)).unwrap().flag, RouteFlag::Invalid);

        assert!(t.purge(Timestamp::from_secs(17)).is_empty());
        assert!(t.get(addr(9)).is_some());
        t.purge(Timestamp::from_secs(18));
        assert!(t.get(addr(9)).is_none());
    }

    #[test]
    fn test_neighbor_update_keeps_sequence() {
        let mut t = table();
        let now = Timestamp::ZERO;
        t.offer(update(2, 3, 2, Some(7)), now);
        t.update_neighbor(addr(2), InterfaceKind::Wireless, Duration::from_secs(3), now);

        let route = t.lookup(addr(2), now).unwrap();
        assert_eq!(route.hop_count, 1);
        assert_eq!(route.next_hop, addr(2));
        assert_eq!(route.seq, Some(7));
    }

    #[test]
    fn test_invalidate_next_hop_reports_precursors() {
        let mut t = table();
        let now = Timestamp::ZERO;
        t.offer(update(9, 2, 3, Some(1)), now);
        t.offer(update(8, 2, 2, None), now);
        t.offer(update(7, 3, 1, Some(1)), now);
        t.add_precursor(addr(9), addr(5));

        let broken = t.invalidate_next_hop(addr(2), now);
        assert_eq!(broken.len(), 2);
        assert_eq!(broken[0].dst, addr(8));
        assert!(!broken[0].had_precursors);
        assert_eq!(broken[1].dst, addr(9));
        assert_eq!(broken[1].seq, 2);
        assert!(broken[1].had_precursors);
        assert!(t.lookup(addr(7), now).is_some());
    }

    #[test]
    fn test_reported_invalidation_only_through_sender() {
        let mut t = table();
        let now = Timestamp::ZERO;
        t.offer(update(9, 2, 3, Some(4)), now);
        t.offer(update(8, 3, 3, Some(4)), now);

        let broken = t.invalidate_reported(addr(2), &[(addr(9), 6), (addr(8), 6)], now);
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].seq, 6);
        assert!(t.lookup(addr(8), now).is_some());
    }

    #[test]
    fn test_refresh_extends_lifetime() {
        let mut t = table();
        t.offer(update(9, 2, 3, Some(4)), Timestamp::ZERO);
        t.refresh(addr(9), Duration::from_secs(3), Timestamp::from_secs(2));
        assert!(t.lookup(addr(9), Timestamp::from_millis(4500)).is_some());
    }
}
