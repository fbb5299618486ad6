//! Vector clocks (C1/C3, spec §3, §4.3).
//!
//! Kept as a pure, lock-free data type: `next_clock` and `merge` never touch
//! a mutex, so the sync protocol's single serialization point (the world
//! clock's `RwLock`) is the only place causality bookkeeping actually
//! blocks, per DESIGN NOTES §9 ("a pure `next_clock(prev, originator)`
//! function and a single serialization point").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::ClientId;

/// Mapping from client ID to a monotonically increasing integer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<ClientId, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client: &ClientId) -> u64 {
        self.0.get(client).copied().unwrap_or(0)
    }

    pub fn set(&mut self, client: ClientId, value: u64) {
        self.0.insert(client, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &u64)> {
        self.0.iter()
    }

    /// `true` if every slot of `self` is `<=` the corresponding slot of
    /// `other` (missing slots count as 0). The all-zero clock is `<=`
    /// everything.
    pub fn le(&self, other: &VectorClock) -> bool {
        self.0.iter().all(|(c, v)| *v <= other.get(c))
    }

    /// Merge `other` into `self` by taking the per-slot maximum (I4-adjacent:
    /// this is the step that, applied to the world clock, makes the world
    /// version strictly increase when any slot actually advances).
    pub fn merge(&mut self, other: &VectorClock) {
        for (client, value) in other.iter() {
            let entry = self.0.entry(client.clone()).or_insert(0);
            if *value > *entry {
                *entry = *value;
            }
        }
    }

    /// Build the vector clock for a new delta on behalf of `originator`:
    /// start from `prev`, increment the originator's own slot by one. Pure
    /// function — the caller decides whether/where to lock.
    pub fn next_clock(prev: &VectorClock, originator: &ClientId) -> VectorClock {
        let mut next = prev.clone();
        let bumped = next.get(originator) + 1;
        next.set(originator.clone(), bumped);
        next
    }

    /// Causality check for `apply_delta` (spec §4.3 step 2): for every slot
    /// known to `world`, `delta[c] <= world[c] + (c == originator ? 1 : 0)`.
    pub fn is_causally_admissible(&self, world: &VectorClock, originator: &ClientId) -> bool {
        let mut known_clients: Vec<&ClientId> = world.0.keys().collect();
        for c in self.0.keys() {
            if !known_clients.contains(&c) {
                known_clients.push(c);
            }
        }
        known_clients.into_iter().all(|c| {
            let allowed = world.get(c) + u64::from(c == originator);
            self.get(c) <= allowed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> ClientId {
        ClientId(s.to_owned())
    }

    #[test]
    fn next_clock_increments_only_originator() {
        let mut prev = VectorClock::new();
        prev.set(cid("a"), 3);
        prev.set(cid("b"), 5);

        let next = VectorClock::next_clock(&prev, &cid("a"));
        assert_eq!(next.get(&cid("a")), 4);
        assert_eq!(next.get(&cid("b")), 5);
    }

    #[test]
    fn merge_takes_per_slot_max() {
        let mut a = VectorClock::new();
        a.set(cid("a"), 1);
        a.set(cid("b"), 9);

        let mut b = VectorClock::new();
        b.set(cid("a"), 5);
        b.set(cid("b"), 2);

        a.merge(&b);
        assert_eq!(a.get(&cid("a")), 5);
        assert_eq!(a.get(&cid("b")), 9);
    }

    #[test]
    fn causality_admits_own_next_increment() {
        let mut world = VectorClock::new();
        world.set(cid("a"), 2);

        let delta_clock = VectorClock::next_clock(&world, &cid("a"));
        assert!(delta_clock.is_causally_admissible(&world, &cid("a")));
    }

    #[test]
    fn causality_rejects_skipped_dependency() {
        let mut world = VectorClock::new();
        world.set(cid("a"), 2);
        world.set(cid("b"), 2);

        let mut delta_clock = world.clone();
        delta_clock.set(cid("b"), 4); // b jumped ahead of what the world has seen
        assert!(!delta_clock.is_causally_admissible(&world, &cid("a")));
    }

    #[test]
    fn causality_rejects_self_ahead_of_self() {
        let mut world = VectorClock::new();
        world.set(cid("a"), 2);

        let mut delta_clock = world.clone();
        delta_clock.set(cid("a"), 4); // should only ever be +1
        assert!(!delta_clock.is_causally_admissible(&world, &cid("a")));
    }

    #[test]
    fn le_is_reflexive_and_respects_missing_slots() {
        let a = VectorClock::new();
        let mut b = VectorClock::new();
        b.set(cid("x"), 1);
        assert!(a.le(&b));
        assert!(a.le(&a));
    }
}
