//! World Registry (C4, spec §4.2).
//!
//! Two lock tiers, as §5 requires: a top-level `RwLock` over the rooms map,
//! and a per-room `RwLock` for membership/activity/queue/graph state. Lock
//! order is always registry -> room; nothing here ever reacquires the
//! registry lock while holding a room lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use crate::ids::{ClientId, SessionId};

const REPLAY_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RoomStatus {
    pub active: bool,
    pub clients: usize,
    pub graph_summary: Value,
    pub uptime_ms: i64,
    pub queued_messages: usize,
}

struct WorldRoom {
    clients: HashMap<ClientId, i64>,
    last_activity: i64,
    created_at: i64,
    queue: VecDeque<Value>,
    graph_state: Value,
    seeded: bool,
    /// Sessions that have already triggered a `client_joined` broadcast in
    /// this room, so a reconnect (drop + re-associate of the same session)
    /// doesn't re-announce it to peers (spec §8 scenario 5).
    announced: HashSet<SessionId>,
}

impl WorldRoom {
    fn new(now: i64) -> Self {
        Self {
            clients: HashMap::new(),
            last_activity: now,
            created_at: now,
            queue: VecDeque::new(),
            graph_state: Value::Object(Default::default()),
            seeded: false,
            announced: HashSet::new(),
        }
    }

    fn push_queue(&mut self, msg: Value) {
        if self.queue.len() >= REPLAY_QUEUE_CAPACITY {
            self.queue.pop_front();
        }
        self.queue.push_back(msg);
    }
}

#[derive(Clone)]
pub struct WorldRegistry {
    rooms: Arc<RwLock<HashMap<String, Arc<RwLock<WorldRoom>>>>>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// `world_key(session) = session.world_id ?: session.id` — the single
    /// resolver every hub/broadcast path must go through (§4.2).
    pub fn world_key(world_id: Option<&str>, session_id: &SessionId) -> String {
        world_id.unwrap_or_else(|| session_id.as_str()).to_owned()
    }

    fn room_for(&self, world_key: &str, now: i64) -> Arc<RwLock<WorldRoom>> {
        {
            let rooms = self.rooms.read();
            if let Some(room) = rooms.get(world_key) {
                return room.clone();
            }
        }
        let mut rooms = self.rooms.write();
        rooms
            .entry(world_key.to_owned())
            .or_insert_with(|| Arc::new(RwLock::new(WorldRoom::new(now))))
            .clone()
    }

    /// Idempotent on duplicate joins. Returns the live member count and the
    /// room's cached graph state, seeded empty on first-ever creation.
    pub fn join(&self, world_key: &str, client_id: ClientId, now_ms: i64) -> (usize, Value) {
        let room = self.room_for(world_key, now_ms);
        let mut room = room.write();
        room.clients.entry(client_id).or_insert(now_ms);
        room.last_activity = now_ms;
        (room.clients.len(), room.graph_state.clone())
    }

    pub fn leave(&self, world_key: &str, client_id: &ClientId, now_ms: i64) -> (bool, usize) {
        let Some(room) = self.rooms.read().get(world_key).cloned() else {
            return (false, 0);
        };
        let mut room = room.write();
        let was_present = room.clients.remove(client_id).is_some();
        room.last_activity = now_ms;
        (was_present, room.clients.len())
    }

    pub fn status(&self, world_key: &str, now_ms: i64) -> Option<RoomStatus> {
        let room = self.rooms.read().get(world_key).cloned()?;
        let room = room.read();
        Some(RoomStatus {
            active: !room.clients.is_empty(),
            clients: room.clients.len(),
            graph_summary: room.graph_state.clone(),
            uptime_ms: now_ms - room.created_at,
            queued_messages: room.queue.len(),
        })
    }

    /// Merges `updates` into the cached graph state and stamps
    /// `last_activity`. `atomic` is honored by construction: the whole
    /// merge happens under one room-lock acquisition.
    pub fn update_graph(&self, world_key: &str, updates: Value, now_ms: i64) -> usize {
        let room = self.room_for(world_key, now_ms);
        let mut room = room.write();
        merge_json(&mut room.graph_state, &updates);
        room.last_activity = now_ms;
        room.clients.len()
    }

    /// Flips a room's seeded flag from false to true and reports whether
    /// this call was the one to do it — the caller uses that to apply a
    /// world's seed file exactly once, at first join (spec §6).
    pub fn take_needs_seed(&self, world_key: &str, now_ms: i64) -> bool {
        let room = self.room_for(world_key, now_ms);
        let mut room = room.write();
        if room.seeded {
            false
        } else {
            room.seeded = true;
            true
        }
    }

    /// `true` the first time `session_id` is announced in this room, `false`
    /// on every subsequent call (including reconnects) — see `announced`.
    pub fn mark_announced(&self, world_key: &str, session_id: &SessionId, now_ms: i64) -> bool {
        let room = self.room_for(world_key, now_ms);
        room.write().announced.insert(session_id.clone())
    }

    pub fn enqueue_replay(&self, world_key: &str, message: Value, now_ms: i64) {
        let room = self.room_for(world_key, now_ms);
        room.write().push_queue(message);
    }

    pub fn replay_queue(&self, world_key: &str) -> Vec<Value> {
        self.rooms
            .read()
            .get(world_key)
            .map(|room| room.read().queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove rooms with no live clients whose last activity predates the
    /// inactivity threshold (§4.2 cleanup task).
    pub fn sweep_inactive(&self, now_ms: i64, inactivity_timeout: Duration) -> Vec<String> {
        let threshold_ms = inactivity_timeout.as_millis() as i64;
        let mut rooms = self.rooms.write();
        let stale: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| {
                let room = room.read();
                room.clients.is_empty() && now_ms - room.last_activity > threshold_ms
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            rooms.remove(key);
        }
        stale
    }
}

impl Default for WorldRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_json(base: &mut Value, updates: &Value) {
    match (base, updates) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (k, v) in update_map {
                merge_json(base_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (base_slot, v) => {
            *base_slot = v.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let registry = WorldRegistry::new();
        let client = ClientId("c1".into());
        let (n1, _) = registry.join("lobby", client.clone(), 0);
        let (n2, _) = registry.join("lobby", client, 0);
        assert_eq!(n1, 1);
        assert_eq!(n2, 1);
    }

    #[test]
    fn leave_reports_previous_presence() {
        let registry = WorldRegistry::new();
        let client = ClientId("c1".into());
        registry.join("lobby", client.clone(), 0);
        let (was_present, remaining) = registry.leave("lobby", &client, 1);
        assert!(was_present);
        assert_eq!(remaining, 0);
        let (was_present_again, _) = registry.leave("lobby", &client, 2);
        assert!(!was_present_again);
    }

    #[test]
    fn sweep_inactive_removes_only_empty_stale_rooms() {
        let registry = WorldRegistry::new();
        registry.join("empty-old", ClientId("c1".into()), 0);
        registry.leave("empty-old", &ClientId("c1".into()), 0);
        registry.join("populated", ClientId("c2".into()), 0);

        let removed = registry.sweep_inactive(10_000, Duration::from_millis(100));
        assert!(removed.contains(&"empty-old".to_owned()));
        assert!(!removed.contains(&"populated".to_owned()));
    }

    #[test]
    fn mark_announced_fires_only_once_per_session() {
        let registry = WorldRegistry::new();
        let session = SessionId("session-aaaaaaaa".into());
        assert!(registry.mark_announced("lobby", &session, 0));
        assert!(!registry.mark_announced("lobby", &session, 0));
    }

    #[test]
    fn take_needs_seed_fires_only_once() {
        let registry = WorldRegistry::new();
        assert!(registry.take_needs_seed("lobby", 0));
        assert!(!registry.take_needs_seed("lobby", 0));
        assert!(!registry.take_needs_seed("lobby", 0));
    }

    #[test]
    fn update_graph_merges_nested_objects() {
        let registry = WorldRegistry::new();
        registry.update_graph("lobby", serde_json::json!({"a": 1}), 0);
        registry.update_graph("lobby", serde_json::json!({"b": 2}), 0);
        let status = registry.status("lobby", 0).unwrap();
        assert_eq!(status.graph_summary, serde_json::json!({"a": 1, "b": 2}));
    }
}
