//! Sync Protocol (C3, spec §4.3) — HD1-VSC: vector clocks + delta-state CRDT
//! merge behind a single authoritative validator.
//!
//! One `RwLock<SyncState>` serializes every accept. Vector-clock math itself
//! (`VectorClock::next_clock`) is pure and lock-free (`clock.rs`); only the
//! compare-and-merge-and-apply step below runs under the lock, and this
//! module never calls back into the hub while holding it — broadcasts are
//! the caller's job once `apply_delta` returns (DESIGN NOTES §9, §5 lock
//! order: hub lock -> sync lock, never the reverse).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::VectorClock;
use crate::error::SyncError;
use crate::ids::{ClientId, EntityId, SessionId};
use crate::model::{Avatar, Delta, DeltaKind, Entity, WorldSnapshot};

/// Deterministic ID of the entity backing a session's avatar in a given
/// world's entity mirror. Derived rather than looked up, so an avatar-move
/// delta can maintain I6 without reaching back into the session store.
pub fn avatar_entity_id(session_id: &SessionId) -> EntityId {
    EntityId(format!("avatar-{session_id}"))
}

struct FieldRecord {
    value: serde_json::Value,
    clock: VectorClock,
    client_id: ClientId,
}

#[derive(Default)]
struct WorldMirror {
    entities: HashMap<EntityId, Entity>,
    /// Per (entity, component) provenance, for the CRDT tie-break (§4.3
    /// Conflict resolution): concurrent writes merge by picking the
    /// lexicographically greater client ID.
    field_provenance: HashMap<(EntityId, String), FieldRecord>,
}

struct SyncState {
    registered_clients: HashMap<ClientId, SessionId>,
    world_clock: VectorClock,
    world_version: u64,
    avatars: HashMap<SessionId, Avatar>,
    worlds: HashMap<String, WorldMirror>,
    /// Clock of the snapshot each session was handed at join time, for the
    /// late-join consistency corollary (§4.3c) — see `sessions_superseded`.
    join_floors: HashMap<SessionId, VectorClock>,
}

impl SyncState {
    fn mirror_mut(&mut self, world_id: &str) -> &mut WorldMirror {
        self.worlds.entry(world_id.to_owned()).or_default()
    }
}

#[derive(Clone)]
pub struct SyncProtocol {
    inner: Arc<RwLock<SyncState>>,
}

impl SyncProtocol {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SyncState {
                registered_clients: HashMap::new(),
                world_clock: VectorClock::new(),
                world_version: 0,
                avatars: HashMap::new(),
                worlds: HashMap::new(),
                join_floors: HashMap::new(),
            })),
        }
    }

    /// Idempotent. Called from `synchronize_new_client` alongside
    /// `Hub::associate_session` so the sync protocol's own notion of
    /// which session a client belongs to doesn't depend on the hub.
    pub fn register_client(&self, client_id: ClientId, session_id: SessionId) {
        self.inner
            .write()
            .registered_clients
            .insert(client_id, session_id);
    }

    /// Snapshot of the current global clock, for building a delta's vector
    /// clock without holding the sync lock across the caller's own work
    /// (spec §4.3 "Vector-clock construction").
    pub fn current_clock(&self) -> VectorClock {
        self.inner.read().world_clock.clone()
    }

    /// Apply a delta: checksum, causality, accept-and-merge, then apply the
    /// payload (§4.3 steps 1-4). Returns the (world_id, version) it was
    /// accepted into on success.
    pub fn apply_delta(&self, delta: &Delta, world_id: &str) -> Result<u64, SyncError> {
        if delta.recompute_checksum() != delta.checksum {
            return Err(SyncError::Integrity);
        }

        let mut state = self.inner.write();

        if !delta
            .clock
            .is_causally_admissible(&state.world_clock, &delta.client_id)
        {
            return Err(SyncError::Causality);
        }

        state.world_clock.merge(&delta.clock);
        state.world_version += 1;
        let version = state.world_version;

        match delta.kind {
            DeltaKind::AvatarMove => apply_avatar_move(&mut state, delta, world_id),
            DeltaKind::EntityMutate => apply_entity_mutate(&mut state, delta, world_id),
        }

        Ok(version)
    }

    /// Used when a session switches worlds (§4.2, §4.8): the prior avatar is
    /// cleared so it stops appearing in the old world's snapshots.
    pub fn clear_avatar_world(&self, session_id: &SessionId) {
        self.inner.write().avatars.remove(session_id);
    }

    /// Full, unfiltered state. Holds the read lock for the whole call so no
    /// delta can slip in between building the snapshot and the caller
    /// subscribing to live deltas (§4.3 late-join consistency).
    pub fn get_snapshot(&self) -> WorldSnapshot {
        let state = self.inner.read();
        let entities = state
            .worlds
            .values()
            .flat_map(|m| m.entities.values().cloned())
            .collect();
        WorldSnapshot {
            world_id: String::new(),
            entities,
            avatars: state.avatars.values().cloned().collect(),
            clock: state.world_clock.clone(),
            version: state.world_version,
        }
    }

    pub fn get_snapshot_for_world(&self, world_id: &str) -> WorldSnapshot {
        let state = self.inner.read();
        snapshot_for_world(&state, world_id)
    }

    /// Snapshot a world for a joining session and record the snapshot's
    /// clock as that session's join floor, atomically under one write lock
    /// (§4.3 late-join consistency: nothing may merge into this world
    /// between the snapshot being built and the floor being recorded).
    pub fn snapshot_and_register_join(&self, world_id: &str, session_id: &SessionId) -> WorldSnapshot {
        let mut state = self.inner.write();
        let snapshot = snapshot_for_world(&state, world_id);
        state.join_floors.insert(session_id.clone(), snapshot.clock.clone());
        snapshot
    }

    /// §4.3 late-join consistency corollary (c): true if `delta`'s clock is
    /// already dominated by `floor`, the clock of the snapshot a session was
    /// handed when it joined — meaning that session's snapshot already
    /// reflects this delta, so it must not receive it again as a live
    /// broadcast.
    pub fn is_superseded_by_snapshot(floor: &VectorClock, delta: &Delta) -> bool {
        delta.clock.le(floor)
    }

    /// Every session whose join floor already supersedes `delta`, for the
    /// caller to exclude from the live broadcast of that delta.
    pub fn sessions_superseded(&self, delta: &Delta) -> Vec<SessionId> {
        self.inner
            .read()
            .join_floors
            .iter()
            .filter(|(_, floor)| Self::is_superseded_by_snapshot(floor, delta))
            .map(|(session_id, _)| session_id.clone())
            .collect()
    }
}

fn snapshot_for_world(state: &SyncState, world_id: &str) -> WorldSnapshot {
    let entities = state
        .worlds
        .get(world_id)
        .map(|m| m.entities.values().cloned().collect())
        .unwrap_or_default();
    let avatars = state
        .avatars
        .values()
        .filter(|a| a.world_id == world_id)
        .cloned()
        .collect();
    WorldSnapshot {
        world_id: world_id.to_owned(),
        entities,
        avatars,
        clock: state.world_clock.clone(),
        version: state.world_version,
    }
}

impl Default for SyncProtocol {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_avatar_move(state: &mut SyncState, delta: &Delta, world_id: &str) {
    let Some(session_id) = delta
        .payload
        .get("session_id")
        .and_then(|v| v.as_str())
        .map(|s| SessionId(s.to_owned()))
    else {
        return;
    };
    let position = parse_vec3(delta.payload.get("position"));
    let rotation = parse_vec4(delta.payload.get("rotation"));

    let avatar = state
        .avatars
        .entry(session_id.clone())
        .or_insert_with(|| Avatar {
            session_id: session_id.clone(),
            world_id: world_id.to_owned(),
            position,
            rotation,
            last_update: delta.timestamp_ns / 1_000_000,
        });
    avatar.world_id = world_id.to_owned();
    avatar.position = position;
    avatar.rotation = rotation;
    avatar.last_update = delta.timestamp_ns / 1_000_000;

    // I6: the backing entity's transform must equal the avatar's transform.
    let entity_id = avatar_entity_id(&session_id);
    let mirror = state.mirror_mut(world_id);
    let entity = mirror
        .entities
        .entry(entity_id.clone())
        .or_insert_with(|| {
            let mut e = Entity::new(entity_id.clone(), format!("avatar-{session_id}"));
            e.tags.insert(crate::model::SESSION_AVATAR_TAG.to_owned());
            e
        });
    entity.set_transform(position, rotation);
}

fn apply_entity_mutate(state: &mut SyncState, delta: &Delta, world_id: &str) {
    let Some(entity_id) = delta
        .payload
        .get("entity_id")
        .and_then(|v| v.as_str())
        .map(EntityId::from)
    else {
        return;
    };
    let name = delta
        .payload
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let components = delta
        .payload
        .get("components")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    let mirror = state.mirror_mut(world_id);
    let entity = mirror
        .entities
        .entry(entity_id.clone())
        .or_insert_with(|| Entity::new(entity_id.clone(), name.clone().unwrap_or_default()));
    if let Some(name) = name {
        entity.name = name;
    }

    for (component, value) in components {
        let key = (entity_id.clone(), component.clone());
        let winner = match mirror.field_provenance.get(&key) {
            None => true,
            Some(existing) => {
                if existing.clock.le(&delta.clock) {
                    true
                } else if delta.clock.le(&existing.clock) {
                    false
                } else {
                    // Genuinely concurrent: deterministic tie-break (§4.3).
                    delta.client_id > existing.client_id
                }
            }
        };
        if winner {
            entity.components.insert(component.clone(), value.clone());
            mirror.field_provenance.insert(
                key,
                FieldRecord {
                    value,
                    clock: delta.clock.clone(),
                    client_id: delta.client_id.clone(),
                },
            );
        }
    }
}

fn parse_vec3(v: Option<&serde_json::Value>) -> [f64; 3] {
    let arr = v.and_then(|v| v.as_array());
    let get = |i: usize| arr.and_then(|a| a.get(i)).and_then(|v| v.as_f64()).unwrap_or(0.0);
    [get(0), get(1), get(2)]
}

fn parse_vec4(v: Option<&serde_json::Value>) -> [f64; 4] {
    let arr = v.and_then(|v| v.as_array());
    let get = |i: usize| arr.and_then(|a| a.get(i)).and_then(|v| v.as_f64()).unwrap_or(0.0);
    [get(0), get(1), get(2), get(3)]
}
