//! Data model shared across the core (spec §3).

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::VectorClock;
use crate::ids::{ClientId, DeltaId, EntityId, SessionId};

/// Tag marking an entity as the avatar belonging to its session (§3).
pub const SESSION_AVATAR_TAG: &str = "session-avatar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Reaped,
}

/// A server-side container for one logical participant (§3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: i64,
    pub status: SessionStatus,
    /// I2: at most one world at a time. `None` means the world key falls
    /// back to the session's own ID.
    pub world_id: Option<String>,
    pub entities: HashMap<EntityId, Entity>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            created_at: now_millis(),
            status: SessionStatus::Active,
            world_id: None,
            entities: HashMap::new(),
        }
    }

    /// `world_key(session) = session.world_id ?: session.id` — the single
    /// source of truth every hub/broadcast path must resolve through (§4.2).
    pub fn world_key(&self) -> &str {
        self.world_id.as_deref().unwrap_or(self.id.as_str())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// A 3D object: opaque component bag plus the bookkeeping fields the store
/// owns directly. The bag stays untyped (`HashMap<String, Value>`) because
/// its schema is client-driven (DESIGN NOTES §9); everything else here is a
/// typed field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub components: HashMap<String, Value>,
    pub tags: HashSet<String>,
    pub enabled: bool,
    pub created_at: i64,
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            components: HashMap::new(),
            tags: HashSet::new(),
            enabled: true,
            created_at: now_millis(),
        }
    }

    pub fn is_avatar(&self) -> bool {
        self.tags.contains(SESSION_AVATAR_TAG)
    }

    pub fn transform(&self) -> Option<&Value> {
        self.components.get("transform")
    }

    pub fn set_transform(&mut self, position: [f64; 3], rotation: [f64; 4]) {
        self.components.insert(
            "transform".to_owned(),
            serde_json::json!({ "position": position, "rotation": rotation }),
        );
    }
}

/// Per-connection capability/screen record carried by a `client_info` frame
/// (spec §4.5, SPEC_FULL.md §3 "modeled as explicit serde-derived structs").
/// Unrecognized/missing fields default rather than reject the frame, since
/// `client_info` has no failure semantics in the §4.5 table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub screen_width: Option<u32>,
    #[serde(default)]
    pub screen_height: Option<u32>,
}

/// Per-session avatar bookkeeping, owned by the sync protocol (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Avatar {
    pub session_id: SessionId,
    pub world_id: String,
    pub position: [f64; 3],
    pub rotation: [f64; 4],
    pub last_update: i64,
}

/// The kind of a delta's payload (§3, §4.3 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeltaKind {
    AvatarMove,
    EntityMutate,
}

impl DeltaKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            DeltaKind::AvatarMove => "avatar-move",
            DeltaKind::EntityMutate => "entity-mutate",
        }
    }
}

/// A single causally-ordered, checksummed state change (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub id: DeltaId,
    pub client_id: ClientId,
    pub kind: DeltaKind,
    pub payload: Value,
    pub clock: VectorClock,
    pub timestamp_ns: i64,
    pub checksum: String,
}

impl Delta {
    /// Recompute the checksum from `(id, kind, payload, timestamp)` for the
    /// integrity check in `apply_delta` step 1.
    pub fn recompute_checksum(&self) -> String {
        let payload_bytes = serde_json::to_vec(&self.payload).unwrap_or_default();
        crate::ids::checksum(
            &self.id.0,
            self.kind.as_tag(),
            &payload_bytes,
            self.timestamp_ns,
        )
    }
}

/// Authoritative current state for one world (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub world_id: String,
    pub entities: Vec<Entity>,
    pub avatars: Vec<Avatar>,
    pub clock: VectorClock,
    pub version: u64,
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
