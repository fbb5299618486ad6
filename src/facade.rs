//! Capability interfaces external collaborators (REST entity-CRUD handlers)
//! consume, instead of being handed the hub as one opaque duck-typed value
//! (DESIGN NOTES §9). Each trait is a thin, purpose-specific seam; `Engine`
//! implements all three.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CoreError, StoreError};
use crate::ids::{ClientId, EntityId, SessionId};
use crate::model::{Entity, Session};

/// Session/entity CRUD — the out-of-core REST layer's only way to touch the
/// store (spec §4.1).
pub trait SessionFacade {
    fn create_session(&self) -> Session;
    fn get_session(&self, id: &SessionId) -> Result<Session, StoreError>;
    fn list_sessions(&self) -> Vec<Session>;
    fn delete_session(&self, id: &SessionId) -> bool;
    fn bind_world(&self, id: &SessionId, world_id: Option<String>) -> Result<(), StoreError>;
    /// Writes into the session's own entity list, then applies a matching
    /// `entity-mutate` delta into the sync protocol's world-scoped CRDT
    /// mirror so the entity also appears in every other observer's world
    /// snapshot (spec §8 scenario 1, §4.3).
    fn add_entity(&self, session_id: &SessionId, entity: Entity) -> Result<(), CoreError>;
    fn get_entity(&self, session_id: &SessionId, entity_id: &EntityId) -> Result<Entity, StoreError>;
    fn delete_entity(&self, session_id: &SessionId, entity_id: &EntityId) -> bool;
    fn list_entities(&self, session_id: &SessionId) -> Result<Vec<Entity>, StoreError>;
}

/// Session-local and world-scoped fan-out (spec §4.7, §6). Both accept an
/// optional excluded client for the fabric's exclude-sender semantics.
pub trait BroadcastFacade {
    fn broadcast_to_session(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: Value,
        exclude: Option<&ClientId>,
    );
    fn broadcast_to_world(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: Value,
        exclude: Option<&ClientId>,
    );
}

/// Sync-protocol-mediated changes REST handlers trigger directly, without a
/// loopback HTTP call to the server's own API (spec §6, DESIGN NOTES §9).
#[async_trait]
pub trait SyncFacade {
    async fn apply_avatar_movement(
        &self,
        session_id: SessionId,
        position: [f64; 3],
        rotation: [f64; 4],
    );

    /// Sends a full snapshot to a newly associated client and joins it to
    /// its world's room (spec §6 `synchronize_new_client`).
    async fn synchronize_new_client(&self, client_id: crate::ids::ClientId, session_id: SessionId);
}
