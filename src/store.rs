//! Session Store (C2, spec §4.1).
//!
//! A single `RwLock` over the session map: readers run in parallel, writers
//! are serialized — exactly the policy §5 asks for, and each mutating method
//! takes the write lock for its whole body, so every operation is atomic at
//! session granularity. The store never broadcasts; callers do that after a
//! store call returns (§4.1, DESIGN NOTES §9 — no internal HTTP loopback,
//! direct calls only).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::ids::{EntityId, SessionId};
use crate::model::{Entity, Session, SessionStatus};

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn create_session(&self) -> Session {
        let session = Session::new();
        self.inner
            .write()
            .insert(session.id.clone(), session.clone());
        session
    }

    pub fn get_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.inner
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.inner.read().values().cloned().collect()
    }

    pub fn delete_session(&self, id: &SessionId) -> bool {
        self.inner.write().remove(id).is_some()
    }

    pub fn bind_world(&self, id: &SessionId, world_id: Option<String>) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let session = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))?;
        session.world_id = world_id;
        Ok(())
    }

    pub fn add_entity(&self, session_id: &SessionId, entity: Entity) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;
        if session.entities.contains_key(&entity.id) {
            return Err(StoreError::DuplicateEntity(
                entity.id.clone(),
                session_id.clone(),
            ));
        }
        session.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    pub fn get_entity(
        &self,
        session_id: &SessionId,
        entity_id: &EntityId,
    ) -> Result<Entity, StoreError> {
        let guard = self.inner.read();
        let session = guard
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;
        session
            .entities
            .get(entity_id)
            .cloned()
            .ok_or_else(|| StoreError::EntityNotFound(entity_id.clone(), session_id.clone()))
    }

    pub fn update_entity(
        &self,
        session_id: &SessionId,
        entity_id: &EntityId,
        f: impl FnOnce(&mut Entity),
    ) -> Result<Entity, StoreError> {
        let mut guard = self.inner.write();
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;
        let entity = session
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| StoreError::EntityNotFound(entity_id.clone(), session_id.clone()))?;
        f(entity);
        Ok(entity.clone())
    }

    pub fn delete_entity(&self, session_id: &SessionId, entity_id: &EntityId) -> bool {
        self.inner
            .write()
            .get_mut(session_id)
            .map(|s| s.entities.remove(entity_id).is_some())
            .unwrap_or(false)
    }

    pub fn list_entities(&self, session_id: &SessionId) -> Result<Vec<Entity>, StoreError> {
        let guard = self.inner.read();
        let session = guard
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;
        Ok(session.entities.values().cloned().collect())
    }

    /// Reap sessions older than `threshold_ms` that have no live connections,
    /// per the cleanup policy in §4.2 ("preserves the session only if it has
    /// its own live connections" — the world being populated does not save
    /// it; see DESIGN.md Open Question).
    pub fn reap_inactive(&self, now_ms: i64, threshold_ms: i64, has_live: impl Fn(&SessionId) -> bool) -> Vec<SessionId> {
        let mut guard = self.inner.write();
        let stale: Vec<SessionId> = guard
            .values()
            .filter(|s| {
                s.status == SessionStatus::Active
                    && now_ms - s.created_at > threshold_ms
                    && !has_live(&s.id)
            })
            .map(|s| s.id.clone())
            .collect();
        for id in &stale {
            guard.remove(id);
        }
        stale
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get_session() {
        let store = SessionStore::new();
        let session = store.create_session();
        let fetched = store.get_session(&session.id).unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[test]
    fn duplicate_entity_rejected() {
        let store = SessionStore::new();
        let session = store.create_session();
        let entity = Entity::new(EntityId::from("e1"), "box");
        store.add_entity(&session.id, entity.clone()).unwrap();
        let err = store.add_entity(&session.id, entity).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEntity(_, _)));
    }

    #[test]
    fn delete_session_reports_presence() {
        let store = SessionStore::new();
        let session = store.create_session();
        assert!(store.delete_session(&session.id));
        assert!(!store.delete_session(&session.id));
    }

    #[test]
    fn reap_inactive_respects_live_connections() {
        let store = SessionStore::new();
        let s1 = store.create_session();
        let s2 = store.create_session();

        let reaped = store.reap_inactive(1_000_000, 1000, |id| *id == s2.id);
        assert!(reaped.contains(&s1.id));
        assert!(!reaped.contains(&s2.id));
        assert!(store.get_session(&s1.id).is_err());
        assert!(store.get_session(&s2.id).is_ok());
    }
}
