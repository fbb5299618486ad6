//! Broadcast Fabric (C7, spec §4.7): three fan-out modes over the hub.

use serde_json::Value;

use crate::hub::{Hub, Targets};
use crate::ids::{ClientId, SessionId};
use crate::store::SessionStore;
use crate::wire::Frame;
use crate::world::WorldRegistry;

#[derive(Clone)]
pub struct BroadcastFabric {
    hub: Hub,
    store: SessionStore,
}

impl BroadcastFabric {
    pub fn new(hub: Hub, store: SessionStore) -> Self {
        Self { hub, store }
    }

    pub fn broadcast_all(&self, frame: Frame) {
        self.hub.submit_broadcast(frame, Targets::All);
    }

    pub fn broadcast_to_session(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: Value,
        exclude: Option<&ClientId>,
    ) {
        let frame = Frame::new(kind, payload).with_session(session_id.as_str());
        let targets = filter_excluded(self.hub.clients_for_session(session_id), exclude);
        self.hub.submit_broadcast(frame, Targets::Clients(targets));
    }

    /// Resolves `world_key(session_id)`, finds every session sharing that
    /// world key, then every connection bound to any of those sessions, and
    /// dedupes so each connection gets the frame at most once (§4.7) — used
    /// for avatar updates so participants see each other across session
    /// boundaries.
    pub fn broadcast_to_world(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: Value,
        exclude: Option<&ClientId>,
    ) {
        self.broadcast_to_world_excluding(session_id, kind, payload, exclude, &[]);
    }

    /// Same as [`Self::broadcast_to_world`], but also omits every session
    /// listed in `exclude_sessions` — used to enforce the late-join
    /// consistency corollary (§4.3c): a session whose join snapshot already
    /// reflects a given delta must not receive it again as a live broadcast.
    pub fn broadcast_to_world_excluding(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: Value,
        exclude: Option<&ClientId>,
        exclude_sessions: &[SessionId],
    ) {
        let Ok(session) = self.store.get_session(session_id) else {
            return;
        };
        let world_key = WorldRegistry::world_key(session.world_id.as_deref(), &session.id);

        let mut targets = Vec::new();
        for other in self.store.list_sessions() {
            if exclude_sessions.contains(&other.id) {
                continue;
            }
            let other_key = WorldRegistry::world_key(other.world_id.as_deref(), &other.id);
            if other_key == world_key {
                targets.extend(self.hub.clients_for_session(&other.id));
            }
        }
        targets.sort();
        targets.dedup();
        let targets = filter_excluded(targets, exclude);

        let frame = Frame::new(kind, payload)
            .with_session(session_id.as_str())
            .with_world(world_key);
        self.hub.submit_broadcast(frame, Targets::Clients(targets));
    }
}

fn filter_excluded(targets: Vec<ClientId>, exclude: Option<&ClientId>) -> Vec<ClientId> {
    match exclude {
        Some(excluded) => targets.into_iter().filter(|c| c != excluded).collect(),
        None => targets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_to_world_reaches_peers_across_sessions() {
        let hub = Hub::spawn(16);
        let store = SessionStore::new();
        let fabric = BroadcastFabric::new(hub.clone(), store.clone());

        let s1 = store.create_session();
        let s2 = store.create_session();
        store.bind_world(&s1.id, Some("lobby".into())).unwrap();
        store.bind_world(&s2.id, Some("lobby".into())).unwrap();

        let (tx1, rx1) = flume::bounded(4);
        let (tx2, rx2) = flume::bounded(4);
        hub.register(ClientId("c1".into()), tx1);
        hub.register(ClientId("c2".into()), tx2);
        hub.associate_session(ClientId("c1".into()), s1.id.clone());
        hub.associate_session(ClientId("c2".into()), s2.id.clone());

        fabric.broadcast_to_world(&s1.id, "avatar_position_update", serde_json::json!({}), None);
        tokio::task::yield_now().await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_to_world_excludes_sender() {
        let hub = Hub::spawn(16);
        let store = SessionStore::new();
        let fabric = BroadcastFabric::new(hub.clone(), store.clone());

        let s1 = store.create_session();
        let s2 = store.create_session();
        store.bind_world(&s1.id, Some("lobby".into())).unwrap();
        store.bind_world(&s2.id, Some("lobby".into())).unwrap();

        let c1 = ClientId("c1".into());
        let c2 = ClientId("c2".into());
        let (tx1, rx1) = flume::bounded(4);
        let (tx2, rx2) = flume::bounded(4);
        hub.register(c1.clone(), tx1);
        hub.register(c2, tx2);
        hub.associate_session(c1.clone(), s1.id.clone());
        hub.associate_session(ClientId("c2".into()), s2.id.clone());

        fabric.broadcast_to_world(
            &s1.id,
            "avatar_position_update",
            serde_json::json!({}),
            Some(&c1),
        );
        tokio::task::yield_now().await;

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_to_session_does_not_reach_other_sessions() {
        let hub = Hub::spawn(16);
        let store = SessionStore::new();
        let fabric = BroadcastFabric::new(hub.clone(), store.clone());

        let s1 = store.create_session();
        let s2 = store.create_session();

        let (tx1, rx1) = flume::bounded(4);
        let (tx2, rx2) = flume::bounded(4);
        hub.register(ClientId("c1".into()), tx1);
        hub.register(ClientId("c2".into()), tx2);
        hub.associate_session(ClientId("c1".into()), s1.id.clone());
        hub.associate_session(ClientId("c2".into()), s2.id.clone());

        fabric.broadcast_to_session(&s1.id, "graph_updated", serde_json::json!({}), None);
        tokio::task::yield_now().await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_world_excluding_skips_listed_sessions() {
        let hub = Hub::spawn(16);
        let store = SessionStore::new();
        let fabric = BroadcastFabric::new(hub.clone(), store.clone());

        let s1 = store.create_session();
        let s2 = store.create_session();
        store.bind_world(&s1.id, Some("lobby".into())).unwrap();
        store.bind_world(&s2.id, Some("lobby".into())).unwrap();

        let (tx1, rx1) = flume::bounded(4);
        let (tx2, rx2) = flume::bounded(4);
        hub.register(ClientId("c1".into()), tx1);
        hub.register(ClientId("c2".into()), tx2);
        hub.associate_session(ClientId("c1".into()), s1.id.clone());
        hub.associate_session(ClientId("c2".into()), s2.id.clone());

        fabric.broadcast_to_world_excluding(
            &s1.id,
            "avatar_position_update",
            serde_json::json!({}),
            None,
            &[s2.id.clone()],
        );
        tokio::task::yield_now().await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
