//! Connection Hub (C5, spec §4.4).
//!
//! Register/unregister/associate are plain synchronous writes under the
//! connections `RwLock` — there is no reason to serialize housekeeping
//! through a channel, and doing so would make a caller's very next read
//! racy against a task it never yields to. Broadcast is different: it's the
//! path the spec singles out ("the hub never holds a user-level mutex while
//! sending on channels"), so it goes through one event channel drained by a
//! single-writer loop task, keeping outbound sends off of any lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::HubError;
use crate::ids::{ClientId, SessionId};
use crate::model::ClientInfo;
use crate::wire::Frame;

struct Connection {
    session_id: Option<SessionId>,
    outbound: flume::Sender<bytes::Bytes>,
    client_info: Option<ClientInfo>,
    last_seen: i64,
}

/// What a broadcast should reach.
#[derive(Debug, Clone)]
pub enum Targets {
    All,
    Clients(Vec<ClientId>),
}

struct BroadcastEvent {
    frame: Frame,
    targets: Targets,
}

#[derive(Clone)]
pub struct Hub {
    connections: Arc<RwLock<HashMap<ClientId, Connection>>>,
    events: flume::Sender<BroadcastEvent>,
}

impl Hub {
    /// Spawns the single-writer broadcast loop and returns a cheap-to-clone
    /// handle. `queue_size` bounds the event channel
    /// (`broadcast_global_queue_size`, spec §6).
    pub fn spawn(queue_size: usize) -> Self {
        let connections: Arc<RwLock<HashMap<ClientId, Connection>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = flume::bounded(queue_size);

        let loop_connections = connections.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                deliver(&loop_connections, &event.frame, &event.targets);
            }
            debug!("hub broadcast loop exiting: channel closed");
        });

        Self { connections, events: tx }
    }

    pub fn register(&self, client_id: ClientId, outbound: flume::Sender<bytes::Bytes>) {
        self.connections.write().insert(
            client_id.clone(),
            Connection {
                session_id: None,
                outbound,
                client_info: None,
                last_seen: crate::ids::now_millis(),
            },
        );
        info!(%client_id, "connection registered");
    }

    pub fn unregister(&self, client_id: ClientId) {
        if self.connections.write().remove(&client_id).is_some() {
            info!(%client_id, "connection unregistered");
        }
    }

    pub fn associate_session(&self, client_id: ClientId, session_id: SessionId) {
        if let Some(conn) = self.connections.write().get_mut(&client_id) {
            conn.session_id = Some(session_id);
        }
    }

    pub fn session_of(&self, client_id: &ClientId) -> Option<SessionId> {
        self.connections
            .read()
            .get(client_id)
            .and_then(|c| c.session_id.clone())
    }

    /// Records a `client_info` frame's capability/screen payload and refreshes
    /// last-seen (spec §4.5 table: `client_info` "Update per-connection
    /// capability/screen record, refresh last-seen").
    pub fn update_client_info(&self, client_id: &ClientId, info: ClientInfo) {
        if let Some(conn) = self.connections.write().get_mut(client_id) {
            conn.client_info = Some(info);
            conn.last_seen = crate::ids::now_millis();
        }
    }

    /// Refreshes last-seen without touching the capability record (spec
    /// §4.5 table: `interaction` "Update last-seen").
    pub fn touch_last_seen(&self, client_id: &ClientId) {
        if let Some(conn) = self.connections.write().get_mut(client_id) {
            conn.last_seen = crate::ids::now_millis();
        }
    }

    pub fn client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        self.connections
            .read()
            .get(client_id)
            .and_then(|c| c.client_info.clone())
    }

    pub fn last_seen(&self, client_id: &ClientId) -> Option<i64> {
        self.connections.read().get(client_id).map(|c| c.last_seen)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Every connection whose hub record is bound to `session_id`.
    pub fn clients_for_session(&self, session_id: &SessionId) -> Vec<ClientId> {
        self.connections
            .read()
            .iter()
            .filter(|(_, c)| c.session_id.as_ref() == Some(session_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Fire-and-forget broadcast submission; the loop task does the actual
    /// per-connection `try_send`/eviction.
    pub(crate) fn submit_broadcast(&self, frame: Frame, targets: Targets) {
        let _ = self.events.send(BroadcastEvent { frame, targets });
    }

    /// Synchronous direct delivery, used by tests and by broadcast paths
    /// that want delivery to have happened before returning (avoids a race
    /// against the async loop in the end-to-end scenarios of §8).
    pub(crate) fn deliver_now(&self, frame: &Frame, targets: &Targets) {
        deliver(&self.connections, frame, targets);
    }
}

fn deliver(
    connections: &Arc<RwLock<HashMap<ClientId, Connection>>>,
    frame: &Frame,
    targets: &Targets,
) {
    // Encode once (§4.7 "encode it once, and reuse the bytes"): `bytes::Bytes`
    // clones are an atomic refcount bump, so every recipient gets the same
    // buffer instead of a fresh `serde_json::to_vec` each.
    let bytes = match frame.encode().map_err(HubError::from) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, kind = %frame.kind, "failed to encode frame, dropping broadcast");
            return;
        }
    };

    let snapshot: Vec<(ClientId, flume::Sender<bytes::Bytes>)> = {
        let guard = connections.read();
        match targets {
            Targets::All => guard
                .iter()
                .map(|(id, c)| (id.clone(), c.outbound.clone()))
                .collect(),
            Targets::Clients(ids) => ids
                .iter()
                .filter_map(|id| guard.get(id).map(|c| (id.clone(), c.outbound.clone())))
                .collect(),
        }
    };

    let mut dropped = Vec::new();
    for (client_id, outbound) in snapshot {
        if outbound.try_send(bytes.clone()).is_err() {
            warn!(%client_id, "outbound queue full, dropping slow consumer");
            dropped.push(client_id);
        }
    }
    if !dropped.is_empty() {
        let mut guard = connections.write();
        for client_id in dropped {
            guard.remove(&client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: bytes::Bytes) -> Frame {
        Frame::decode(std::str::from_utf8(&bytes).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn register_then_broadcast_all_reaches_connection() {
        let hub = Hub::spawn(16);
        let (tx, rx) = flume::bounded(4);
        hub.register(ClientId("c1".into()), tx);

        hub.deliver_now(&Frame::new("ping", serde_json::json!({})), &Targets::All);
        let received = decode(rx.try_recv().unwrap());
        assert_eq!(received.kind, "ping");
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted() {
        let hub = Hub::spawn(16);
        let (tx, _rx) = flume::bounded(1); // capacity 1, never drained
        hub.register(ClientId("slow".into()), tx);

        let frame = Frame::new("graph_updated", serde_json::json!({}));
        hub.deliver_now(&frame, &Targets::All); // fills the queue
        hub.deliver_now(&frame, &Targets::All); // queue full -> eviction

        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn unregister_removes_connection() {
        let hub = Hub::spawn(16);
        let (tx, _rx) = flume::bounded(4);
        hub.register(ClientId("c1".into()), tx);
        assert_eq!(hub.connection_count(), 1);

        hub.unregister(ClientId("c1".into()));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn registering_same_client_twice_is_a_no_op() {
        let hub = Hub::spawn(16);
        let (tx1, _rx1) = flume::bounded(4);
        let (tx2, rx2) = flume::bounded(4);
        hub.register(ClientId("c1".into()), tx1);
        hub.register(ClientId("c1".into()), tx2); // replaces, doesn't duplicate

        assert_eq!(hub.connection_count(), 1);
        hub.deliver_now(&Frame::new("ping", serde_json::json!({})), &Targets::All);
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn submit_broadcast_reaches_connection_after_one_tick() {
        let hub = Hub::spawn(16);
        let (tx, rx) = flume::bounded(4);
        hub.register(ClientId("c1".into()), tx);

        hub.submit_broadcast(Frame::new("ping", serde_json::json!({})), Targets::All);
        tokio::task::yield_now().await;

        assert_eq!(decode(rx.try_recv().unwrap()).kind, "ping");
    }

    #[tokio::test]
    async fn client_info_updates_record_and_last_seen() {
        let hub = Hub::spawn(16);
        let (tx, _rx) = flume::bounded(4);
        hub.register(ClientId("c1".into()), tx);
        assert!(hub.client_info(&ClientId("c1".into())).is_none());

        let info = crate::model::ClientInfo {
            capabilities: vec!["webgl2".to_owned()],
            screen_width: Some(1920),
            screen_height: Some(1080),
        };
        hub.update_client_info(&ClientId("c1".into()), info.clone());

        assert_eq!(hub.client_info(&ClientId("c1".into())), Some(info));
        assert!(hub.last_seen(&ClientId("c1".into())).is_some());
    }

    #[tokio::test]
    async fn touch_last_seen_refreshes_without_clearing_client_info() {
        let hub = Hub::spawn(16);
        let (tx, _rx) = flume::bounded(4);
        let client_id = ClientId("c1".into());
        hub.register(client_id.clone(), tx);

        let info = crate::model::ClientInfo::default();
        hub.update_client_info(&client_id, info.clone());
        hub.touch_last_seen(&client_id);

        assert_eq!(hub.client_info(&client_id), Some(info));
    }
}
