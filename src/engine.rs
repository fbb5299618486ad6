//! Composition root: wires C1-C7 together and implements the capability
//! facades external collaborators consume (§6, DESIGN NOTES §9). Also owns
//! the periodic reap task (§4.2, §5).

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::VectorClock;
use crate::config::Config;
use crate::error::{CoreError, StoreError};
use crate::facade::{BroadcastFacade, SessionFacade, SyncFacade};
use crate::hub::{Hub, Targets};
use crate::ids::{ClientId, DeltaId, EntityId, SessionId};
use crate::model::{Delta, DeltaKind, Entity, Session};
use crate::store::SessionStore;
use crate::sync::SyncProtocol;
use crate::wire::{server_tags, Frame};
use crate::world::WorldRegistry;

#[derive(Clone)]
pub struct Engine {
    pub config: Config,
    pub store: SessionStore,
    pub world: WorldRegistry,
    pub sync: SyncProtocol,
    pub hub: Hub,
    pub broadcast: crate::broadcast::BroadcastFabric,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let store = SessionStore::new();
        let world = WorldRegistry::new();
        let sync = SyncProtocol::new();
        let hub = Hub::spawn(config.broadcast_global_queue_size);
        let broadcast = crate::broadcast::BroadcastFabric::new(hub.clone(), store.clone());
        Self {
            config,
            store,
            world,
            sync,
            hub,
            broadcast,
        }
    }

    /// Spawns the periodic world/session cleanup task (§4.2).
    pub fn spawn_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let interval = engine.config.session_cleanup_interval();
        let timeout = engine.config.session_inactivity_timeout();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = crate::ids::now_millis();
                let removed_rooms = engine.world.sweep_inactive(now, timeout);
                for room in &removed_rooms {
                    info!(world_key = %room, "reaped empty inactive world room");
                }
                let removed_sessions = engine
                    .store
                    .reap_inactive(now, timeout.as_millis() as i64, |id| {
                        !engine.hub.clients_for_session(id).is_empty()
                    });
                for session in &removed_sessions {
                    info!(%session, "reaped inactive session");
                }
            }
        })
    }

    /// The `client_id` used for the vector clock slot of deltas originating
    /// outside the websocket protocol (REST-triggered moves via
    /// `apply_avatar_movement`). Deterministic so repeated REST calls for
    /// the same session form one causal chain.
    fn rest_client_id(session_id: &SessionId) -> ClientId {
        ClientId(format!("rest-{session_id}"))
    }

    fn world_key_of(&self, session_id: &SessionId) -> Option<String> {
        let session = self.store.get_session(session_id).ok()?;
        Some(WorldRegistry::world_key(
            session.world_id.as_deref(),
            &session.id,
        ))
    }

    /// Applies `<world_seeds_dir>/<world_id>.yaml` the first time a *named*
    /// world's room is created (spec §6). Ambient worlds (no explicit
    /// `world_id`, falling back to the session's own ID) are never seeded.
    /// Missing seed files are normal — seeding is opt-in per world.
    fn maybe_apply_world_seed(&self, session_id: &SessionId, world_key: &str, now: i64) {
        let Some(seeds_dir) = &self.config.world_seeds_dir else {
            return;
        };
        let Ok(session) = self.store.get_session(session_id) else {
            return;
        };
        if session.world_id.is_none() {
            return;
        }
        if !self.world.take_needs_seed(world_key, now) {
            return;
        }

        let path = seeds_dir.join(format!("{world_key}.yaml"));
        match crate::seed::load_world_seed_file(&path) {
            Ok(world_seed) => {
                crate::seed::apply_world_seed(&self.store, session_id, &world_seed);
                self.world.update_graph(
                    world_key,
                    serde_json::json!({ "scene": world_seed.scene }),
                    now,
                );
                info!(%world_key, path = %path.display(), "applied world seed");
            }
            Err(e) => {
                debug!(%world_key, path = %path.display(), error = %e, "no world seed applied");
            }
        }
    }

    /// Applies an `entity-mutate` delta for `entity` into the sync
    /// protocol's world-scoped CRDT mirror and broadcasts the result,
    /// mirroring `apply_avatar_movement`'s delta-construction shape
    /// (§4.3 step 4, §8 scenario 1). Rejections are logged, not surfaced,
    /// same as an avatar-move delta's rejection.
    fn apply_entity_mutation(&self, session_id: &SessionId, entity: &Entity) {
        let Some(world_key) = self.world_key_of(session_id) else {
            warn!(%session_id, "apply_entity_mutation: unknown session");
            return;
        };
        let client_id = Self::rest_client_id(session_id);
        let clock = VectorClock::next_clock(&self.sync.current_clock(), &client_id);
        let payload = serde_json::json!({
            "entity_id": entity.id.0,
            "name": entity.name,
            "components": entity.components,
        });
        let payload_bytes = serde_json::to_vec(&payload).unwrap_or_default();
        let timestamp_ns = crate::ids::now_millis() * 1_000_000;
        let id = DeltaId::new(DeltaKind::EntityMutate.as_tag(), &client_id);
        let checksum = crate::ids::checksum(
            &id.0,
            DeltaKind::EntityMutate.as_tag(),
            &payload_bytes,
            timestamp_ns,
        );
        let delta = Delta {
            id,
            client_id,
            kind: DeltaKind::EntityMutate,
            payload,
            clock,
            timestamp_ns,
            checksum,
        };

        match self.sync.apply_delta(&delta, &world_key) {
            Ok(_version) => {
                let exclude_sessions = self.sync.sessions_superseded(&delta);
                self.broadcast.broadcast_to_world_excluding(
                    session_id,
                    server_tags::GRAPH_UPDATED,
                    serde_json::json!({"entity_id": entity.id.0}),
                    None,
                    &exclude_sessions,
                );
            }
            Err(rejection) => {
                warn!(%session_id, ?rejection, "entity mutation delta rejected");
            }
        }
    }
}

impl SessionFacade for Engine {
    fn create_session(&self) -> Session {
        self.store.create_session()
    }

    fn get_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.store.get_session(id)
    }

    fn list_sessions(&self) -> Vec<Session> {
        self.store.list_sessions()
    }

    fn delete_session(&self, id: &SessionId) -> bool {
        self.store.delete_session(id)
    }

    fn bind_world(&self, id: &SessionId, world_id: Option<String>) -> Result<(), StoreError> {
        // §4.8: binding to a (possibly different) world clears the prior
        // avatar so it stops appearing in the old world's snapshot.
        self.sync.clear_avatar_world(id);
        self.store.bind_world(id, world_id)
    }

    fn add_entity(&self, session_id: &SessionId, entity: Entity) -> Result<(), CoreError> {
        self.store.add_entity(session_id, entity.clone())?;
        self.apply_entity_mutation(session_id, &entity);
        Ok(())
    }

    fn get_entity(&self, session_id: &SessionId, entity_id: &EntityId) -> Result<Entity, StoreError> {
        self.store.get_entity(session_id, entity_id)
    }

    fn delete_entity(&self, session_id: &SessionId, entity_id: &EntityId) -> bool {
        self.store.delete_entity(session_id, entity_id)
    }

    fn list_entities(&self, session_id: &SessionId) -> Result<Vec<Entity>, StoreError> {
        self.store.list_entities(session_id)
    }
}

impl BroadcastFacade for Engine {
    fn broadcast_to_session(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: Value,
        exclude: Option<&ClientId>,
    ) {
        self.broadcast
            .broadcast_to_session(session_id, kind, payload, exclude);
    }

    fn broadcast_to_world(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: Value,
        exclude: Option<&ClientId>,
    ) {
        self.broadcast
            .broadcast_to_world(session_id, kind, payload, exclude);
    }
}

#[async_trait]
impl SyncFacade for Engine {
    async fn apply_avatar_movement(
        &self,
        session_id: SessionId,
        position: [f64; 3],
        rotation: [f64; 4],
    ) {
        let Some(world_key) = self.world_key_of(&session_id) else {
            warn!(%session_id, "apply_avatar_movement: unknown session");
            return;
        };
        let client_id = Self::rest_client_id(&session_id);
        let clock = VectorClock::next_clock(&self.sync.current_clock(), &client_id);
        let payload = serde_json::json!({
            "session_id": session_id.as_str(),
            "position": position,
            "rotation": rotation,
        });
        let payload_bytes = serde_json::to_vec(&payload).unwrap_or_default();
        let timestamp_ns = crate::ids::now_millis() * 1_000_000;
        let id = DeltaId::new(DeltaKind::AvatarMove.as_tag(), &client_id);
        let checksum = crate::ids::checksum(
            &id.0,
            DeltaKind::AvatarMove.as_tag(),
            &payload_bytes,
            timestamp_ns,
        );
        let delta = Delta {
            id,
            client_id,
            kind: DeltaKind::AvatarMove,
            payload,
            clock,
            timestamp_ns,
            checksum,
        };

        match self.sync.apply_delta(&delta, &world_key) {
            Ok(_version) => {
                let exclude_sessions = self.sync.sessions_superseded(&delta);
                self.broadcast.broadcast_to_world_excluding(
                    &session_id,
                    server_tags::AVATAR_POSITION_UPDATE,
                    serde_json::json!({
                        "session_id": session_id.as_str(),
                        "position": position,
                        "rotation": rotation,
                    }),
                    None,
                    &exclude_sessions,
                );
            }
            Err(rejection) => {
                warn!(%session_id, ?rejection, "avatar movement delta rejected");
            }
        }
    }

    async fn synchronize_new_client(&self, client_id: ClientId, session_id: SessionId) {
        let Some(world_key) = self.world_key_of(&session_id) else {
            warn!(%session_id, "synchronize_new_client: unknown session, skipping world join");
            return;
        };

        self.hub.associate_session(client_id.clone(), session_id.clone());
        self.sync.register_client(client_id.clone(), session_id.clone());
        let now = crate::ids::now_millis();
        let (live_count, _graph_state) = self.world.join(&world_key, client_id.clone(), now);
        self.maybe_apply_world_seed(&session_id, &world_key, now);

        // Snapshot-and-floor is one atomic step under the sync protocol's
        // write lock, so nothing can slip in between the snapshot being
        // built and this session's join floor being recorded (§4.3
        // late-join consistency, corollary c).
        let snapshot = self.sync.snapshot_and_register_join(&world_key, &session_id);
        let frame = Frame::new(
            server_tags::WORLD_STATE_SYNC,
            serde_json::to_value(&snapshot).unwrap_or(Value::Null),
        )
        .with_world(world_key.clone())
        .with_session(session_id.as_str());
        self.hub
            .deliver_now(&frame, &Targets::Clients(vec![client_id.clone()]));

        // Only the session's first-ever join to this world announces it to
        // peers; a reconnect (drop + re-associate) stays silent (§8 scenario 5).
        let first_announcement = self.world.mark_announced(&world_key, &session_id, now);
        if live_count > 1 && first_announcement {
            self.broadcast.broadcast_to_world(
                &session_id,
                server_tags::CLIENT_JOINED,
                serde_json::json!({"session_id": session_id.as_str()}),
                Some(&client_id),
            );
        }
    }
}
