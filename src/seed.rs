//! World-config seed file (spec §6): declarative, optional, per-world scene
//! settings and preloaded entities, loaded once at first join of a named
//! world and injected through the same entity-creation path REST uses.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::EntityId;
use crate::model::Entity;
use crate::store::SessionStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneSettings {
    #[serde(default)]
    pub ambient_light: Option<f64>,
    #[serde(default)]
    pub gravity: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedEntity {
    pub name: String,
    #[serde(default)]
    pub components: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSeed {
    #[serde(default)]
    pub scene: SceneSettings,
    #[serde(default)]
    pub entities: Vec<SeedEntity>,
}

impl WorldSeed {
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }
}

/// Out-of-core convenience: reading the seed file from disk. The core only
/// depends on `apply_world_seed`; how the bytes got read is an external
/// concern (spec §1 non-goals: "YAML world-config loading").
pub fn load_world_seed_file(path: &Path) -> anyhow::Result<WorldSeed> {
    let contents = std::fs::read_to_string(path)?;
    Ok(WorldSeed::from_yaml_str(&contents)?)
}

/// Injects a world's seed entities into `session_id`'s own entity map via
/// the normal store path — the same one REST entity-creation handlers use
/// (spec §6: "injected via the same entity-creation path used by REST").
pub fn apply_world_seed(store: &SessionStore, session_id: &crate::ids::SessionId, seed: &WorldSeed) {
    for seed_entity in &seed.entities {
        let entity = Entity {
            id: EntityId::generate(),
            name: seed_entity.name.clone(),
            components: seed_entity.components.clone(),
            tags: Default::default(),
            enabled: true,
            created_at: crate::model::now_millis(),
        };
        let _ = store.add_entity(session_id, entity);
    }
}
