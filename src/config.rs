//! Configuration surface (spec §6), injected explicitly at construction
//! rather than read from a global (DESIGN NOTES §9).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const SYNC_PROTOCOL_TAG_DEFAULT: &str = "HD1-VSC-v1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub websocket_write_timeout_ms: u64,
    pub websocket_pong_timeout_ms: u64,
    pub websocket_ping_period_ms: u64,
    pub websocket_max_message_size: usize,
    pub websocket_read_buffer_size: usize,
    pub websocket_write_buffer_size: usize,
    pub websocket_client_outbound_queue_size: usize,
    pub broadcast_global_queue_size: usize,
    pub session_inactivity_timeout_ms: u64,
    pub session_cleanup_interval_ms: u64,
    pub sync_protocol_tag: String,
    pub avatars_dir: PathBuf,
    /// Directory of `<world_id>.yaml` seed files, applied once at a named
    /// world's first join (spec §6). `None` disables seeding entirely.
    #[serde(default)]
    pub world_seeds_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads from an optional TOML file (or defaults), then layers
    /// `WORLDSYNC_*` environment variables on top (spec §6).
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        use std::env::var;

        if let Ok(v) = var("WORLDSYNC_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Ok(v) = var("WORLDSYNC_SYNC_PROTOCOL_TAG") {
            self.sync_protocol_tag = v;
        }
        if let Ok(v) = var("WORLDSYNC_AVATARS_DIR") {
            self.avatars_dir = PathBuf::from(v);
        }
        if let Ok(v) = var("WORLDSYNC_WORLD_SEEDS_DIR") {
            self.world_seeds_dir = Some(PathBuf::from(v));
        }
        set_from_env_u64(&mut self.websocket_write_timeout_ms, "WORLDSYNC_WEBSOCKET_WRITE_TIMEOUT_MS");
        set_from_env_u64(&mut self.websocket_pong_timeout_ms, "WORLDSYNC_WEBSOCKET_PONG_TIMEOUT_MS");
        set_from_env_u64(&mut self.websocket_ping_period_ms, "WORLDSYNC_WEBSOCKET_PING_PERIOD_MS");
        set_from_env_usize(&mut self.websocket_max_message_size, "WORLDSYNC_WEBSOCKET_MAX_MESSAGE_SIZE");
        set_from_env_usize(&mut self.websocket_read_buffer_size, "WORLDSYNC_WEBSOCKET_READ_BUFFER_SIZE");
        set_from_env_usize(&mut self.websocket_write_buffer_size, "WORLDSYNC_WEBSOCKET_WRITE_BUFFER_SIZE");
        set_from_env_usize(
            &mut self.websocket_client_outbound_queue_size,
            "WORLDSYNC_WEBSOCKET_CLIENT_OUTBOUND_QUEUE_SIZE",
        );
        set_from_env_usize(&mut self.broadcast_global_queue_size, "WORLDSYNC_BROADCAST_GLOBAL_QUEUE_SIZE");
        set_from_env_u64(&mut self.session_inactivity_timeout_ms, "WORLDSYNC_SESSION_INACTIVITY_TIMEOUT_MS");
        set_from_env_u64(&mut self.session_cleanup_interval_ms, "WORLDSYNC_SESSION_CLEANUP_INTERVAL_MS");
    }

    pub fn websocket_write_timeout(&self) -> Duration {
        Duration::from_millis(self.websocket_write_timeout_ms)
    }

    pub fn websocket_pong_timeout(&self) -> Duration {
        Duration::from_millis(self.websocket_pong_timeout_ms)
    }

    pub fn websocket_ping_period(&self) -> Duration {
        Duration::from_millis(self.websocket_ping_period_ms)
    }

    pub fn session_inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.session_inactivity_timeout_ms)
    }

    pub fn session_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.session_cleanup_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        let ping_period_ms = 20_000;
        let pong_timeout_ms = 60_000;
        debug_assert!(ping_period_ms < pong_timeout_ms / 2, "ping < pong_wait/2 recommended (spec §6)");
        Self {
            listen_addr: "0.0.0.0:8080".to_owned(),
            websocket_write_timeout_ms: 10_000,
            websocket_pong_timeout_ms: pong_timeout_ms,
            websocket_ping_period_ms: ping_period_ms,
            websocket_max_message_size: 1 << 20,
            websocket_read_buffer_size: 4096,
            websocket_write_buffer_size: 4096,
            websocket_client_outbound_queue_size: 256,
            broadcast_global_queue_size: 1024,
            session_inactivity_timeout_ms: 30 * 60 * 1000,
            session_cleanup_interval_ms: 60_000,
            sync_protocol_tag: SYNC_PROTOCOL_TAG_DEFAULT.to_owned(),
            avatars_dir: PathBuf::from("./avatars"),
            world_seeds_dir: None,
        }
    }
}

fn set_from_env_u64(slot: &mut u64, key: &str) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(n) = v.parse() {
            *slot = n;
        }
    }
}

fn set_from_env_usize(slot: &mut usize, key: &str) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(n) = v.parse() {
            *slot = n;
        }
    }
}
