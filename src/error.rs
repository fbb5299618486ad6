//! Crate-wide error taxonomy (spec §7, SPEC_FULL.md §4.10).
//!
//! Each kind propagates the way §7 describes: `not-found`/`duplicate` bubble
//! up to callers, `integrity`/`causality` are logged and dropped in place,
//! `io`/`config` are fatal to the task or process that hit them. `CoreError`
//! aggregates the per-module enums via `#[from]` for call sites (like
//! `SessionFacade::add_entity`) that can fail across more than one module.

use thiserror::Error;

use crate::ids::{EntityId, SessionId};

/// Errors raised by the [`crate::store::SessionStore`] (§4.1).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("entity {0} not found in session {1}")]
    EntityNotFound(EntityId, SessionId),
    #[error("entity {0} already exists in session {1}")]
    DuplicateEntity(EntityId, SessionId),
}

/// Reasons the sync protocol (§4.3) rejects a delta.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("checksum does not match recomputed digest")]
    Integrity,
    #[error("vector clock violates causal order")]
    Causality,
}

/// Errors raised by the [`crate::hub::Hub`] (§4.4).
#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to encode frame for delivery: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced while reading an avatar asset (§4.5 `avatar_asset_request`).
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("asset path escapes avatars_dir: {0}")]
    InvalidPath(String),
    #[error("io error reading asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal startup errors (§7 `config`).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Handler-facing aggregate over the module errors a multi-step operation
/// (store write + sync-protocol delta + hub delivery) can fail with.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Hub(#[from] HubError),
}
