//! Wire format (spec §6): the envelope every client<->server frame uses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SYNC_PROTOCOL_TAG_DEFAULT;

/// Client -> server and server -> client frames share one envelope shape.
/// `type` is the only required field; everything else is optional context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_protocol: Option<String>,
}

impl Frame {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data),
            timestamp: Some(crate::ids::now_millis()),
            session_id: None,
            world_id: None,
            sync_protocol: Some(SYNC_PROTOCOL_TAG_DEFAULT.to_owned()),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_world(mut self, world_id: impl Into<String>) -> Self {
        self.world_id = Some(world_id.into());
        self
    }

    /// Encode once so the same bytes can be reused across every recipient of
    /// a broadcast (§4.7 "encode it once, and reuse the bytes") — callers
    /// that fan out to N connections call this once, not once per recipient.
    pub fn encode(&self) -> Result<bytes::Bytes, serde_json::Error> {
        Ok(bytes::Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Known client -> server message tags (spec §4.5, §6).
pub mod client_tags {
    pub const VERSION_CHECK: &str = "version_check";
    pub const CLIENT_INFO: &str = "client_info";
    pub const PING: &str = "ping";
    pub const SESSION_ASSOCIATE: &str = "session_associate";
    pub const AVATAR_ASSET_REQUEST: &str = "avatar_asset_request";
    pub const INTERACTION: &str = "interaction";
}

/// Known server -> client message tags (spec §6).
pub mod server_tags {
    pub const VERSION_MISMATCH: &str = "version_mismatch";
    pub const PONG: &str = "pong";
    pub const WORLD_STATE_SYNC: &str = "world_state_sync";
    pub const AVATAR_POSITION_UPDATE: &str = "avatar_position_update";
    pub const AVATAR_ASSET_RESPONSE: &str = "avatar_asset_response";
    pub const AVATAR_ASSET_ERROR: &str = "avatar_asset_error";
    pub const GRAPH_UPDATED: &str = "graph_updated";
    pub const CLIENT_JOINED: &str = "client_joined";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_json() {
        let frame = Frame::new("ping", serde_json::json!({"ping_id": 1}))
            .with_session("session-abc12345")
            .with_world("lobby");
        let bytes = frame.encode().unwrap();
        let decoded = Frame::decode(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(decoded.kind, "ping");
        assert_eq!(decoded.session_id.as_deref(), Some("session-abc12345"));
        assert_eq!(decoded.world_id.as_deref(), Some("lobby"));
    }

    #[test]
    fn unknown_type_still_decodes_as_opaque_passthrough() {
        let raw = r#"{"type":"custom_event","data":{"x":1}}"#;
        let decoded = Frame::decode(raw).unwrap();
        assert_eq!(decoded.kind, "custom_event");
    }
}
