//! Identifier and clock primitives (C1, spec §4.6).
//!
//! Kept deliberately dumb: these are string/integer newtypes and one
//! non-cryptographic checksum, not a subsystem with behavior of its own.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// `session-` + 8 random lowercase alphanumeric characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        Self(format!("session-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque, caller- or server-assigned entity identifier (I1: unique within a session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn generate() -> Self {
        Self(format!("entity-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifies a client connection for vector-clock and avatar bookkeeping.
/// Distinct from a [`SessionId`]: many clients (reconnects, multiple tabs)
/// may pass through the same session over its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn generate() -> Self {
        Self(format!("client-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// `{kind}_{client_id}_{monotonic_ns}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaId(pub String);

impl DeltaId {
    pub fn new(kind: &str, client: &ClientId) -> Self {
        let ns = monotonic_ns();
        Self(format!("{kind}_{client}_{ns}"))
    }
}

impl fmt::Display for DeltaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Nanoseconds since an arbitrary fixed epoch, monotonically increasing
/// within a process. Used only to make delta IDs unique and sortable for
/// logs; causal ordering is the vector clock's job, not this.
fn monotonic_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Deterministic, non-cryptographic 16-hex-digit digest of
/// `(id, kind, payload, timestamp_ns)` — sufficient for detecting transport
/// corruption within a trusted process, not an adversarial one (spec §4.6).
///
/// FNV-1a over the concatenated, length-prefixed fields.
pub fn checksum(id: &str, kind: &str, payload: &[u8], timestamp_ns: i64) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    let mut feed = |bytes: &[u8]| {
        hash ^= bytes.len() as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        for &b in bytes {
            hash ^= b as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    };

    feed(id.as_bytes());
    feed(kind.as_bytes());
    feed(payload);
    feed(&timestamp_ns.to_le_bytes());

    format!("{hash:016x}")
}

/// Current wall-clock time in milliseconds since the Unix epoch, for frame
/// envelopes and queue ordering (vector clocks remain the source of truth
/// for causality, per §4.6).
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_expected_shape() {
        let id = SessionId::new();
        assert!(id.0.starts_with("session-"));
        assert_eq!(id.0.len(), "session-".len() + 8);
        assert!(id.0["session-".len()..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn checksum_round_trips() {
        let a = checksum("id1", "avatar-move", b"payload", 1000);
        let b = checksum("id1", "avatar-move", b"payload", 1000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn checksum_detects_tamper() {
        let a = checksum("id1", "avatar-move", b"payload", 1000);
        let b = checksum("id1", "avatar-move", b"payloadX", 1000);
        assert_ne!(a, b);
    }
}
