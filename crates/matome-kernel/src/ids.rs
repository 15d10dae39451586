//! Identifiers for conversations and coalescing sessions.
//!
//! `ConversationKey` is opaque: transports hand us whatever partitions their
//! traffic (a chat id, a room id, a session token) and the coordinator only
//! ever hashes and compares it. `SessionId` wraps UUIDv7 and exists purely so
//! log lines from one Session Loop run can be correlated.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque key partitioning all coordinator state.
///
/// Cheap to clone (shared string), so it can be moved into spawned
/// generation tasks without copying the underlying text.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(Arc<str>);

impl ConversationKey {
    /// Create a key from any string-like identifier.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// The key as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationKey({})", &self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ConversationKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<i64> for ConversationKey {
    fn from(id: i64) -> Self {
        Self::new(id.to_string())
    }
}

/// A Session Loop run identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Create a new time-ordered ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for log lines only.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}
