//! Per-conversation message coalescing.
//!
//! Users often send several short messages before the first one is answered.
//! The coordinator keeps exactly one generation in flight per conversation,
//! folds late messages into the next request, and throws away any result
//! that newer input has overtaken.
//!
//! # State machine (per conversation)
//!
//! ```text
//!            submit (first)
//!   Idle ───────────────────▶ Active ──┐ snapshot → generate → wait
//!    ▲                          ▲      │
//!    │ pending empty            │      ├─ pending grew ─────────────▶ (new snapshot)
//!    │                          │      ├─ done, grew at re-check ───▶ (new snapshot)
//!    └──── settle + clear ◀─────┘      ├─ done, unchanged ──────────▶ settle + clear
//!    └──── drop batch ◀─────────────────┴─ failed, unchanged
//! ```
//!
//! The registry lock is only held for single transitions. The generation
//! runs on a detached task and is never awaited under a lock.

mod coordinator;
mod registry;

pub use coordinator::{Coordinator, SessionReport};
pub use registry::{RegistryStats, StateRegistry};

use std::sync::Arc;

/// Result of [`Coordinator::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Admission {
    /// The caller must now run the Session Loop once.
    #[strum(serialize = "start_session")]
    StartSession,
    /// A session is already running and will pick the message up.
    #[strum(serialize = "buffered")]
    Buffered,
}

/// Result of the finish-or-continue transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Pending was empty; the conversation is idle again.
    Done,
    /// More input is waiting; take a new snapshot.
    Continue,
}

/// Immutable copy of the pending fragments at the start of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    fragments: Arc<[String]>,
}

impl Snapshot {
    pub(crate) fn new(fragments: &[String]) -> Self {
        Self {
            fragments: Arc::from(fragments),
        }
    }

    /// Number of fragments captured.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments joined by newlines, in arrival order.
    pub fn combined(&self) -> String {
        self.fragments.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_combines_in_order() {
        let snapshot = Snapshot::new(&["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.combined(), "a\nb\na");
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Snapshot::new(&[]);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.combined(), "");
    }

    #[test]
    fn test_admission_display() {
        assert_eq!(Admission::StartSession.to_string(), "start_session");
        assert_eq!(Admission::Buffered.to_string(), "buffered");
    }
}
