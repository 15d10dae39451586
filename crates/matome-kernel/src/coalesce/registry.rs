//! Conversation state registry.
//!
//! One slot per conversation key, created on first submission and kept for
//! the life of the process. Each slot has its own mutex, so conversations
//! never contend with each other, and a `watch` channel that publishes the
//! pending length after every mutation.
//!
//! Keys are never evicted. A long-running process accumulates one small slot
//! per conversation it has ever seen.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::{Admission, Continuation, Snapshot};
use crate::ids::ConversationKey;

/// Coalescing state for one conversation.
#[derive(Debug, Default)]
struct ConversationState {
    /// Unsettled fragments, in arrival order.
    pending: Vec<String>,
    /// Whether a Session Loop currently owns this conversation.
    active: bool,
    /// The current attempt's generation task. Only set while `active`.
    generation: Option<AbortHandle>,
}

#[derive(Debug)]
struct Slot {
    state: Mutex<ConversationState>,
    pending_len: watch::Sender<usize>,
}

impl Slot {
    fn new() -> Self {
        let (pending_len, _) = watch::channel(0);
        Self {
            state: Mutex::new(ConversationState::default()),
            pending_len,
        }
    }

    /// Must be called with the state lock held.
    fn publish(&self, state: &ConversationState) {
        self.pending_len.send_replace(state.pending.len());
    }
}

/// Counts for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Conversations ever seen.
    pub conversations: usize,
    /// Conversations with a running session.
    pub active: usize,
    /// Fragments waiting across all conversations.
    pub pending_fragments: usize,
}

/// Map from conversation key to coalescing state.
#[derive(Debug, Default)]
pub struct StateRegistry {
    slots: DashMap<ConversationKey, Arc<Slot>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &ConversationKey) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new()))
                .value(),
        )
    }

    fn existing(&self, key: &ConversationKey) -> Option<Arc<Slot>> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    /// Append a fragment; claim the conversation if nobody holds it.
    pub fn submit(&self, key: &ConversationKey, text: String) -> Admission {
        let slot = self.slot(key);
        let mut state = slot.state.lock();
        state.pending.push(text);
        slot.publish(&state);

        if state.active {
            tracing::debug!(key = %key, pending = state.pending.len(), "message buffered");
            Admission::Buffered
        } else {
            state.active = true;
            Admission::StartSession
        }
    }

    /// Snapshot pending and subscribe to its length in one step.
    ///
    /// The receiver has the snapshot's length marked as seen, so any later
    /// growth shows up as a change.
    pub fn begin_attempt(&self, key: &ConversationKey) -> (Snapshot, watch::Receiver<usize>) {
        let slot = self.slot(key);
        let state = slot.state.lock();
        let rx = slot.pending_len.subscribe();
        (Snapshot::new(&state.pending), rx)
    }

    /// Record the generation task for the current attempt.
    pub fn record_generation(&self, key: &ConversationKey, handle: AbortHandle) {
        let slot = self.slot(key);
        let mut state = slot.state.lock();
        if state.active {
            state.generation = Some(handle);
        }
    }

    /// Current number of pending fragments.
    pub fn pending_len(&self, key: &ConversationKey) -> usize {
        self.existing(key).map_or(0, |slot| slot.state.lock().pending.len())
    }

    /// Copy of the pending fragments.
    pub fn pending(&self, key: &ConversationKey) -> Vec<String> {
        self.existing(key)
            .map(|slot| slot.state.lock().pending.clone())
            .unwrap_or_default()
    }

    /// Whether a session currently owns the conversation.
    pub fn is_active(&self, key: &ConversationKey) -> bool {
        self.existing(key).is_some_and(|slot| slot.state.lock().active)
    }

    /// Whether a generation handle is recorded for the conversation.
    pub fn has_generation(&self, key: &ConversationKey) -> bool {
        self.existing(key)
            .is_some_and(|slot| slot.state.lock().generation.is_some())
    }

    /// Remove the first `count` fragments after a successful settlement.
    ///
    /// Fragments that arrived while settlement was in progress stay queued.
    /// Returns how many remain.
    pub fn settle_prefix(&self, key: &ConversationKey, count: usize) -> usize {
        let slot = self.slot(key);
        let mut state = slot.state.lock();
        let count = count.min(state.pending.len());
        state.pending.drain(..count);
        slot.publish(&state);
        state.pending.len()
    }

    /// Drop the batch after a failed generation and release the conversation.
    ///
    /// Only acts if pending still holds exactly the failed snapshot. Returns
    /// false if new input slipped in, in which case nothing changes and the
    /// failure counts as a stale result.
    pub fn drop_batch(&self, key: &ConversationKey, snapshot_len: usize) -> bool {
        let slot = self.slot(key);
        let mut state = slot.state.lock();
        if state.pending.len() != snapshot_len {
            return false;
        }
        state.pending.clear();
        state.active = false;
        state.generation = None;
        slot.publish(&state);
        true
    }

    /// Release the conversation if pending is empty, otherwise keep it.
    pub fn finish_or_continue(&self, key: &ConversationKey) -> Continuation {
        let slot = self.slot(key);
        let mut state = slot.state.lock();
        if state.pending.is_empty() {
            state.active = false;
            state.generation = None;
            Continuation::Done
        } else {
            Continuation::Continue
        }
    }

    /// Release the conversation unconditionally, keeping pending intact.
    ///
    /// The next submission starts a session that includes whatever is left.
    pub fn release(&self, key: &ConversationKey) {
        let slot = self.slot(key);
        let mut state = slot.state.lock();
        state.active = false;
        state.generation = None;
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.slots.iter() {
            let state = entry.value().state.lock();
            stats.conversations += 1;
            if state.active {
                stats.active += 1;
            }
            stats.pending_fragments += state.pending.len();
        }
        stats
    }
}
