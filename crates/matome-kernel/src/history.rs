//! In-memory conversation log.
//!
//! Stores settled exchanges per conversation and serves as the model context
//! source for [`LlmGenerator`](crate::llm::LlmGenerator). A combined batch is
//! stored as a single user turn, followed by the assistant turn that answered
//! it.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::SettleError;
use crate::ids::ConversationKey;
use crate::llm::Message;
use crate::ports::{Payload, Settler};

/// Per-conversation turn log.
#[derive(Debug, Default)]
pub struct ConversationLog {
    turns: RwLock<HashMap<ConversationKey, Vec<Message>>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single turn.
    pub fn append(&self, key: &ConversationKey, message: Message) {
        self.turns.write().entry(key.clone()).or_default().push(message);
    }

    /// The last `limit` turns for a conversation, oldest first.
    pub fn recent(&self, key: &ConversationKey, limit: usize) -> Vec<Message> {
        let turns = self.turns.read();
        match turns.get(key) {
            Some(history) => {
                let start = history.len().saturating_sub(limit);
                history[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Number of stored turns for a conversation.
    pub fn len(&self, key: &ConversationKey) -> usize {
        self.turns.read().get(key).map_or(0, Vec::len)
    }

    /// Whether a conversation has no stored turns.
    pub fn is_empty(&self, key: &ConversationKey) -> bool {
        self.len(key) == 0
    }

    /// Drop a conversation's turns. Returns how many were removed.
    pub fn forget(&self, key: &ConversationKey) -> usize {
        let removed = self.turns.write().remove(key).map_or(0, |h| h.len());
        tracing::info!(key = %key, removed, "conversation forgotten");
        removed
    }
}

#[async_trait]
impl Settler for ConversationLog {
    async fn settle(
        &self,
        key: &ConversationKey,
        combined: &str,
        output: &str,
    ) -> Result<Payload, SettleError> {
        {
            // Both turns land under one write lock so readers never see half an exchange
            let mut turns = self.turns.write();
            let history = turns.entry(key.clone()).or_default();
            history.push(Message::user(combined));
            history.push(Message::assistant(output));
        }
        Ok(output.trim().to_string())
    }
}
