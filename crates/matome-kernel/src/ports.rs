//! Collaborator ports.
//!
//! The coordinator owns no I/O. Everything that touches the model, storage
//! or the transport sits behind one of these traits:
//!
//! | Port | Called | Contract |
//! |------|--------|----------|
//! | [`Generator`] | once per attempt, on a detached task | may take tens of seconds; empty output is an error |
//! | [`Settler`] | at most once per valid attempt | persist user turn then assistant turn, return payload |
//! | [`Deliverer`] | after a successful settle, and for apologies | chunk to transport limits |
//! | [`ActivitySignal`] | on a timer while a session runs | fire-and-forget |

use async_trait::async_trait;

use crate::error::{DeliveryError, GenerateError, SettleError};
use crate::ids::ConversationKey;

/// Transport-ready text produced by settlement.
pub type Payload = String;

/// The Generation Port.
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Produce a reply to `combined`, the newline-joined batch of fragments.
    async fn generate(&self, key: &ConversationKey, combined: &str)
    -> Result<String, GenerateError>;
}

/// Persists a valid exchange and formats it for the transport.
#[async_trait]
pub trait Settler: Send + Sync {
    async fn settle(
        &self,
        key: &ConversationKey,
        combined: &str,
        output: &str,
    ) -> Result<Payload, SettleError>;
}

/// Sends a payload to the user-facing transport.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, key: &ConversationKey, payload: &str) -> Result<(), DeliveryError>;
}

/// The "still working" indicator.
#[async_trait]
pub trait ActivitySignal: Send + Sync + 'static {
    /// Show the indicator once. Transports usually expire it after a few seconds.
    async fn signal(&self, key: &ConversationKey);

    /// Clear the indicator. Most transports clear it on the next message, so
    /// the default does nothing.
    fn stop(&self, _key: &ConversationKey) {}
}
