//! Error types for the coalescing coordinator and its collaborators.

use crate::llm::LlmError;

/// Failure of the Generation Port.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The backend answered, but with nothing usable.
    #[error("generation returned no usable output")]
    EmptyOutput,

    /// The provider call itself failed.
    #[error(transparent)]
    Provider(#[from] LlmError),

    /// The spawned generation task panicked or was aborted.
    #[error("generation task failed: {0}")]
    TaskFailed(String),
}

/// Failure to persist a settled exchange.
#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Failure to deliver a payload to the transport.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The recipient blocked us or is otherwise unreachable for good.
    #[error("recipient blocked delivery")]
    RecipientBlocked,

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    /// Whether the caller should stop delivering to this conversation.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::RecipientBlocked)
    }
}

/// Errors surfaced by a Session Loop run.
///
/// Stale and interrupted attempts are not errors and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum CoalesceError {
    /// Generation failed for a batch that was still current; the batch was dropped.
    #[error("generation failed: {0}")]
    Generation(#[source] GenerateError),

    /// Persisting a valid result failed; the batch was retained.
    #[error("settlement failed: {0}")]
    Settlement(#[source] SettleError),

    /// The result was persisted but could not be delivered.
    #[error("delivery failed: {0}")]
    Delivery(#[source] DeliveryError),
}

/// Result type for Session Loop runs.
pub type CoalesceResult<T> = Result<T, CoalesceError>;
