//! Chunked delivery over a size-limited transport.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::ids::ConversationKey;
use crate::ports::Deliverer;

/// Split `text` into pieces of at most `limit` characters.
///
/// Splits on character boundaries, never inside a UTF-8 sequence. Empty
/// input yields no chunks.
pub fn chunk_message(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(idx, _)| idx);
        let (head, tail) = rest.split_at(split);
        chunks.push(head);
        rest = tail;
    }

    chunks
}

/// A user-facing transport that sends one message at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, key: &ConversationKey, text: &str) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, key: &ConversationKey, text: &str) -> Result<(), DeliveryError> {
        (**self).send(key, text).await
    }
}

/// [`Deliverer`] that splits payloads to fit the transport's message limit.
///
/// A blocked recipient aborts the remaining chunks. Other failures are logged
/// and the remaining chunks are still attempted; the last failure is returned.
#[derive(Debug)]
pub struct ChunkedDelivery<T> {
    transport: T,
    chunk_limit: usize,
}

impl<T: Transport> ChunkedDelivery<T> {
    pub fn new(transport: T, chunk_limit: usize) -> Self {
        Self {
            transport,
            chunk_limit,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: Transport> Deliverer for ChunkedDelivery<T> {
    async fn deliver(&self, key: &ConversationKey, payload: &str) -> Result<(), DeliveryError> {
        let mut last_error = None;

        for chunk in chunk_message(payload, self.chunk_limit) {
            match self.transport.send(key, chunk).await {
                Ok(()) => {}
                Err(DeliveryError::RecipientBlocked) => {
                    tracing::warn!(key = %key, "recipient blocked delivery");
                    return Err(DeliveryError::RecipientBlocked);
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "failed to send chunk");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
