//! Echo provider for demos and tests.
//!
//! Answers with the last user turn after a fixed delay, which is enough to
//! watch coalescing happen by typing quickly into the console server.

use std::time::Duration;

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult, Usage};

/// Provider that echoes the newest user message back.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    latency: Duration,
}

impl EchoProvider {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let text = request
            .last_user_text()
            .ok_or_else(|| LlmError::InvalidRequest("no user message".into()))?
            .to_string();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let words = text.split_whitespace().count() as u32;
        Ok(CompletionResponse {
            content: format!("You said:\n{text}"),
            model: request.model,
            stop_reason: Some("end_turn".into()),
            usage: Usage {
                input_tokens: words,
                output_tokens: words + 2,
            },
        })
    }
}
