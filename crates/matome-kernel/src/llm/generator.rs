//! Generation Port backed by an [`LlmProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use super::{CompletionRequest, LlmProvider, Message};
use crate::config::LlmConfig;
use crate::error::GenerateError;
use crate::history::ConversationLog;
use crate::ids::ConversationKey;
use crate::ports::Generator;

/// Builds a completion request from prior turns plus the combined batch.
///
/// Context is read before the batch is settled, so the batch never appears
/// twice in the prompt.
pub struct LlmGenerator {
    provider: Arc<dyn LlmProvider>,
    log: Arc<ConversationLog>,
    config: LlmConfig,
}

impl std::fmt::Debug for LlmGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGenerator")
            .field("provider", &self.provider.name())
            .field("model", &self.config.model)
            .finish()
    }
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, log: Arc<ConversationLog>, config: LlmConfig) -> Self {
        Self {
            provider,
            log,
            config,
        }
    }

    fn build_request(&self, key: &ConversationKey, combined: &str) -> CompletionRequest {
        let mut messages = self.log.recent(key, self.config.context_messages);
        messages.push(Message::user(combined));

        let request = CompletionRequest::new(self.config.model.clone(), messages)
            .with_max_tokens(self.config.max_tokens);
        match &self.config.system_prompt {
            Some(system) => request.with_system(system.clone()),
            None => request,
        }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(
        &self,
        key: &ConversationKey,
        combined: &str,
    ) -> Result<String, GenerateError> {
        let request = self.build_request(key, combined);
        let span = tracing::info_span!(
            "llm.generate",
            key = %key,
            provider = self.provider.name(),
            model = %self.config.model,
            context = request.messages.len() - 1,
        );

        let response = self.provider.complete(request).instrument(span).await?;

        if response.content.trim().is_empty() {
            tracing::warn!(key = %key, model = %response.model, "provider returned empty content");
            return Err(GenerateError::EmptyOutput);
        }

        tracing::debug!(
            key = %key,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "generation complete"
        );
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, LlmError, LlmResult, Role, Usage};
    use crate::ports::Settler;
    use parking_lot::Mutex;

    /// Records requests and answers with a fixed string.
    struct CannedProvider {
        reply: LlmResult<String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl CannedProvider {
        fn new(reply: LlmResult<String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
            let model = request.model.clone();
            self.seen.lock().push(request);
            match &self.reply {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    model,
                    stop_reason: None,
                    usage: Usage::default(),
                }),
                Err(e) => Err(LlmError::ApiError(e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_request_includes_context_and_batch() {
        let key = ConversationKey::new("42");
        let log = Arc::new(ConversationLog::new());
        log.settle(&key, "earlier", "earlier reply").await.unwrap();

        let provider = CannedProvider::new(Ok("fine".into()));
        let config = LlmConfig {
            model: "m".into(),
            system_prompt: Some("sys".into()),
            ..LlmConfig::default()
        };
        let generator = LlmGenerator::new(provider.clone(), log, config);

        let out = generator.generate(&key, "a\nb").await.unwrap();
        assert_eq!(out, "fine");

        let seen = provider.seen.lock();
        let request = &seen[0];
        assert_eq!(request.system.as_deref(), Some("sys"));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0], Message::user("earlier"));
        assert_eq!(request.messages[1].role, Role::Assistant);
        assert_eq!(request.messages[2], Message::user("a\nb"));
    }

    #[tokio::test]
    async fn test_context_window_is_bounded() {
        let key = ConversationKey::new("7");
        let log = Arc::new(ConversationLog::new());
        for i in 0..5 {
            log.settle(&key, &format!("q{i}"), &format!("r{i}")).await.unwrap();
        }

        let provider = CannedProvider::new(Ok("ok".into()));
        let config = LlmConfig {
            context_messages: 2,
            ..LlmConfig::default()
        };
        LlmGenerator::new(provider.clone(), log, config)
            .generate(&key, "now")
            .await
            .unwrap();

        let seen = provider.seen.lock();
        let contents: Vec<_> = seen[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q4", "r4", "now"]);
    }

    #[tokio::test]
    async fn test_blank_output_is_an_error() {
        let provider = CannedProvider::new(Ok("  \n ".into()));
        let generator =
            LlmGenerator::new(provider, Arc::new(ConversationLog::new()), LlmConfig::default());
        let err = generator.generate(&ConversationKey::new("1"), "hi").await.unwrap_err();
        assert!(matches!(err, GenerateError::EmptyOutput));
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let provider = CannedProvider::new(Err(LlmError::NetworkError("down".into())));
        let generator =
            LlmGenerator::new(provider, Arc::new(ConversationLog::new()), LlmConfig::default());
        let err = generator.generate(&ConversationKey::new("1"), "hi").await.unwrap_err();
        assert!(matches!(err, GenerateError::Provider(LlmError::ApiError(_))));
    }
}
