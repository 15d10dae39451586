//! Routes console events into the Session Driver.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::io::AsyncWrite;

use matome_kernel::{
    ChunkedDelivery, CoalesceError, ConversationKey, ConversationLog, Coordinator, Dispatch,
    EchoProvider, LlmGenerator, LlmRegistry, LlmResult, MatomeConfig, SessionDriver,
    SessionReport, Transport,
};

use crate::console::{Command, ConsoleEvent, ConsoleTransport};
use crate::constants::FORGET_CONFIRMATION;

/// What handling one event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Folded into a session that is already running.
    Buffered,
    /// Ran a session to idle.
    Answered(SessionReport),
    /// The session ended in an error; already logged.
    Failed,
    /// History cleared; carries the number of turns removed.
    Forgotten(usize),
    /// The recipient now blocks the bot.
    Blocked,
    /// Delivery hit a blocked recipient; the key is muted from now on.
    Muted,
    /// The key was already muted; nothing was submitted.
    Skipped,
}

/// Owns the whole in-process stack for the console demo.
pub struct EventHandler<W> {
    driver: SessionDriver,
    log: Arc<ConversationLog>,
    transport: Arc<ConsoleTransport<W>>,
    muted: DashSet<ConversationKey>,
}

impl<W> std::fmt::Debug for EventHandler<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("driver", &self.driver)
            .field("muted", &self.muted.len())
            .finish()
    }
}

impl<W> EventHandler<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wire the echo provider, conversation log and console transport
    /// into a Session Driver.
    pub fn new(config: &MatomeConfig, transport: Arc<ConsoleTransport<W>>) -> LlmResult<Self> {
        let mut providers = LlmRegistry::new();
        providers.register(Arc::new(EchoProvider::new(Duration::from_millis(
            config.llm.echo_latency_ms,
        ))));
        if !providers.set_default(&config.llm.model) {
            tracing::warn!(
                model = %config.llm.model,
                available = ?providers.list(),
                "no provider for configured model, using the default"
            );
        }
        let provider = providers.default_provider()?;

        let log = Arc::new(ConversationLog::new());
        let generator = LlmGenerator::new(provider, Arc::clone(&log), config.llm.clone());
        let delivery = ChunkedDelivery::new(Arc::clone(&transport), config.delivery.chunk_limit);
        let coordinator = Coordinator::new(
            Arc::new(generator),
            log.clone(),
            Arc::new(delivery),
            config.coalesce.clone(),
        );
        let driver = SessionDriver::new(Arc::new(coordinator), transport.clone(), config);

        Ok(Self {
            driver,
            log,
            transport,
            muted: DashSet::new(),
        })
    }

    pub fn driver(&self) -> &SessionDriver {
        &self.driver
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn is_muted(&self, key: &ConversationKey) -> bool {
        self.muted.contains(key)
    }

    pub async fn handle(&self, event: ConsoleEvent) -> Outcome {
        let ConsoleEvent { key, command } = event;
        match command {
            Command::Text(text) => self.handle_text(&key, text).await,
            Command::Forget => {
                let removed = self.log.forget(&key);
                if let Err(e) = self.transport.send(&key, FORGET_CONFIRMATION).await {
                    tracing::warn!(key = %key, error = %e, "could not confirm forget");
                }
                Outcome::Forgotten(removed)
            }
            Command::Block => {
                self.transport.block(&key);
                tracing::info!(key = %key, "recipient blocked the bot");
                Outcome::Blocked
            }
        }
    }

    async fn handle_text(&self, key: &ConversationKey, text: String) -> Outcome {
        if self.is_muted(key) {
            tracing::debug!(key = %key, "conversation muted, dropping message");
            return Outcome::Skipped;
        }

        match self.driver.handle_text(key, text).await {
            Ok(Dispatch::Buffered) => Outcome::Buffered,
            Ok(Dispatch::Completed(report)) => Outcome::Answered(report),
            Err(CoalesceError::Delivery(e)) if e.is_blocked() => {
                self.muted.insert(key.clone());
                tracing::warn!(key = %key, "recipient blocked delivery, muting conversation");
                Outcome::Muted
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "session failed");
                Outcome::Failed
            }
        }
    }
}
