//! The coalescing coordinator and its Session Loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use super::registry::StateRegistry;
use super::{Admission, Continuation, Snapshot};
use crate::config::{CoalesceConfig, InterruptPolicy};
use crate::error::{CoalesceError, CoalesceResult, DeliveryError, GenerateError};
use crate::ids::{ConversationKey, SessionId};
use crate::ports::{Deliverer, Generator, Settler};

type GenerationTask = JoinHandle<Result<String, GenerateError>>;

/// What one Session Loop run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub session: SessionId,
    /// Generation attempts started.
    pub attempts: u32,
    /// Attempts abandoned because input grew while generating.
    pub interrupted: u32,
    /// Attempts that completed but were overtaken at the re-check.
    pub stale: u32,
    /// Fragments that reached settlement.
    pub settled_fragments: usize,
    /// Settled batches whose delivery failed with a transport error.
    pub undelivered: u32,
}

enum AttemptOutcome {
    /// Pending grew past the snapshot before the generation finished.
    Interrupted { pending: usize },
    Completed(Result<String, GenerateError>),
}

/// Releases the conversation if a Session Loop exits without reaching Done.
///
/// Covers error returns, panics inside collaborators, and the session
/// future being dropped mid-await.
struct SessionGuard<'a> {
    registry: &'a StateRegistry,
    key: &'a ConversationKey,
    armed: bool,
}

impl<'a> SessionGuard<'a> {
    fn new(registry: &'a StateRegistry, key: &'a ConversationKey) -> Self {
        Self {
            registry,
            key,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                key = %self.key,
                pending = self.registry.pending_len(self.key),
                "session exited early, releasing conversation"
            );
            self.registry.release(self.key);
        }
    }
}

/// Coordinates submissions and generation per conversation.
pub struct Coordinator {
    registry: StateRegistry,
    generator: Arc<dyn Generator>,
    settler: Arc<dyn Settler>,
    deliverer: Arc<dyn Deliverer>,
    config: CoalesceConfig,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("registry", &self.registry.stats())
            .field("config", &self.config)
            .finish()
    }
}

impl Coordinator {
    pub fn new(
        generator: Arc<dyn Generator>,
        settler: Arc<dyn Settler>,
        deliverer: Arc<dyn Deliverer>,
        config: CoalesceConfig,
    ) -> Self {
        Self {
            registry: StateRegistry::new(),
            generator,
            settler,
            deliverer,
            config,
        }
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn deliverer(&self) -> &Arc<dyn Deliverer> {
        &self.deliverer
    }

    /// Accept a message for a conversation.
    ///
    /// On [`Admission::StartSession`] the caller must run
    /// [`run_session`](Self::run_session) exactly once. On
    /// [`Admission::Buffered`] there is nothing more to do.
    pub fn submit(&self, key: &ConversationKey, text: impl Into<String>) -> Admission {
        let _span = tracing::debug_span!("submit", key = %key).entered();
        self.registry.submit(key, text.into())
    }

    /// Run the Session Loop until the conversation is idle again.
    ///
    /// Returns an error only for a generation failure on a still-current
    /// batch (batch dropped), a settlement failure, or a blocked recipient
    /// (conversation released, unsettled input retained). Other delivery
    /// failures are counted in the report and the loop keeps going. In every
    /// case the conversation is no longer active when this returns.
    pub async fn run_session(&self, key: &ConversationKey) -> CoalesceResult<SessionReport> {
        let session = SessionId::new();
        let span = tracing::info_span!("session.run", key = %key, session = %session);
        self.session_loop(key, session).instrument(span).await
    }

    async fn session_loop(
        &self,
        key: &ConversationKey,
        session: SessionId,
    ) -> CoalesceResult<SessionReport> {
        let mut guard = SessionGuard::new(&self.registry, key);
        let mut report = SessionReport {
            session,
            ..SessionReport::default()
        };

        loop {
            let (snapshot, pending_rx) = self.registry.begin_attempt(key);

            if !snapshot.is_empty() {
                report.attempts += 1;
                if let Err(error) = self.attempt(key, &snapshot, pending_rx, &mut report).await {
                    // drop_batch already released the conversation
                    if matches!(error, CoalesceError::Generation(_)) {
                        guard.disarm();
                    }
                    return Err(error);
                }
            }

            match self.registry.finish_or_continue(key) {
                Continuation::Done => {
                    guard.disarm();
                    tracing::info!(
                        attempts = report.attempts,
                        interrupted = report.interrupted,
                        stale = report.stale,
                        "session idle"
                    );
                    return Ok(report);
                }
                Continuation::Continue => {
                    tracing::debug!(
                        pending = self.registry.pending_len(key),
                        "more input waiting, taking a new snapshot"
                    );
                }
            }
        }
    }

    /// One snapshot → generate → validate pass.
    async fn attempt(
        &self,
        key: &ConversationKey,
        snapshot: &Snapshot,
        pending_rx: watch::Receiver<usize>,
        report: &mut SessionReport,
    ) -> CoalesceResult<()> {
        let combined = snapshot.combined();
        tracing::info!(
            fragments = snapshot.len(),
            attempt = report.attempts,
            "starting generation"
        );

        let mut task = self.spawn_generation(key, combined.clone());
        self.registry.record_generation(key, task.abort_handle());

        let result = match wait_for_attempt(&mut task, snapshot.len(), pending_rx).await {
            AttemptOutcome::Interrupted { pending } => {
                report.interrupted += 1;
                tracing::info!(
                    snapshot = snapshot.len(),
                    pending,
                    policy = %self.config.interrupt_policy,
                    "new input arrived, abandoning generation"
                );
                if self.config.interrupt_policy == InterruptPolicy::Abort {
                    task.abort();
                }
                return Ok(());
            }
            AttemptOutcome::Completed(result) => result,
        };

        let current = self.registry.pending_len(key);
        if current != snapshot.len() {
            report.stale += 1;
            tracing::info!(
                snapshot = snapshot.len(),
                current,
                "result overtaken at re-check, discarding"
            );
            return Ok(());
        }

        match result {
            Ok(output) => self.settle(key, snapshot, &combined, &output, report).await,
            Err(error) => {
                if self.registry.drop_batch(key, snapshot.len()) {
                    tracing::warn!(
                        fragments = snapshot.len(),
                        error = %error,
                        "generation failed, dropping batch"
                    );
                    return Err(CoalesceError::Generation(error));
                }
                report.stale += 1;
                tracing::info!(error = %error, "generation failed but input moved on, retrying");
                Ok(())
            }
        }
    }

    /// Persist, clear the settled fragments, then deliver.
    ///
    /// Pending is only touched once persistence succeeded. Fragments that
    /// arrived during settlement stay queued for the next attempt. Only a
    /// blocked recipient ends the session; a transport failure loses this
    /// one reply and leaves later input to the next attempt.
    async fn settle(
        &self,
        key: &ConversationKey,
        snapshot: &Snapshot,
        combined: &str,
        output: &str,
        report: &mut SessionReport,
    ) -> CoalesceResult<()> {
        let payload = self
            .settler
            .settle(key, combined, output)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "settlement failed, keeping batch");
                CoalesceError::Settlement(e)
            })?;

        let remaining = self.registry.settle_prefix(key, snapshot.len());
        report.settled_fragments += snapshot.len();
        tracing::info!(fragments = snapshot.len(), remaining, "batch settled");

        match self.deliverer.deliver(key, &payload).await {
            Ok(()) => Ok(()),
            Err(DeliveryError::RecipientBlocked) => {
                Err(CoalesceError::Delivery(DeliveryError::RecipientBlocked))
            }
            Err(e) => {
                report.undelivered += 1;
                tracing::error!(error = %e, remaining, "delivery failed, continuing with pending input");
                Ok(())
            }
        }
    }

    fn spawn_generation(&self, key: &ConversationKey, combined: String) -> GenerationTask {
        let generator = Arc::clone(&self.generator);
        let key = key.clone();
        let span = tracing::info_span!("session.generate", key = %key);
        tokio::spawn(async move { generator.generate(&key, &combined).await }.instrument(span))
    }
}

/// Wait for the generation or for pending to grow past the snapshot,
/// whichever is observed first. Completion wins a tie.
async fn wait_for_attempt(
    task: &mut GenerationTask,
    snapshot_len: usize,
    mut pending_rx: watch::Receiver<usize>,
) -> AttemptOutcome {
    loop {
        tokio::select! {
            biased;
            joined = &mut *task => return AttemptOutcome::Completed(flatten(joined)),
            changed = pending_rx.changed() => {
                if changed.is_err() {
                    // Registry gone; only the generation can end the attempt now
                    return AttemptOutcome::Completed(flatten((&mut *task).await));
                }
                let pending = *pending_rx.borrow_and_update();
                if pending > snapshot_len {
                    return AttemptOutcome::Interrupted { pending };
                }
            }
        }
    }
}

fn flatten(joined: Result<Result<String, GenerateError>, JoinError>) -> Result<String, GenerateError> {
    joined.unwrap_or_else(|e| Err(GenerateError::TaskFailed(e.to_string())))
}
