//! Session Driver: the transport-facing entry point.
//!
//! Wraps a Session Loop with the activity indicator and turns a dropped
//! batch into a single apology for the user.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::coalesce::{Admission, Coordinator, SessionReport};
use crate::config::{ActivityConfig, MatomeConfig};
use crate::error::{CoalesceError, CoalesceResult};
use crate::ids::ConversationKey;
use crate::ports::ActivitySignal;

/// Recurring activity signal for one session.
///
/// Signals immediately, then once per interval until the configured maximum
/// duration runs out. Dropping the pulse stops it and clears the indicator,
/// whichever way the session ended.
pub struct ActivityPulse {
    task: JoinHandle<()>,
    activity: Arc<dyn ActivitySignal>,
    key: ConversationKey,
}

impl ActivityPulse {
    pub fn start(
        activity: Arc<dyn ActivitySignal>,
        key: ConversationKey,
        config: &ActivityConfig,
    ) -> Self {
        let interval = config.interval().max(Duration::from_millis(1));
        let beats = (config.max_duration().as_millis() / interval.as_millis()).max(1);

        let task = tokio::spawn({
            let activity = Arc::clone(&activity);
            let key = key.clone();
            async move {
                for _ in 0..beats {
                    activity.signal(&key).await;
                    tokio::time::sleep(interval).await;
                }
            }
        });

        Self { task, activity, key }
    }
}

impl Drop for ActivityPulse {
    fn drop(&mut self) {
        self.task.abort();
        self.activity.stop(&self.key);
    }
}

/// Outcome of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Another session already owns the conversation and will include it.
    Buffered,
    /// This call ran the session to idle.
    Completed(SessionReport),
}

/// Runs Session Loops for inbound messages.
pub struct SessionDriver {
    coordinator: Arc<Coordinator>,
    activity: Arc<dyn ActivitySignal>,
    activity_config: ActivityConfig,
    failure_message: String,
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("coordinator", &self.coordinator)
            .field("activity_config", &self.activity_config)
            .finish()
    }
}

impl SessionDriver {
    pub fn new(
        coordinator: Arc<Coordinator>,
        activity: Arc<dyn ActivitySignal>,
        config: &MatomeConfig,
    ) -> Self {
        Self {
            coordinator,
            activity,
            activity_config: config.activity.clone(),
            failure_message: config.delivery.failure_message.clone(),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Handle one inbound text message.
    ///
    /// Returns once the message is buffered, or once the session this message
    /// started has gone idle. A generation failure is reported to the user
    /// with one apology and then returned.
    pub async fn handle_text(
        &self,
        key: &ConversationKey,
        text: impl Into<String>,
    ) -> CoalesceResult<Dispatch> {
        if self.coordinator.submit(key, text) == Admission::Buffered {
            return Ok(Dispatch::Buffered);
        }

        let pulse = ActivityPulse::start(Arc::clone(&self.activity), key.clone(), &self.activity_config);
        let result = self.coordinator.run_session(key).await;
        drop(pulse);

        match result {
            Ok(report) => Ok(Dispatch::Completed(report)),
            Err(CoalesceError::Generation(error)) => {
                if let Err(e) = self
                    .coordinator
                    .deliverer()
                    .deliver(key, &self.failure_message)
                    .await
                {
                    tracing::warn!(key = %key, error = %e, "could not deliver failure notice");
                }
                Err(CoalesceError::Generation(error))
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeliveryError, GenerateError, SettleError};
    use crate::ports::{Deliverer, Generator, Settler};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingActivity {
        signals: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ActivitySignal for CountingActivity {
        async fn signal(&self, _key: &ConversationKey) {
            self.signals.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&self, _key: &ConversationKey) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn activity_config(interval_ms: u64, max_duration_ms: u64) -> ActivityConfig {
        ActivityConfig {
            interval_ms,
            max_duration_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_runs_for_max_duration() {
        let activity = Arc::new(CountingActivity::default());
        let pulse = ActivityPulse::start(
            activity.clone(),
            ConversationKey::new("1"),
            &activity_config(3_000, 30_000),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(activity.signals.load(Ordering::SeqCst), 10);
        assert_eq!(activity.stops.load(Ordering::SeqCst), 0);

        drop(pulse);
        assert_eq!(activity.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_stops_on_drop() {
        let activity = Arc::new(CountingActivity::default());
        let pulse = ActivityPulse::start(
            activity.clone(),
            ConversationKey::new("1"),
            &activity_config(3_000, 30_000),
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(activity.signals.load(Ordering::SeqCst), 2);

        drop(pulse);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(activity.signals.load(Ordering::SeqCst), 2);
        assert_eq!(activity.stops.load(Ordering::SeqCst), 1);
    }

    /// Fails or succeeds depending on the flag.
    struct Flaky {
        fail: bool,
    }

    #[async_trait]
    impl Generator for Flaky {
        async fn generate(
            &self,
            _key: &ConversationKey,
            combined: &str,
        ) -> Result<String, GenerateError> {
            if self.fail {
                Err(GenerateError::EmptyOutput)
            } else {
                Ok(format!("re: {combined}"))
            }
        }
    }

    #[derive(Default)]
    struct Outbox {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Settler for Outbox {
        async fn settle(
            &self,
            _key: &ConversationKey,
            _combined: &str,
            output: &str,
        ) -> Result<String, SettleError> {
            Ok(output.to_string())
        }
    }

    #[async_trait]
    impl Deliverer for Outbox {
        async fn deliver(&self, _key: &ConversationKey, payload: &str) -> Result<(), DeliveryError> {
            self.delivered.lock().push(payload.to_string());
            Ok(())
        }
    }

    fn driver(fail: bool) -> (SessionDriver, Arc<Outbox>, Arc<CountingActivity>) {
        let outbox = Arc::new(Outbox::default());
        let activity = Arc::new(CountingActivity::default());
        let config = MatomeConfig::default();
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(Flaky { fail }),
            outbox.clone(),
            outbox.clone(),
            config.coalesce.clone(),
        ));
        let driver = SessionDriver::new(coordinator, activity.clone(), &config);
        (driver, outbox, activity)
    }

    #[tokio::test]
    async fn test_success_delivers_and_stops_activity() {
        let (driver, outbox, activity) = driver(false);
        let key = ConversationKey::new("1");

        let dispatch = driver.handle_text(&key, "hello").await.unwrap();
        let Dispatch::Completed(report) = dispatch else {
            panic!("expected a completed session, got {dispatch:?}");
        };
        assert_eq!(report.settled_fragments, 1);
        assert_eq!(*outbox.delivered.lock(), vec!["re: hello"]);
        assert_eq!(activity.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_sends_one_apology() {
        let (driver, outbox, activity) = driver(true);
        let key = ConversationKey::new("1");

        driver.coordinator().submit(&key, "a");
        // The session is already claimed, so this one is buffered
        assert_eq!(driver.handle_text(&key, "b").await.unwrap(), Dispatch::Buffered);
        driver.coordinator().registry().release(&key);

        let err = driver.handle_text(&key, "c").await.unwrap_err();
        assert!(matches!(err, CoalesceError::Generation(GenerateError::EmptyOutput)));

        let delivered = outbox.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0], MatomeConfig::default().delivery.failure_message);
        assert_eq!(activity.stops.load(Ordering::SeqCst), 1);
        assert_eq!(driver.coordinator().registry().pending_len(&key), 0);
    }

    #[tokio::test]
    async fn test_buffered_message_does_not_signal() {
        let (driver, _outbox, activity) = driver(false);
        let key = ConversationKey::new("1");

        driver.coordinator().submit(&key, "first");
        assert_eq!(driver.handle_text(&key, "second").await.unwrap(), Dispatch::Buffered);
        assert_eq!(activity.signals.load(Ordering::SeqCst), 0);
        assert_eq!(activity.stops.load(Ordering::SeqCst), 0);
    }
}
