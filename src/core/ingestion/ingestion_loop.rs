// The ingestion worker - pulls updates off its queue and runs them through
// the limiter and the actuator, one at a time.
//
// State machine:
//   Running  -> Draining  on shutdown signal, or when every sender is gone
//   Draining -> Stopped   once intake is closed
//
// Draining does not finish queued work. Whatever is left in the queue is
// counted and dropped.

use crate::core::moderation::{
    ChatEvent, CounterStore, InboundUpdate, ModerationActuator, ModerationApi, ModerationDecision,
    RateLimiter,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Draining,
    Stopped,
}

/// Counters reported by a worker when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    /// Events that went through the limiter
    pub processed: u64,
    /// Updates without a message
    pub skipped: u64,
    pub escalated: u64,
    /// Events whose handling panicked
    pub failed: u64,
    /// Left in the queue at shutdown
    pub abandoned: u64,
}

impl std::ops::AddAssign for IngestionSummary {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.escalated += other.escalated;
        self.failed += other.failed;
        self.abandoned += other.abandoned;
    }
}

pub struct IngestionWorker<S: CounterStore, A: ModerationApi> {
    id: usize,
    limiter: Arc<RateLimiter<S>>,
    actuator: Arc<ModerationActuator<A>>,
    state: LoopState,
    summary: IngestionSummary,
}

impl<S, A> IngestionWorker<S, A>
where
    S: CounterStore + 'static,
    A: ModerationApi + 'static,
{
    pub fn new(
        id: usize,
        limiter: Arc<RateLimiter<S>>,
        actuator: Arc<ModerationActuator<A>>,
    ) -> Self {
        Self {
            id,
            limiter,
            actuator,
            state: LoopState::Running,
            summary: IngestionSummary::default(),
        }
    }

    /// Consume `events` until shutdown. A `true` on `shutdown` (or dropping
    /// its sender) stops intake.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<InboundUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) -> IngestionSummary {
        tracing::info!(worker = self.id, "Ingestion worker running");

        if *shutdown.borrow_and_update() {
            self.state = LoopState::Draining;
        }

        while self.state == LoopState::Running {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        self.state = LoopState::Draining;
                    }
                }

                update = events.recv() => match update {
                    Some(update) => self.handle(update).await,
                    None => self.state = LoopState::Draining,
                },
            }
        }

        events.close();
        while events.try_recv().is_ok() {
            self.summary.abandoned += 1;
        }
        self.state = LoopState::Stopped;

        tracing::info!(
            worker = self.id,
            state = ?self.state,
            processed = self.summary.processed,
            escalated = self.summary.escalated,
            abandoned = self.summary.abandoned,
            "Ingestion worker stopped"
        );
        self.summary
    }

    async fn handle(&mut self, update: InboundUpdate) {
        let Some(event) = update.message else {
            self.summary.skipped += 1;
            return;
        };

        // Each event runs in its own task so a panic only loses that event.
        let limiter = Arc::clone(&self.limiter);
        let actuator = Arc::clone(&self.actuator);
        let task = tokio::spawn(async move { process_event(&limiter, &actuator, &event).await });

        match task.await {
            Ok(escalated) => {
                self.summary.processed += 1;
                if escalated {
                    self.summary.escalated += 1;
                }
            }
            Err(e) => {
                self.summary.failed += 1;
                tracing::error!(
                    worker = self.id,
                    update_id = update.update_id,
                    "Event handling aborted: {}",
                    e
                );
            }
        }
    }
}

/// Evaluate one event and enforce if needed. Returns whether it escalated.
pub async fn process_event<S: CounterStore, A: ModerationApi>(
    limiter: &RateLimiter<S>,
    actuator: &ModerationActuator<A>,
    event: &ChatEvent,
) -> bool {
    match limiter.evaluate(event).await {
        ModerationDecision::Escalate { count } => {
            tracing::info!(
                user_id = event.sender_id,
                chat_id = event.chat_id,
                message_id = event.message_id,
                count,
                "Enforcing against {} for {}",
                event.sender_display_name,
                event.content_kind
            );
            let outcome = actuator.enforce(event).await;
            if !outcome.deleted || outcome.restricted == Some(false) {
                tracing::warn!(
                    user_id = event.sender_id,
                    restricted = ?outcome.restricted,
                    deleted = outcome.deleted,
                    "Enforcement incomplete"
                );
            }
            true
        }
        ModerationDecision::Allow { count } => {
            tracing::debug!(user_id = event.sender_id, count, "Flagged content counted");
            false
        }
        ModerationDecision::Ignore => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{
        ApiError, ContentKind, CounterError, EnforcementStrategy, ModerationConfig, RateLimitKey,
    };
    use crate::infra::moderation::InMemoryCounterStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Restrict { chat_id: i64, user_id: i64 },
        Delete { chat_id: i64, message_id: i64 },
    }

    /// Shares its call log with the test through an Arc
    #[derive(Clone, Default)]
    struct RecordingApi {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl RecordingApi {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModerationApi for RecordingApi {
        async fn restrict_chat_member(
            &self,
            chat_id: i64,
            user_id: i64,
            _until: DateTime<Utc>,
            _can_send_media: bool,
        ) -> Result<String, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Restrict { chat_id, user_id });
            Ok("ok".into())
        }

        async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<String, ApiError> {
            self.calls.lock().unwrap().push(Call::Delete {
                chat_id,
                message_id,
            });
            Ok("ok".into())
        }
    }

    /// Fails for one poisoned user, panics for another
    struct FlakyStore {
        inner: InMemoryCounterStore,
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn increment_with_window(
            &self,
            key: &RateLimitKey,
            window: Duration,
        ) -> Result<i64, CounterError> {
            if key.as_str().ends_with("{666}") {
                return Err(CounterError::StoreUnavailable("cluster down".into()));
            }
            if key.as_str().ends_with("{13}") {
                panic!("unexpected reply");
            }
            self.inner.increment_with_window(key, window).await
        }
    }

    fn sticker(update_id: i64, sender_id: i64) -> InboundUpdate {
        message(update_id, sender_id, ContentKind::Sticker)
    }

    fn message(update_id: i64, sender_id: i64, kind: ContentKind) -> InboundUpdate {
        InboundUpdate {
            update_id,
            message: Some(ChatEvent {
                sender_id,
                chat_id: -100,
                message_id: 1000 + update_id,
                content_kind: kind,
                sender_display_name: format!("user{}", sender_id),
            }),
        }
    }

    fn worker<S: CounterStore + 'static>(
        store: S,
        api: RecordingApi,
    ) -> IngestionWorker<S, RecordingApi> {
        let config = ModerationConfig::default();
        let actuator = ModerationActuator::new(
            api,
            EnforcementStrategy::RestrictAndDelete,
            config.restrict_duration,
        );
        IngestionWorker::new(
            0,
            Arc::new(RateLimiter::new(store, config)),
            Arc::new(actuator),
        )
    }

    /// Queue everything, close the queue, run the worker to completion.
    async fn run_all<S: CounterStore + 'static>(
        worker: IngestionWorker<S, RecordingApi>,
        updates: Vec<InboundUpdate>,
    ) -> IngestionSummary {
        let (tx, rx) = mpsc::channel(updates.len().max(1));
        for update in updates {
            tx.send(update).await.unwrap();
        }
        drop(tx);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        worker.run(rx, shutdown_rx).await
    }

    #[tokio::test]
    async fn test_ten_stickers_no_action() {
        let api = RecordingApi::default();
        let store = InMemoryCounterStore::new();
        let w = worker(store.clone(), api.clone());

        let summary = run_all(w, (1..=10).map(|i| sticker(i, 1)).collect()).await;

        assert!(api.calls().is_empty());
        assert_eq!(summary.processed, 10);
        assert_eq!(summary.escalated, 0);
        assert_eq!(store.current(&RateLimitKey::for_user("flagged", 1)), Some(10));
    }

    #[tokio::test]
    async fn test_eleventh_sticker_restricts_and_deletes_once() {
        let api = RecordingApi::default();
        let w = worker(InMemoryCounterStore::new(), api.clone());

        let summary = run_all(w, (1..=11).map(|i| sticker(i, 1)).collect()).await;

        assert_eq!(
            api.calls(),
            vec![
                Call::Restrict {
                    chat_id: -100,
                    user_id: 1
                },
                Call::Delete {
                    chat_id: -100,
                    message_id: 1011
                },
            ]
        );
        assert_eq!(summary.escalated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_window_starts_over() {
        let api = RecordingApi::default();
        let store = InMemoryCounterStore::new();
        let limiter = RateLimiter::new(store.clone(), ModerationConfig::default());
        let actuator = ModerationActuator::new(
            api.clone(),
            EnforcementStrategy::RestrictAndDelete,
            Duration::from_secs(86_400),
        );

        let first = sticker(1, 2).message.unwrap();
        assert!(!process_event(&limiter, &actuator, &first).await);

        tokio::time::advance(Duration::from_secs(25 * 60 * 60)).await;

        let second = sticker(2, 2).message.unwrap();
        assert_eq!(
            limiter.evaluate(&second).await,
            ModerationDecision::Allow { count: 1 }
        );
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_text_and_empty_updates_skip_store() {
        let api = RecordingApi::default();
        let store = InMemoryCounterStore::new();
        let w = worker(store.clone(), api.clone());

        let mut updates: Vec<_> = (1..=20)
            .map(|i| message(i, 3, ContentKind::Other))
            .collect();
        updates.push(InboundUpdate {
            update_id: 99,
            message: None,
        });

        let summary = run_all(w, updates).await;

        assert_eq!(summary.processed, 20);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.current(&RateLimitKey::for_user("flagged", 3)), None);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bad_events_do_not_stop_the_loop() {
        let api = RecordingApi::default();
        let store = FlakyStore {
            inner: InMemoryCounterStore::new(),
        };
        let w = worker(store, api.clone());

        let mut updates = vec![sticker(1, 666), sticker(2, 13)];
        updates.extend((3..=13).map(|i| sticker(i, 4)));

        let summary = run_all(w, updates).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 12);
        assert_eq!(summary.escalated, 1);
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_intake() {
        let api = RecordingApi::default();
        let w = worker(InMemoryCounterStore::new(), api.clone());

        let (tx, rx) = mpsc::channel(16);
        for i in 1..=5 {
            tx.send(sticker(i, 1)).await.unwrap();
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let summary = w.run(rx, shutdown_rx).await;

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.abandoned, 5);
        assert!(tx.send(sticker(6, 1)).await.is_err());
    }
}
