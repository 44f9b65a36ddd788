// Routes inbound updates onto the worker queues.
//
// Every worker owns one bounded queue. An update goes to the queue picked by
// its sender id, so all events of one user are handled by one worker, in the
// order the webhook received them.

use crate::core::moderation::InboundUpdate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// What happens when a worker queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for room. The webhook answers late and Telegram backs off.
    #[default]
    Block,
    /// Drop the update and answer the webhook right away.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    /// Queue full under `OverflowPolicy::Drop`
    Dropped,
    /// The worker is gone (shutting down)
    Closed,
}

/// Cheap to clone; the webhook handler keeps one.
#[derive(Clone)]
pub struct EventRouter {
    shards: Arc<[mpsc::Sender<InboundUpdate>]>,
    overflow: OverflowPolicy,
}

impl EventRouter {
    /// `shards` must not be empty.
    pub(crate) fn new(shards: Vec<mpsc::Sender<InboundUpdate>>, overflow: OverflowPolicy) -> Self {
        debug_assert!(!shards.is_empty());
        Self {
            shards: shards.into(),
            overflow,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Pick the queue for an update. Updates without a message have no user
    /// ordering to preserve and are spread by update id.
    pub fn shard_for(&self, update: &InboundUpdate) -> usize {
        let key = update
            .message
            .as_ref()
            .map(|m| m.sender_id)
            .unwrap_or(update.update_id);
        (key.unsigned_abs() % self.shards.len() as u64) as usize
    }

    pub async fn dispatch(&self, update: InboundUpdate) -> DispatchOutcome {
        let shard = &self.shards[self.shard_for(&update)];
        let update_id = update.update_id;

        match self.overflow {
            OverflowPolicy::Block => match shard.send(update).await {
                Ok(()) => DispatchOutcome::Queued,
                Err(_) => DispatchOutcome::Closed,
            },
            OverflowPolicy::Drop => match shard.try_send(update) {
                Ok(()) => DispatchOutcome::Queued,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(update_id, "Ingestion queue full, dropping update");
                    DispatchOutcome::Dropped
                }
                Err(TrySendError::Closed(_)) => DispatchOutcome::Closed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{ChatEvent, ContentKind};

    fn update(update_id: i64, sender_id: Option<i64>) -> InboundUpdate {
        InboundUpdate {
            update_id,
            message: sender_id.map(|sender_id| ChatEvent {
                sender_id,
                chat_id: -5,
                message_id: update_id,
                content_kind: ContentKind::Sticker,
                sender_display_name: "user".to_string(),
            }),
        }
    }

    fn router(shards: usize, capacity: usize, overflow: OverflowPolicy) -> (EventRouter, Vec<mpsc::Receiver<InboundUpdate>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..shards).map(|_| mpsc::channel(capacity)).unzip();
        (EventRouter::new(senders, overflow), receivers)
    }

    #[test]
    fn test_same_user_same_shard() {
        let (router, _rx) = router(4, 8, OverflowPolicy::Block);

        let first = router.shard_for(&update(1, Some(12345)));
        for id in 2..50 {
            assert_eq!(router.shard_for(&update(id, Some(12345))), first);
        }
        assert_ne!(
            router.shard_for(&update(1, Some(12345))),
            router.shard_for(&update(1, Some(12346)))
        );
    }

    #[test]
    fn test_negative_ids_stay_in_range() {
        let (router, _rx) = router(3, 8, OverflowPolicy::Block);

        assert!(router.shard_for(&update(-7, None)) < 3);
        assert!(router.shard_for(&update(1, Some(i64::MIN))) < 3);
    }

    #[tokio::test]
    async fn test_drop_policy_drops_when_full() {
        let (router, mut rx) = router(1, 1, OverflowPolicy::Drop);

        assert_eq!(router.dispatch(update(1, Some(1))).await, DispatchOutcome::Queued);
        assert_eq!(router.dispatch(update(2, Some(1))).await, DispatchOutcome::Dropped);

        assert_eq!(rx[0].recv().await.map(|u| u.update_id), Some(1));
        assert!(rx[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn test_block_policy_keeps_order() {
        let (router, mut rx) = router(1, 4, OverflowPolicy::Block);

        for id in 1..=3 {
            assert_eq!(router.dispatch(update(id, Some(9))).await, DispatchOutcome::Queued);
        }

        for id in 1..=3 {
            assert_eq!(rx[0].recv().await.map(|u| u.update_id), Some(id));
        }
    }

    #[tokio::test]
    async fn test_closed_queue_reported() {
        let (router, rx) = router(1, 1, OverflowPolicy::Block);
        drop(rx);

        assert_eq!(router.dispatch(update(1, Some(1))).await, DispatchOutcome::Closed);
    }
}
