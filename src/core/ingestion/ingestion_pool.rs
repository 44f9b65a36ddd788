// Spawns the ingestion workers and hands out the router that feeds them.

use super::event_router::{EventRouter, OverflowPolicy};
use super::ingestion_loop::{IngestionSummary, IngestionWorker};
use crate::core::moderation::{CounterStore, ModerationActuator, ModerationApi, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Number of workers; users are sharded across them by id
    pub workers: usize,
    /// Capacity of each worker's queue
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// How long shutdown waits for workers. Zero means it does not wait.
    pub shutdown_grace: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 1024,
            overflow: OverflowPolicy::Block,
            shutdown_grace: Duration::ZERO,
        }
    }
}

pub struct IngestionPool {
    router: EventRouter,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<IngestionSummary>>,
    grace: Duration,
}

impl IngestionPool {
    /// Spawn `config.workers` workers sharing one limiter and one actuator.
    pub fn spawn<S, A>(
        config: &IngestionConfig,
        limiter: Arc<RateLimiter<S>>,
        actuator: Arc<ModerationActuator<A>>,
    ) -> Self
    where
        S: CounterStore + 'static,
        A: ModerationApi + 'static,
    {
        let workers = config.workers.max(1);
        let (shutdown, _) = watch::channel(false);

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            let worker = IngestionWorker::new(id, Arc::clone(&limiter), Arc::clone(&actuator));
            handles.push(tokio::spawn(worker.run(rx, shutdown.subscribe())));
            senders.push(tx);
        }

        tracing::info!(
            workers,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            "Ingestion pool started"
        );

        Self {
            router: EventRouter::new(senders, config.overflow),
            shutdown,
            handles,
            grace: config.shutdown_grace,
        }
    }

    pub fn router(&self) -> EventRouter {
        self.router.clone()
    }

    /// Stop intake on every worker.
    ///
    /// With a zero grace period this returns right away and whatever a worker
    /// is doing is left to finish (or not) on its own. Otherwise it waits up
    /// to the grace period and returns the combined summary if every worker
    /// made it.
    pub async fn shutdown(self) -> Option<IngestionSummary> {
        let _ = self.shutdown.send(true);

        if self.grace.is_zero() {
            return None;
        }

        let handles = self.handles;
        let wait_all = async move {
            let mut total = IngestionSummary::default();
            for handle in handles {
                match handle.await {
                    Ok(summary) => total += summary,
                    Err(e) => tracing::error!("Ingestion worker crashed: {}", e),
                }
            }
            total
        };

        match tokio::time::timeout(self.grace, wait_all).await {
            Ok(total) => Some(total),
            Err(_) => {
                tracing::warn!(grace = ?self.grace, "Ingestion workers still busy, not waiting");
                None
            }
        }
    }
}
