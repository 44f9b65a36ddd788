// Entry point of the Telegram moderation bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic): rate limiting, enforcement, ingestion
// - `infra/` = Implementations of core traits (Redis, in-memory store, Bot API client)
// - `telegram/` = Telegram-specific adapters (webhook server, update decoding)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Start the ingestion workers and the webhook server
// 4. Register the webhook and wait for Ctrl-C

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
mod settings;
#[path = "telegram/telegram_layer.rs"]
mod telegram;

use crate::core::ingestion::IngestionPool;
use crate::core::moderation::{CounterStore, ModerationActuator, RateLimiter};
use crate::infra::moderation::{InMemoryCounterStore, RedisCounterStore};
use crate::infra::telegram::TelegramBotClient;
use crate::settings::{AppConfig, StartupError, StoreBackend};
use crate::telegram::{build_router, WebhookState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = AppConfig::load()?;

    match settings.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory counter store, counters are not shared");
            run(settings, InMemoryCounterStore::new()).await
        }
        StoreBackend::Redis => {
            let store = RedisCounterStore::connect(&settings.store.addrs, settings.store.mode)
                .await
                .map_err(|e| match e.kind() {
                    redis::ErrorKind::InvalidClientConfig => {
                        StartupError::InvalidStoreAddress(settings.store.addrs.clone())
                    }
                    _ => StartupError::Store(e),
                })?;
            run(settings, store).await
        }
    }
}

async fn run<S: CounterStore + 'static>(settings: AppConfig, store: S) -> anyhow::Result<()> {
    let telegram = &settings.telegram;
    let client = TelegramBotClient::new(&telegram.api_base, &telegram.token, telegram.proxy.as_deref())
        .map_err(StartupError::Client)?;

    let moderation = settings.moderation_config();
    let actuator = Arc::new(ModerationActuator::new(
        client.clone(),
        moderation.strategy,
        moderation.restrict_duration,
    ));
    let limiter = Arc::new(RateLimiter::new(store, moderation));

    let pool = IngestionPool::spawn(&settings.ingestion_config(), limiter, actuator);
    let router = pool.router();
    tracing::info!(shards = router.shard_count(), "Ingestion ready");

    let state = WebhookState {
        router,
        secret_token: telegram.secret_token.as_deref().map(Arc::from),
    };
    let app = build_router(&telegram.path, state);

    let addr = settings.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    tracing::info!(%addr, path = %telegram.path, "Webhook server listening");

    let mut server = tokio::spawn(async move { axum::serve(listener, app).await });

    let description = client
        .set_webhook(&settings.webhook_url(), telegram.secret_token.as_deref())
        .await
        .map_err(StartupError::Webhook)?;
    tracing::debug!("setWebhook: {}", description);
    tracing::info!("Bot is running, press Ctrl-C to stop");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        }
        exited = &mut server => {
            match exited {
                Ok(Ok(())) => tracing::warn!("Webhook server exited"),
                Ok(Err(e)) => tracing::error!("Webhook server failed: {}", e),
                Err(e) => tracing::error!("Webhook server task crashed: {}", e),
            }
        }
    }

    server.abort();

    if let Some(summary) = pool.shutdown().await {
        tracing::info!(
            processed = summary.processed,
            escalated = summary.escalated,
            skipped = summary.skipped,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "Ingestion drained"
        );
    }

    tracing::info!("Stopping");
    Ok(())
}
