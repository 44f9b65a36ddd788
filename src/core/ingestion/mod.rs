// Core ingestion module - the queue between the webhook and the moderation engine.

pub mod event_router;
pub mod ingestion_loop;
pub mod ingestion_pool;

pub use event_router::*;
pub use ingestion_loop::*;
pub use ingestion_pool::*;
