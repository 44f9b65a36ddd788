// Counter store implementations for the moderation core.

pub mod in_memory_counter_store;
pub mod redis_counter_store;

pub use in_memory_counter_store::InMemoryCounterStore;
pub use redis_counter_store::{RedisCounterStore, RedisMode};
