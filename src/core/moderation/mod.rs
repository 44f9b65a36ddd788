// Core moderation module - counting flagged content and deciding what to do about it.
// Models, the store and platform ports, and the services built on them.

pub mod counter_store;
pub mod moderation_actuator;
pub mod moderation_models;
pub mod rate_limiter;

pub use counter_store::*;
pub use moderation_actuator::*;
pub use moderation_models::*;
pub use rate_limiter::*;
