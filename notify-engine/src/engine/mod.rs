//! Delivery engine.
//!
//! Composes the capability probe, category configuration, dispatcher, retry
//! controller and delivery queue behind [`NotificationEngine`].

mod categories;
mod dispatcher;
mod probe;
mod queue;
mod retry;
mod service;
mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use categories::{CategoryConfigurator, default_category_definitions};
pub use dispatcher::ChannelDispatcher;
pub use probe::{CapabilityProbe, DegradedReason, ProbeResult};
pub use queue::{DeliveryQueue, EnqueueOutcome, FlushPass, QueuedNotification};
pub use retry::{RetryController, RetryOutcome, RetryPolicy, Sleeper, TokioSleeper};
pub use service::{EngineState, FlushReport, NotificationEngine, NotificationEngineBuilder};
pub use stats::{DeliveryStats, FeatureFlags};
