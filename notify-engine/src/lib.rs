//! Unified notification delivery engine.
//!
//! Turns application events into platform notifications: classification,
//! preference filtering, permission probing, retries with backoff and an
//! offline delivery queue, behind one [`NotificationEngine`] facade.

pub mod channels;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod settings;

pub use config::EngineConfig;
pub use engine::{DeliveryStats, EngineState, NotificationEngine};
pub use envelope::{DeliveryId, NotificationCategory, NotificationInput, NotificationPriority};
pub use error::{DeliveryError, Error, Result};
pub use settings::{NotificationSettings, SettingsPatch};
