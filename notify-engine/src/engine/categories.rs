//! Registers notification categories and their actions with the channel.

use std::sync::atomic::{AtomicBool, Ordering};

use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::channels::{CategoryDefinition, NotificationChannel};
use crate::envelope::{NotificationAction, NotificationCategory};

/// One definition per category, with the actions envelopes of that category
/// may carry.
pub fn default_category_definitions() -> Vec<CategoryDefinition> {
    NotificationCategory::iter()
        .map(|category| CategoryDefinition {
            category,
            actions: category
                .registered_actions()
                .iter()
                .map(|id| NotificationAction::from_id(id))
                .collect(),
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct CategoryConfigurator {
    configured: AtomicBool,
}

impl CategoryConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    /// Register the default categories. Failure is logged and leaves delivery
    /// working without interactive actions; a later call tries again.
    pub async fn configure(&self, channel: &dyn NotificationChannel) -> bool {
        if self.is_configured() {
            return true;
        }

        let definitions = default_category_definitions();
        match channel.register_categories(&definitions).await {
            Ok(()) => {
                self.configured.store(true, Ordering::Release);
                debug!(
                    channel = %channel.kind(),
                    count = definitions.len(),
                    "Registered notification categories"
                );
                true
            }
            Err(e) => {
                warn!(
                    channel = %channel.kind(),
                    error = %e,
                    "Failed to register notification categories, actions will be unavailable"
                );
                false
            }
        }
    }
}
