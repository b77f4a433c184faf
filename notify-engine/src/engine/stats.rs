//! Engine statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::EngineState;
use crate::channels::{ChannelKind, PermissionStatus};
use crate::settings::NotificationSettings;

/// Which categories and presentation features are currently enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub emergency: bool,
    pub alerts: bool,
    pub info: bool,
    pub sound: bool,
    pub vibrate: bool,
    pub badge: bool,
}

impl From<&NotificationSettings> for FeatureFlags {
    fn from(settings: &NotificationSettings) -> Self {
        Self {
            emergency: true,
            alerts: settings.alerts,
            info: settings.info,
            sound: settings.sound,
            vibrate: settings.vibrate,
            badge: settings.badge,
        }
    }
}

/// Snapshot returned by [`super::NotificationEngine::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStats {
    /// The engine is ready and the channel holds permission.
    pub enabled: bool,
    pub permission_status: PermissionStatus,
    pub channel: Option<ChannelKind>,
    pub state: EngineState,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub push_token_registered: bool,
    pub features: FeatureFlags,
    pub delivered: u64,
    pub suppressed: u64,
    pub queued: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(super) struct DeliveryCounters {
    delivered: AtomicU64,
    suppressed: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryCounters {
    pub(super) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// `(delivered, suppressed, queued, dropped)`
    pub(super) fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.delivered.load(Ordering::Relaxed),
            self.suppressed.load(Ordering::Relaxed),
            self.queued.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}
