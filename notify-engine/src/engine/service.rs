//! Notification engine facade.
//!
//! The NotificationEngine is responsible for:
//! - Probing the channel and tracking the engine state
//! - Classifying, filtering and dispatching notifications
//! - Retrying transient failures with exponential backoff
//! - Queueing envelopes while no channel can deliver, and flushing them
//!   once one can

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::categories::CategoryConfigurator;
use super::dispatcher::ChannelDispatcher;
use super::probe::{CapabilityProbe, DegradedReason, ProbeResult};
use super::queue::{DeliveryQueue, EnqueueOutcome, QueuedNotification};
use super::retry::{RetryController, RetryOutcome, RetryPolicy, Sleeper, TokioSleeper};
use super::stats::{DeliveryCounters, DeliveryStats, FeatureFlags};
use crate::Result;
use crate::channels::{
    DeviceRegistration, NotificationChannel, PermissionStatus, WebPushSubscription,
};
use crate::config::EngineConfig;
use crate::envelope::{
    DeliveryId, NotificationCategory, NotificationEnvelope, NotificationInput,
    NotificationPriority, classify_input,
};
use crate::error::{DeliveryError, DeliveryErrorKind};
use crate::settings::{
    NotificationSettings, PlatformFamily, PreferenceStore, SettingsPatch, SettingsRepository,
};

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Uninitialized,
    Probing,
    Ready,
    /// Deliveries are queued until permission is granted.
    Degraded(DegradedReason),
}

impl EngineState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Probing => f.write_str("probing"),
            Self::Ready => f.write_str("ready"),
            Self::Degraded(reason) => write!(f, "degraded({})", reason),
        }
    }
}

/// Result of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub attempted: usize,
    pub delivered: usize,
    pub suppressed: usize,
    pub requeued: usize,
    pub dropped: usize,
    pub cancelled: usize,
}

/// Builder for [`NotificationEngine`].
pub struct NotificationEngineBuilder {
    store: Arc<dyn PreferenceStore>,
    channel: Option<Arc<dyn NotificationChannel>>,
    retry: RetryPolicy,
    max_queue_size: Option<usize>,
    platform: PlatformFamily,
    sleeper: Arc<dyn Sleeper>,
}

impl NotificationEngineBuilder {
    pub fn channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn max_queue_size(mut self, max: Option<usize>) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Settings namespace used when no channel is set.
    pub fn platform(mut self, platform: PlatformFamily) -> Self {
        self.platform = platform;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> NotificationEngine {
        let family = self
            .channel
            .as_ref()
            .map(|c| c.kind().platform_family())
            .unwrap_or(self.platform);
        let settings = Arc::new(RwLock::new(NotificationSettings::default()));
        let (state_tx, _) = watch::channel(EngineState::Uninitialized);

        NotificationEngine {
            settings_repo: SettingsRepository::new(self.store, family),
            dispatcher: ChannelDispatcher::new(self.channel.clone(), settings.clone()),
            probe: CapabilityProbe::new(self.channel.clone()),
            retry: RetryController::new(self.retry, self.sleeper),
            queue: DeliveryQueue::new(self.max_queue_size),
            categories: CategoryConfigurator::new(),
            channel: self.channel,
            settings,
            settings_loaded: OnceCell::new(),
            settings_write: Mutex::new(()),
            initialized: OnceCell::new(),
            state_tx,
            in_flight: DashMap::new(),
            counters: DeliveryCounters::default(),
            cancellation_token: CancellationToken::new(),
        }
    }
}

/// Unified notification engine.
///
/// Facade methods never fail: delivery problems are logged and resolve to
/// `None` or `false`. Share it as `Arc<NotificationEngine>`.
pub struct NotificationEngine {
    channel: Option<Arc<dyn NotificationChannel>>,
    settings_repo: SettingsRepository,
    settings: Arc<RwLock<NotificationSettings>>,
    settings_loaded: OnceCell<()>,
    /// Serializes merge plus save so the store never lags the in-memory copy.
    settings_write: Mutex<()>,
    dispatcher: ChannelDispatcher,
    probe: CapabilityProbe,
    retry: RetryController,
    queue: DeliveryQueue,
    categories: CategoryConfigurator,
    initialized: OnceCell<()>,
    state_tx: watch::Sender<EngineState>,
    /// Cancellation tokens of deliveries currently inside the retry loop.
    in_flight: DashMap<String, CancellationToken>,
    counters: DeliveryCounters,
    cancellation_token: CancellationToken,
}

impl NotificationEngine {
    pub fn builder(store: Arc<dyn PreferenceStore>) -> NotificationEngineBuilder {
        NotificationEngineBuilder {
            store,
            channel: None,
            retry: RetryPolicy::default(),
            max_queue_size: None,
            platform: PlatformFamily::Mobile,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Build an engine from configuration, constructing the configured channel.
    pub fn from_config(config: &EngineConfig, store: Arc<dyn PreferenceStore>) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::builder(store)
            .retry_policy(config.retry.clone())
            .max_queue_size(config.max_queue_size)
            .platform(config.platform_family());

        match &config.channel {
            Some(channel) if channel.is_enabled() => {
                builder = builder.channel(channel.build()?);
            }
            Some(channel) => {
                info!(channel = %channel.kind(), "Notification channel disabled");
            }
            None => debug!("No notification channel configured"),
        }
        Ok(builder.build())
    }

    // ========== Lifecycle ==========

    /// Load settings, probe the channel and register categories.
    ///
    /// The probe runs once. Resolves `true` while the engine is ready, so a
    /// later successful [`Self::request_permissions`] is reflected here.
    pub async fn initialize(&self) -> bool {
        self.initialized
            .get_or_init(|| self.run_initialization())
            .await;
        self.state().is_ready()
    }

    async fn run_initialization(&self) {
        self.transition(EngineState::Probing);
        self.load_settings().await;

        match self.probe.probe().await {
            ProbeResult::Ready => self.become_ready().await,
            ProbeResult::Unavailable(reason) => {
                warn!(%reason, "Notifications unavailable, deliveries will be queued");
                self.transition(EngineState::Degraded(reason));
            }
        }
    }

    /// Load persisted settings once, creating defaults if none are stored.
    pub async fn load_settings(&self) -> NotificationSettings {
        self.settings_loaded
            .get_or_init(|| async {
                match self.settings_repo.load_or_init().await {
                    Ok(settings) => *self.settings.write() = settings,
                    Err(e) => warn!(
                        key = %self.settings_repo.key(),
                        error = %e,
                        "Failed to load notification settings, using defaults"
                    ),
                }
            })
            .await;
        self.settings()
    }

    async fn become_ready(&self) {
        if let Some(channel) = &self.channel {
            self.categories.configure(channel.as_ref()).await;
        }
        self.transition(EngineState::Ready);
        self.flush_queue().await;
    }

    /// Ask the user for notification permission.
    ///
    /// This is the only way out of the degraded state. Queued envelopes are
    /// flushed when permission is granted.
    pub async fn request_permissions(&self) -> bool {
        self.initialize().await;
        if self.state().is_ready() {
            return true;
        }

        match self.probe.request_permissions().await {
            ProbeResult::Ready => {
                self.become_ready().await;
                true
            }
            ProbeResult::Unavailable(reason) => {
                self.transition(EngineState::Degraded(reason));
                false
            }
        }
    }

    /// Call when the host app returns to the foreground.
    pub async fn on_foreground(&self) -> FlushReport {
        if self.state().is_ready() {
            self.flush_queue().await
        } else {
            FlushReport::default()
        }
    }

    /// Abort retry waits and in-flight deliveries. Queued entries are kept
    /// in memory but nothing is delivered afterwards.
    pub fn shutdown(&self) {
        info!(
            queued = self.queue.len(),
            in_flight = self.in_flight.len(),
            "Shutting down notification engine"
        );
        self.cancellation_token.cancel();
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    /// Watch engine state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, next: EngineState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Notification engine state changed");
        }
    }

    /// Ready -> Degraded(PermissionRevoked), only if still ready.
    fn mark_revoked(&self) {
        let changed = self.state_tx.send_if_modified(|state| {
            if state.is_ready() {
                *state = EngineState::Degraded(DegradedReason::PermissionRevoked);
                true
            } else {
                false
            }
        });
        if changed {
            warn!("Notification permission revoked, deliveries will be queued");
        }
    }

    // ========== Sending ==========

    pub async fn send_emergency_alert(
        &self,
        title: &str,
        content: &str,
        priority: Option<NotificationPriority>,
    ) -> Option<DeliveryId> {
        self.send_category(NotificationCategory::Emergency, title, content, priority)
            .await
    }

    pub async fn send_alert(
        &self,
        title: &str,
        content: &str,
        priority: Option<NotificationPriority>,
    ) -> Option<DeliveryId> {
        self.send_category(NotificationCategory::Alert, title, content, priority)
            .await
    }

    pub async fn send_info(
        &self,
        title: &str,
        content: &str,
        priority: Option<NotificationPriority>,
    ) -> Option<DeliveryId> {
        self.send_category(NotificationCategory::Info, title, content, priority)
            .await
    }

    async fn send_category(
        &self,
        category: NotificationCategory,
        title: &str,
        content: &str,
        priority: Option<NotificationPriority>,
    ) -> Option<DeliveryId> {
        self.send_notification(NotificationInput {
            category: Some(category),
            priority,
            ..NotificationInput::new(title, content)
        })
        .await
    }

    /// Send a notification built from `input`.
    ///
    /// Resolves to the channel's delivery id, or `None` when the notification
    /// was suppressed, queued, dropped or rejected as invalid.
    pub async fn send_notification(&self, input: NotificationInput) -> Option<DeliveryId> {
        let id = input
            .id
            .clone()
            .unwrap_or_else(|| DeliveryId::generate().to_string());
        let envelope = match classify_input(input) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id = %id, error = %e, "Rejected notification");
                return None;
            }
        };
        self.send_envelope(id, envelope).await
    }

    async fn send_envelope(&self, id: String, envelope: NotificationEnvelope) -> Option<DeliveryId> {
        self.initialize().await;

        if !self.dispatcher.should_send(envelope.category) {
            debug!(id = %id, category = %envelope.category, "Notification suppressed by settings");
            self.counters.record_suppressed();
            return None;
        }

        let state = self.state();
        if !state.is_ready() {
            debug!(id = %id, %state, "Engine not ready, queueing notification");
            self.enqueue(id, envelope);
            return None;
        }

        let token = self.track(&id);
        let outcome = self
            .retry
            .run(&token, || self.dispatcher.dispatch(&envelope))
            .await;
        self.in_flight.remove(&id);

        match outcome {
            RetryOutcome::Delivered(delivery_id) => {
                self.counters.record_delivered();
                Some(delivery_id)
            }
            RetryOutcome::Suppressed => {
                self.counters.record_suppressed();
                None
            }
            RetryOutcome::Rejected(e) => {
                self.note_rejection(&id, &e);
                self.enqueue(id, envelope);
                None
            }
            RetryOutcome::Exhausted(e) => {
                warn!(id = %id, error = %e, "Dropping notification after retries");
                self.counters.record_dropped();
                None
            }
            RetryOutcome::Cancelled => {
                debug!(id = %id, "Notification cancelled before delivery");
                None
            }
        }
    }

    /// Send the channel's fixed test notification.
    pub async fn send_test_notification(&self) -> Option<DeliveryId> {
        self.initialize().await;
        if !self.state().is_ready() {
            debug!(state = %self.state(), "Skipping test notification, engine not ready");
            return None;
        }
        let channel = self.channel.as_ref()?;
        match channel.test().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(channel = %channel.kind(), error = %e, "Test notification failed");
                self.note_rejection("test", &e);
                None
            }
        }
    }

    fn track(&self, id: &str) -> CancellationToken {
        let token = self.cancellation_token.child_token();
        self.in_flight.insert(id.to_string(), token.clone());
        token
    }

    fn note_rejection(&self, id: &str, error: &DeliveryError) {
        debug!(id = %id, error = %error, "Notification rejected by channel, queueing");
        if error.kind() == DeliveryErrorKind::PermissionDenied {
            self.mark_revoked();
        }
    }

    fn enqueue(&self, id: String, envelope: NotificationEnvelope) {
        match self.queue.enqueue(QueuedNotification::new(id, envelope)) {
            EnqueueOutcome::Queued => self.counters.record_queued(),
            EnqueueOutcome::Evicted(_) => {
                self.counters.record_queued();
                self.counters.record_dropped();
            }
            EnqueueOutcome::Rejected(_) => self.counters.record_dropped(),
        }
    }

    // ========== Queue ==========

    /// Deliver queued envelopes in FIFO order.
    ///
    /// Only one pass runs at a time; a call made while another pass is running
    /// returns an empty report. The pass stops early if the engine degrades.
    pub async fn flush_queue(&self) -> FlushReport {
        let Some(pass) = self.queue.begin_flush() else {
            debug!("Queue flush already in progress");
            return FlushReport::default();
        };

        let mut report = FlushReport::default();
        while self.state().is_ready() {
            let Some(entry) = pass.next_due() else {
                break;
            };
            report.attempted += 1;

            let token = self.track(&entry.id);
            let outcome = self
                .retry
                .run(&token, || self.dispatcher.dispatch(&entry.envelope))
                .await;
            self.in_flight.remove(&entry.id);

            match outcome {
                RetryOutcome::Delivered(delivery_id) => {
                    debug!(id = %entry.id, delivery_id = %delivery_id, "Delivered queued notification");
                    self.counters.record_delivered();
                    report.delivered += 1;
                }
                RetryOutcome::Suppressed => {
                    self.counters.record_suppressed();
                    report.suppressed += 1;
                }
                RetryOutcome::Rejected(e) => {
                    self.note_rejection(&entry.id, &e);
                    pass.requeue(entry);
                    report.requeued += 1;
                }
                RetryOutcome::Exhausted(e) => {
                    warn!(id = %entry.id, error = %e, "Dropping queued notification after retries");
                    self.counters.record_dropped();
                    report.dropped += 1;
                }
                RetryOutcome::Cancelled => {
                    report.cancelled += 1;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                requeued = report.requeued,
                dropped = report.dropped,
                remaining = self.queue.len(),
                "Flushed notification queue"
            );
        }
        report
    }

    /// Copy of the queued entries in delivery order.
    pub fn queued(&self) -> Vec<QueuedNotification> {
        self.queue.snapshot()
    }

    // ========== Cancellation ==========

    /// Withdraw a notification by the caller-assigned id or the delivery id.
    ///
    /// Removes it from the queue, aborts a delivery still retrying, and asks
    /// the channel to withdraw it. Returns whether anything was withdrawn
    /// locally; notifications already shown cannot be recalled.
    pub async fn cancel_notification(&self, id: &str) -> bool {
        let queued = self.queue.remove(id).is_some();
        let in_flight = match self.in_flight.remove(id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        };

        if let Err(e) = self.dispatcher.cancel(&DeliveryId::new(id)).await {
            debug!(id = %id, error = %e, "Channel could not withdraw notification");
        }

        debug!(id = %id, queued, in_flight, "Cancelled notification");
        queued || in_flight
    }

    /// Withdraw everything queued or in flight. Returns the number of queued
    /// entries dropped.
    pub async fn cancel_all_notifications(&self) -> usize {
        let cleared = self.queue.clear();
        self.in_flight.retain(|_, token| {
            token.cancel();
            false
        });

        if let Err(e) = self.dispatcher.cancel_all().await {
            debug!(error = %e, "Channel could not withdraw notifications");
        }

        info!(cleared, "Cancelled all notifications");
        cleared
    }

    // ========== Devices ==========

    pub async fn register_push_token(&self, token: impl Into<String>) -> bool {
        self.register_device(DeviceRegistration::PushToken {
            token: token.into(),
        })
        .await
    }

    pub async fn register_web_subscription(&self, subscription: WebPushSubscription) -> bool {
        self.register_device(DeviceRegistration::WebSubscription(subscription))
            .await
    }

    /// Attach a device address. Delivery resumes after a successful
    /// [`Self::request_permissions`].
    async fn register_device(&self, registration: DeviceRegistration) -> bool {
        let Some(channel) = &self.channel else {
            warn!("Cannot register device without a notification channel");
            return false;
        };
        match channel.register_device(registration).await {
            Ok(()) => {
                info!(channel = %channel.kind(), "Registered notification device");
                true
            }
            Err(e) => {
                warn!(channel = %channel.kind(), error = %e, "Device registration rejected");
                false
            }
        }
    }

    pub fn push_token(&self) -> Option<String> {
        self.channel.as_ref().and_then(|c| c.push_token())
    }

    pub fn permission_status(&self) -> PermissionStatus {
        self.channel
            .as_ref()
            .map(|c| c.permission_status())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().is_ready() && self.permission_status() == PermissionStatus::Granted
    }

    // ========== Settings ==========

    pub fn settings(&self) -> NotificationSettings {
        *self.settings.read()
    }

    /// Merge `patch` into the settings and persist the result.
    ///
    /// The in-memory settings change even when persisting fails. Concurrent
    /// updates are applied and saved one at a time.
    pub async fn update_settings(&self, patch: SettingsPatch) -> NotificationSettings {
        self.load_settings().await;
        let _guard = self.settings_write.lock().await;

        let updated = {
            let mut settings = self.settings.write();
            let merged = settings.merged(&patch);
            *settings = merged;
            merged
        };

        if let Err(e) = self.settings_repo.save(&updated).await {
            warn!(key = %self.settings_repo.key(), error = %e, "Failed to persist notification settings");
        } else {
            debug!(key = %self.settings_repo.key(), ?updated, "Updated notification settings");
        }
        updated
    }

    // ========== Stats ==========

    pub fn stats(&self) -> DeliveryStats {
        let (delivered, suppressed, queued, dropped) = self.counters.snapshot();
        DeliveryStats {
            enabled: self.is_enabled(),
            permission_status: self.permission_status(),
            channel: self.dispatcher.kind(),
            state: self.state(),
            queue_depth: self.queue.len(),
            in_flight: self.in_flight.len(),
            push_token_registered: self.push_token().is_some(),
            features: FeatureFlags::from(&*self.settings.read()),
            delivered,
            suppressed,
            queued,
            dropped,
        }
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
