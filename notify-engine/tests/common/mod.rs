//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use notify_engine::channels::{
    CategoryDefinition, ChannelKind, DeliveryResult, DeviceRegistration, NotificationChannel,
    PermissionRequest, PermissionStatus,
};
use notify_engine::engine::Sleeper;
use notify_engine::envelope::{DeliveryId, NotificationEnvelope};
use notify_engine::error::DeliveryErrorKind;
use notify_engine::settings::PreferenceStore;
use notify_engine::NotificationEngine;

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Mobile-push stand-in whose send results are scripted.
pub struct FakeChannel {
    status: Mutex<PermissionStatus>,
    grant_on_request: AtomicBool,
    script: Mutex<VecDeque<DeliveryResult<()>>>,
    attempts: AtomicUsize,
    sent: Mutex<Vec<NotificationEnvelope>>,
    token: Mutex<Option<String>>,
}

impl FakeChannel {
    pub fn new(status: PermissionStatus) -> Arc<Self> {
        Arc::new(Self {
            grant_on_request: AtomicBool::new(status != PermissionStatus::Denied),
            status: Mutex::new(status),
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            token: Mutex::new(None),
        })
    }

    pub fn granted() -> Arc<Self> {
        Self::new(PermissionStatus::Granted)
    }

    pub fn denied() -> Arc<Self> {
        Self::new(PermissionStatus::Denied)
    }

    pub fn allow_on_request(&self) {
        self.grant_on_request.store(true, Ordering::SeqCst);
    }

    pub fn script(&self, results: impl IntoIterator<Item = DeliveryResult<()>>) {
        self.script.lock().extend(results);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<NotificationEnvelope> {
        self.sent.lock().clone()
    }

    pub fn sent_titles(&self) -> Vec<String> {
        self.sent.lock().iter().map(|e| e.title.clone()).collect()
    }
}

#[async_trait]
impl NotificationChannel for FakeChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::MobilePush
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn supported_features(&self) -> PermissionRequest {
        PermissionRequest::full()
    }

    fn permission_status(&self) -> PermissionStatus {
        *self.status.lock()
    }

    async fn request_permission(
        &self,
        _request: &PermissionRequest,
    ) -> DeliveryResult<PermissionStatus> {
        let status = if self.grant_on_request.load(Ordering::SeqCst) {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        *self.status.lock() = status;
        Ok(status)
    }

    async fn register_device(&self, registration: DeviceRegistration) -> DeliveryResult<()> {
        if let DeviceRegistration::PushToken { token } = registration {
            *self.token.lock() = Some(token);
        }
        Ok(())
    }

    fn push_token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    async fn register_categories(&self, _categories: &[CategoryDefinition]) -> DeliveryResult<()> {
        Ok(())
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> DeliveryResult<DeliveryId> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;

        if let Some(Err(e)) = self.script.lock().pop_front() {
            if e.kind() == DeliveryErrorKind::PermissionDenied {
                *self.status.lock() = PermissionStatus::Denied;
            }
            return Err(e);
        }

        self.sent.lock().push(envelope.clone());
        Ok(DeliveryId::new(format!("ticket-{}", attempt)))
    }

    async fn cancel(&self, _id: &DeliveryId) -> DeliveryResult<()> {
        Ok(())
    }

    async fn cancel_all(&self) -> DeliveryResult<()> {
        Ok(())
    }
}

/// Engine over `channel` and `store`, with a recording sleeper.
pub fn build_engine(
    channel: Arc<FakeChannel>,
    store: Arc<dyn PreferenceStore>,
) -> (Arc<NotificationEngine>, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let engine = NotificationEngine::builder(store)
        .channel(channel)
        .sleeper(sleeper.clone())
        .build();
    (Arc::new(engine), sleeper)
}
