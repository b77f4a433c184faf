//! In-memory channel used by the engine unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channels::{
    CategoryDefinition, ChannelKind, DeliveryResult, DeviceRegistration, NotificationChannel,
    PermissionRequest, PermissionStatus,
};
use crate::envelope::{DeliveryId, NotificationEnvelope};

/// Channel whose send results are scripted in advance. Sends succeed once
/// the script runs out.
pub struct ScriptedChannel {
    configured: AtomicBool,
    status: Mutex<PermissionStatus>,
    grant_on_request: AtomicBool,
    permission_requests: AtomicUsize,
    category_registrations: AtomicUsize,
    fail_categories: AtomicBool,
    script: Mutex<VecDeque<DeliveryResult<()>>>,
    attempts: AtomicUsize,
    sent: Mutex<Vec<NotificationEnvelope>>,
    cancelled: Mutex<Vec<DeliveryId>>,
    cancel_all_calls: AtomicUsize,
}

impl ScriptedChannel {
    fn with_status(status: PermissionStatus, grant_on_request: bool) -> Self {
        Self {
            configured: AtomicBool::new(true),
            status: Mutex::new(status),
            grant_on_request: AtomicBool::new(grant_on_request),
            permission_requests: AtomicUsize::new(0),
            category_registrations: AtomicUsize::new(0),
            fail_categories: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            cancel_all_calls: AtomicUsize::new(0),
        }
    }

    pub fn granted() -> Self {
        Self::with_status(PermissionStatus::Granted, true)
    }

    pub fn denied() -> Self {
        Self::with_status(PermissionStatus::Denied, false)
    }

    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    pub fn set_grant_on_request(&self, grant: bool) {
        self.grant_on_request.store(grant, Ordering::SeqCst);
    }

    pub fn fail_category_registration(&self, fail: bool) {
        self.fail_categories.store(fail, Ordering::SeqCst);
    }

    /// Queue results for the next sends, in order.
    pub fn script(&self, results: impl IntoIterator<Item = DeliveryResult<()>>) {
        self.script.lock().extend(results);
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub fn category_registrations(&self) -> usize {
        self.category_registrations.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent(&self) -> Vec<NotificationEnvelope> {
        self.sent.lock().clone()
    }

    pub fn sent_titles(&self) -> Vec<String> {
        self.sent.lock().iter().map(|e| e.title.clone()).collect()
    }

    pub fn cancelled(&self) -> Vec<DeliveryId> {
        self.cancelled.lock().clone()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::MobilePush
    }

    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
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
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        let status = if self.grant_on_request.load(Ordering::SeqCst) {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        *self.status.lock() = status;
        Ok(status)
    }

    async fn register_device(&self, _registration: DeviceRegistration) -> DeliveryResult<()> {
        Ok(())
    }

    async fn register_categories(&self, _categories: &[CategoryDefinition]) -> DeliveryResult<()> {
        if self.fail_categories.load(Ordering::SeqCst) {
            return Err(crate::error::DeliveryError::not_supported(
                "categories unavailable",
            ));
        }
        self.category_registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> DeliveryResult<DeliveryId> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;

        let scripted = self.script.lock().pop_front();
        if let Some(Err(e)) = scripted {
            if e.kind() == crate::error::DeliveryErrorKind::PermissionDenied {
                *self.status.lock() = PermissionStatus::Denied;
            }
            return Err(e);
        }

        self.sent.lock().push(envelope.clone());
        Ok(DeliveryId::new(format!("msg-{}", attempt)))
    }

    async fn cancel(&self, id: &DeliveryId) -> DeliveryResult<()> {
        self.cancelled.lock().push(id.clone());
        Ok(())
    }

    async fn cancel_all(&self) -> DeliveryResult<()> {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
