//! Routes envelopes to the active channel after the preference check.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::channels::{ChannelKind, DeliveryResult, NotificationChannel};
use crate::envelope::{DeliveryId, NotificationCategory, NotificationEnvelope};
use crate::error::DeliveryError;
use crate::settings::NotificationSettings;

pub struct ChannelDispatcher {
    channel: Option<Arc<dyn NotificationChannel>>,
    settings: Arc<RwLock<NotificationSettings>>,
}

impl ChannelDispatcher {
    pub fn new(
        channel: Option<Arc<dyn NotificationChannel>>,
        settings: Arc<RwLock<NotificationSettings>>,
    ) -> Self {
        Self { channel, settings }
    }

    pub fn channel(&self) -> Option<&Arc<dyn NotificationChannel>> {
        self.channel.as_ref()
    }

    pub fn kind(&self) -> Option<ChannelKind> {
        self.channel.as_ref().map(|c| c.kind())
    }

    pub fn should_send(&self, category: NotificationCategory) -> bool {
        self.settings.read().should_send_notification(category)
    }

    /// Send one envelope.
    ///
    /// Returns `Ok(None)` without touching the channel when the user's
    /// preferences suppress the category. Presentation toggles are taken from
    /// the current settings at send time.
    pub async fn dispatch(
        &self,
        envelope: &NotificationEnvelope,
    ) -> DeliveryResult<Option<DeliveryId>> {
        let presentation = {
            let settings = self.settings.read();
            if !settings.should_send_notification(envelope.category) {
                debug!(category = %envelope.category, "Notification suppressed by settings");
                return Ok(None);
            }
            settings.presentation_for(envelope.category)
        };

        let Some(channel) = &self.channel else {
            return Err(DeliveryError::not_supported("no notification channel"));
        };

        let mut envelope = envelope.clone();
        envelope.presentation = presentation;
        let id = channel.send(&envelope).await?;
        debug!(channel = %channel.kind(), id = %id, "Notification handed to channel");
        Ok(Some(id))
    }

    pub async fn cancel(&self, id: &DeliveryId) -> DeliveryResult<()> {
        match &self.channel {
            Some(channel) => channel.cancel(id).await,
            None => Ok(()),
        }
    }

    pub async fn cancel_all(&self) -> DeliveryResult<()> {
        match &self.channel {
            Some(channel) => channel.cancel_all().await,
            None => Ok(()),
        }
    }
}
