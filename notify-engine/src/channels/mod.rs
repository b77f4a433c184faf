//! Platform notification channels.
//!
//! A channel is a platform-specific transport that presents notifications to
//! the user:
//! - Mobile push through an Expo-compatible push gateway
//! - Browser push through the Web Push protocol (RFC 8030/8291/8292)
//!
//! The engine talks to exactly one channel, selected from [`ChannelConfig`]
//! at deploy time.

mod http;
mod mobile_push;
mod web_push;

pub use http::install_rustls_provider;
pub use mobile_push::{MobilePushChannel, MobilePushConfig};
pub use web_push::{WebPushChannel, WebPushConfig, WebPushSubscription};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::{
    DeliveryId, NotificationAction, NotificationCategory, NotificationEnvelope,
    NotificationPriority, classify,
};
use crate::error::DeliveryError;
use crate::settings::PlatformFamily;
use crate::{Error, Result};

/// Result type for channel operations.
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

/// Kind of channel backing the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    MobilePush,
    WebPush,
}

impl ChannelKind {
    pub fn platform_family(&self) -> PlatformFamily {
        match self {
            Self::MobilePush => PlatformFamily::Mobile,
            Self::WebPush => PlatformFamily::Web,
        }
    }
}

/// Whether the user allows notifications on this channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    #[default]
    NotDetermined,
    Granted,
    Denied,
}

/// Capabilities requested when asking for permission.
///
/// Channels grant the subset they support; see
/// [`NotificationChannel::supported_features`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub alert: bool,
    pub sound: bool,
    pub badge: bool,
    pub critical_alert: bool,
    pub time_sensitive: bool,
    pub full_screen_intent: bool,
    pub require_interaction: bool,
}

impl PermissionRequest {
    /// The most capability-rich request.
    pub fn full() -> Self {
        Self {
            alert: true,
            sound: true,
            badge: true,
            critical_alert: true,
            time_sensitive: true,
            full_screen_intent: true,
            require_interaction: true,
        }
    }

    /// Features present in both requests.
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            alert: self.alert && other.alert,
            sound: self.sound && other.sound,
            badge: self.badge && other.badge,
            critical_alert: self.critical_alert && other.critical_alert,
            time_sensitive: self.time_sensitive && other.time_sensitive,
            full_screen_intent: self.full_screen_intent && other.full_screen_intent,
            require_interaction: self.require_interaction && other.require_interaction,
        }
    }
}

/// Device address a channel delivers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceRegistration {
    /// Push token issued to a mobile app install.
    PushToken { token: String },
    /// Browser push subscription.
    WebSubscription(WebPushSubscription),
}

/// A category together with the interactive actions it supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    pub category: NotificationCategory,
    pub actions: Vec<NotificationAction>,
}

/// Trait for platform notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel kind.
    fn kind(&self) -> ChannelKind;

    /// Whether the channel has the credentials it needs to run at all.
    fn is_configured(&self) -> bool;

    /// Features this channel can honor when permission is granted.
    fn supported_features(&self) -> PermissionRequest;

    /// Current permission state.
    fn permission_status(&self) -> PermissionStatus;

    /// Ask for permission, returning the resulting state.
    async fn request_permission(&self, request: &PermissionRequest)
    -> DeliveryResult<PermissionStatus>;

    /// Attach the device address notifications are sent to.
    async fn register_device(&self, registration: DeviceRegistration) -> DeliveryResult<()>;

    /// Channel-specific delivery token, if the channel uses one.
    fn push_token(&self) -> Option<String> {
        None
    }

    /// Register categories and their actions. Must be idempotent.
    async fn register_categories(&self, categories: &[CategoryDefinition]) -> DeliveryResult<()>;

    /// Send a notification through this channel.
    async fn send(&self, envelope: &NotificationEnvelope) -> DeliveryResult<DeliveryId>;

    /// Withdraw a notification that has not been shown yet. Best effort.
    async fn cancel(&self, id: &DeliveryId) -> DeliveryResult<()>;

    /// Withdraw every notification that has not been shown yet. Best effort.
    async fn cancel_all(&self) -> DeliveryResult<()>;

    /// Send a fixed test notification.
    async fn test(&self) -> DeliveryResult<DeliveryId> {
        let envelope = classify(
            NotificationCategory::Info,
            "Test notification",
            "Notifications are working.",
            Some(NotificationPriority::Normal),
        )
        .map_err(|e| DeliveryError::not_supported(e.to_string()))?;
        self.send(&envelope).await
    }
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Mobile push gateway.
    MobilePush(MobilePushConfig),
    /// Browser Web Push.
    WebPush(WebPushConfig),
}

impl ChannelConfig {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::MobilePush(_) => ChannelKind::MobilePush,
            Self::WebPush(_) => ChannelKind::WebPush,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            Self::MobilePush(c) => c.enabled,
            Self::WebPush(c) => c.enabled,
        }
    }

    /// Build the configured channel.
    pub fn build(&self) -> Result<Arc<dyn NotificationChannel>> {
        if !self.is_enabled() {
            return Err(Error::config(format!("{} channel is disabled", self.kind())));
        }
        let channel: Arc<dyn NotificationChannel> = match self {
            Self::MobilePush(c) => Arc::new(MobilePushChannel::new(c.clone())?),
            Self::WebPush(c) => Arc::new(WebPushChannel::new(c.clone())?),
        };
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_request_intersect() {
        let supported = PermissionRequest {
            alert: true,
            sound: true,
            require_interaction: true,
            ..Default::default()
        };
        let granted = PermissionRequest::full().intersect(&supported);
        assert_eq!(granted, supported);
        assert!(!granted.critical_alert);
    }

    #[test]
    fn test_channel_kind_family() {
        assert_eq!(
            ChannelKind::MobilePush.platform_family(),
            PlatformFamily::Mobile
        );
        assert_eq!(ChannelKind::WebPush.platform_family(), PlatformFamily::Web);
        assert_eq!(ChannelKind::WebPush.to_string(), "web_push");
    }

    #[test]
    fn test_channel_config_serde() {
        let json = r#"{"type":"mobile_push","enabled":true,"device_token":"ExponentPushToken[abc]"}"#;
        let config: ChannelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind(), ChannelKind::MobilePush);
        assert!(config.is_enabled());
    }

    #[test]
    fn test_disabled_channel_is_not_built() {
        let config = ChannelConfig::MobilePush(MobilePushConfig::default());
        assert!(config.build().is_err());
    }

    #[test]
    fn test_device_registration_serde() {
        let reg: DeviceRegistration =
            serde_json::from_str(r#"{"type":"push_token","token":"abc"}"#).unwrap();
        assert_eq!(
            reg,
            DeviceRegistration::PushToken {
                token: "abc".to_string()
            }
        );
    }
}
