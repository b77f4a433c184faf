//! Browser push channel.
//!
//! Notifications are encrypted for the registered subscription and posted to
//! its push service. Accepted messages are tracked by the push service's
//! message URL so they can be deleted before the browser fetches them.

mod crypto;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use self::crypto::{AUTH_SECRET_LEN, PUBLIC_KEY_LEN, VapidKeys, decode_b64url, encrypt_payload};
use super::http::{build_client, send_honoring_retry_after, status_error, truncate_string};
use super::{
    CategoryDefinition, ChannelKind, DeliveryResult, DeviceRegistration, NotificationChannel,
    PermissionRequest, PermissionStatus,
};
use crate::envelope::{
    DeliveryId, InterruptionLevel, NotificationAction, NotificationCategory, NotificationEnvelope,
};
use crate::error::DeliveryError;
use crate::{Error, Result};

const MAX_PAYLOAD_BYTES: usize = 3500;
const DEFAULT_CONCURRENCY: usize = 16;
const VAPID_JWT_LIFETIME_SECS: i64 = 12 * 60 * 60;
const VAPID_JWT_SKEW_SECS: i64 = 60;

/// A browser push subscription (`PushSubscription.toJSON()` fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPushSubscription {
    pub endpoint: String,
    /// Base64url P-256 public key of the browser.
    pub p256dh: String,
    /// Base64url authentication secret.
    pub auth: String,
}

impl WebPushSubscription {
    fn decode_keys(&self) -> DeliveryResult<([u8; PUBLIC_KEY_LEN], [u8; AUTH_SECRET_LEN])> {
        let p256dh: [u8; PUBLIC_KEY_LEN] = decode_b64url(&self.p256dh)
            .ok()
            .and_then(|raw| raw.try_into().ok())
            .ok_or_else(|| DeliveryError::not_supported("invalid subscription p256dh key"))?;
        let auth: [u8; AUTH_SECRET_LEN] = decode_b64url(&self.auth)
            .ok()
            .and_then(|raw| raw.try_into().ok())
            .ok_or_else(|| DeliveryError::not_supported("invalid subscription auth secret"))?;
        Ok((p256dh, auth))
    }

    fn validate(&self) -> DeliveryResult<()> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| DeliveryError::not_supported(format!("invalid endpoint: {}", e)))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(DeliveryError::not_supported("endpoint must be an http(s) URL"));
        }
        self.decode_keys().map(|_| ())
    }
}

/// Web push channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPushConfig {
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Base64url uncompressed P-256 public key.
    pub vapid_public_key: String,
    /// Base64url P-256 private scalar.
    pub vapid_private_key: String,
    /// Contact URI sent in the VAPID `sub` claim.
    #[serde(default = "default_subject")]
    pub vapid_subject: String,
    /// Subscription to deliver to, if already known.
    #[serde(default)]
    pub subscription: Option<WebPushSubscription>,
    /// Seconds the push service keeps an undelivered message.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u32,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_subject() -> String {
    "mailto:admin@localhost".to_string()
}

fn default_ttl() -> u32 {
    3600
}

fn default_timeout() -> u64 {
    15
}

impl Default for WebPushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            vapid_subject: default_subject(),
            subscription: None,
            ttl_secs: default_ttl(),
            timeout_secs: default_timeout(),
        }
    }
}

impl WebPushConfig {
    pub fn from_env() -> Result<Option<Self>> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let (vapid_public_key, vapid_private_key) = match (
            var("WEB_PUSH_VAPID_PUBLIC_KEY"),
            var("WEB_PUSH_VAPID_PRIVATE_KEY"),
        ) {
            (None, None) => return Ok(None),
            (Some(public), Some(private)) => (public, private),
            _ => {
                return Err(Error::config(
                    "Both WEB_PUSH_VAPID_PUBLIC_KEY and WEB_PUSH_VAPID_PRIVATE_KEY must be set",
                ));
            }
        };

        let subscription = match (
            var("WEB_PUSH_ENDPOINT"),
            var("WEB_PUSH_P256DH"),
            var("WEB_PUSH_AUTH"),
        ) {
            (Some(endpoint), Some(p256dh), Some(auth)) => Some(WebPushSubscription {
                endpoint,
                p256dh,
                auth,
            }),
            _ => None,
        };

        Ok(Some(Self {
            enabled: true,
            vapid_public_key,
            vapid_private_key,
            vapid_subject: var("WEB_PUSH_VAPID_SUBJECT").unwrap_or_else(default_subject),
            subscription,
            ..Default::default()
        }))
    }
}

#[derive(Debug, Clone)]
struct CachedJwt {
    jwt: String,
    exp_unix: i64,
}

#[derive(Debug, Clone)]
struct SentMessage {
    location: String,
    sent_at: Instant,
}

#[derive(Debug, Default)]
struct BrowserState {
    subscription: Option<WebPushSubscription>,
    permission: PermissionStatus,
    granted: PermissionRequest,
    categories: HashMap<NotificationCategory, Vec<NotificationAction>>,
}

/// JSON handed to the service worker, which renders it with
/// `showNotification`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebPushPayload {
    title: String,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    category: String,
    priority: String,
    interruption_level: String,
    relevance_score: f64,
    require_interaction: bool,
    renotify: bool,
    silent: bool,
    vibrate: bool,
    badge: bool,
    actions: Vec<NotificationAction>,
    created_at: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    data: Map<String, Value>,
}

impl WebPushPayload {
    fn from_envelope(
        envelope: &NotificationEnvelope,
        registered_actions: Option<&Vec<NotificationAction>>,
        granted: &PermissionRequest,
    ) -> Self {
        // Only actions the category was registered with can be shown.
        let actions = match registered_actions {
            Some(registered) => envelope
                .actions
                .iter()
                .filter(|a| registered.iter().any(|r| r.id == a.id))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Self {
            title: envelope.title.clone(),
            body: envelope.body.clone(),
            tag: envelope.thread_key.clone(),
            category: envelope.category.to_string(),
            priority: envelope.priority.to_string(),
            interruption_level: envelope.interruption_level.to_string(),
            relevance_score: envelope.relevance_score,
            require_interaction: envelope.requires_interaction && granted.require_interaction,
            renotify: envelope.is_emergency() && envelope.thread_key.is_some(),
            silent: !envelope.presentation.sound,
            vibrate: envelope.presentation.vibrate,
            badge: envelope.presentation.badge,
            actions,
            created_at: envelope.created_at.to_rfc3339(),
            data: envelope.data.clone(),
        }
    }

    fn into_bytes_capped(mut self, max_bytes: usize) -> DeliveryResult<Vec<u8>> {
        self.title = truncate_string(&self.title, 120);
        self.body = truncate_string(&self.body, 600);

        let bytes = serde_json::to_vec(&self)
            .map_err(|e| DeliveryError::not_supported(format!("payload serialization: {}", e)))?;
        if bytes.len() <= max_bytes {
            return Ok(bytes);
        }

        self.title = truncate_string(&self.title, 80);
        self.body = "Open the app to view details.".to_string();
        self.data = Map::new();
        serde_json::to_vec(&self)
            .map_err(|e| DeliveryError::not_supported(format!("payload serialization: {}", e)))
    }
}

fn urgency(level: InterruptionLevel) -> &'static str {
    match level {
        InterruptionLevel::Critical | InterruptionLevel::TimeSensitive => "high",
        InterruptionLevel::Active => "normal",
        InterruptionLevel::Passive => "low",
    }
}

fn push_service_audience(endpoint: &str) -> DeliveryResult<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| DeliveryError::not_supported(format!("invalid push endpoint: {}", e)))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(DeliveryError::not_supported("push endpoint has no origin"));
    }
    Ok(origin.ascii_serialization())
}

/// Web push notification channel.
pub struct WebPushChannel {
    config: WebPushConfig,
    vapid: VapidKeys,
    client: Client,
    state: RwLock<BrowserState>,
    jwt_cache: DashMap<String, CachedJwt>,
    sent: DashMap<DeliveryId, SentMessage>,
}

impl WebPushChannel {
    /// Create a new web push channel. Fails on malformed VAPID keys.
    pub fn new(config: WebPushConfig) -> Result<Self> {
        let vapid = VapidKeys::parse(&config.vapid_public_key, &config.vapid_private_key)?;
        let client = build_client(config.timeout_secs)?;

        let subscription = match config.subscription.clone() {
            Some(sub) => {
                sub.validate()
                    .map_err(|e| Error::config(format!("Invalid web push subscription: {}", e)))?;
                Some(sub)
            }
            None => None,
        };
        let state = BrowserState {
            permission: if subscription.is_some() {
                PermissionStatus::Granted
            } else {
                PermissionStatus::NotDetermined
            },
            subscription,
            ..Default::default()
        };

        Ok(Self {
            config,
            vapid,
            client,
            state: RwLock::new(state),
            jwt_cache: DashMap::new(),
            sent: DashMap::new(),
        })
    }

    /// Public key browsers need for `pushManager.subscribe`.
    pub fn vapid_public_key(&self) -> &str {
        self.vapid.public_b64()
    }

    fn authorization(&self, endpoint: &str) -> DeliveryResult<String> {
        let audience = push_service_audience(endpoint)?;
        let now = chrono::Utc::now().timestamp();

        let jwt = match self.jwt_cache.get(&audience) {
            Some(entry) if entry.exp_unix - VAPID_JWT_SKEW_SECS > now => entry.jwt.clone(),
            _ => {
                let (jwt, exp_unix) = self.vapid.sign_jwt(
                    &audience,
                    &self.config.vapid_subject,
                    VAPID_JWT_LIFETIME_SECS,
                )?;
                self.jwt_cache.insert(
                    audience,
                    CachedJwt {
                        jwt: jwt.clone(),
                        exp_unix,
                    },
                );
                jwt
            }
        };

        Ok(format!("vapid t={}, k={}", jwt, self.vapid.public_b64()))
    }

    /// Forget messages the push service has already expired.
    fn prune_sent(&self) {
        let ttl = Duration::from_secs(self.config.ttl_secs as u64);
        self.sent.retain(|_, m| m.sent_at.elapsed() < ttl);
    }

    fn forget_subscription(&self) {
        let mut state = self.state.write();
        state.subscription = None;
        state.permission = PermissionStatus::Denied;
    }

    async fn delete_message(&self, id: &DeliveryId, location: &str) -> DeliveryResult<()> {
        let authorization = self.authorization(location)?;
        let response = self
            .client
            .delete(location)
            .header("Authorization", authorization)
            .send()
            .await?;

        let status = response.status();
        // 404: already delivered or expired.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(%id, %status, "Web push message withdrawn");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error("web push service", status, &body))
    }
}

#[async_trait]
impl NotificationChannel for WebPushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WebPush
    }

    fn is_configured(&self) -> bool {
        self.config.enabled
    }

    fn supported_features(&self) -> PermissionRequest {
        PermissionRequest {
            alert: true,
            sound: true,
            badge: true,
            require_interaction: true,
            ..Default::default()
        }
    }

    fn permission_status(&self) -> PermissionStatus {
        self.state.read().permission
    }

    async fn request_permission(
        &self,
        request: &PermissionRequest,
    ) -> DeliveryResult<PermissionStatus> {
        if !self.is_configured() {
            return Err(DeliveryError::not_supported("web push is not configured"));
        }

        // The browser prompts when it subscribes; a subscription is the grant.
        let mut state = self.state.write();
        if state.subscription.is_some() {
            state.permission = PermissionStatus::Granted;
            state.granted = request.intersect(&self.supported_features());
        }
        Ok(state.permission)
    }

    async fn register_device(&self, registration: DeviceRegistration) -> DeliveryResult<()> {
        match registration {
            DeviceRegistration::WebSubscription(subscription) => {
                subscription.validate()?;
                let mut state = self.state.write();
                state.subscription = Some(subscription);
                state.permission = PermissionStatus::Granted;
                info!("Registered web push subscription");
                Ok(())
            }
            DeviceRegistration::PushToken { .. } => Err(DeliveryError::not_supported(
                "web push does not use push tokens",
            )),
        }
    }

    async fn register_categories(&self, categories: &[CategoryDefinition]) -> DeliveryResult<()> {
        let mut state = self.state.write();
        for definition in categories {
            state
                .categories
                .insert(definition.category, definition.actions.clone());
        }
        Ok(())
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> DeliveryResult<DeliveryId> {
        if !self.is_configured() {
            return Err(DeliveryError::not_supported("web push is not configured"));
        }

        let (subscription, payload) = {
            let state = self.state.read();
            let subscription = match (&state.subscription, state.permission) {
                (Some(sub), PermissionStatus::Granted) => sub.clone(),
                _ => {
                    return Err(DeliveryError::permission_denied(
                        "no authorized web push subscription",
                    ));
                }
            };
            let payload = WebPushPayload::from_envelope(
                envelope,
                state.categories.get(&envelope.category),
                &state.granted,
            );
            (subscription, payload)
        };

        let (ua_public, auth_secret) = subscription.decode_keys()?;
        let body = encrypt_payload(
            &payload.into_bytes_capped(MAX_PAYLOAD_BYTES)?,
            &ua_public,
            &auth_secret,
        )?;
        let authorization = self.authorization(&subscription.endpoint)?;
        let urgency = urgency(envelope.interruption_level);

        let response = send_honoring_retry_after("web_push", || {
            self.client
                .post(&subscription.endpoint)
                .header("TTL", self.config.ttl_secs.to_string())
                .header("Content-Encoding", "aes128gcm")
                .header("Content-Type", "application/octet-stream")
                .header("Authorization", authorization.clone())
                .header("Urgency", urgency)
                .body(body.clone())
        })
        .await?;

        let status = response.status();
        if status.is_success() {
            let id = DeliveryId::generate();
            if let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                self.prune_sent();
                self.sent.insert(
                    id.clone(),
                    SentMessage {
                        location: location.to_string(),
                        sent_at: Instant::now(),
                    },
                );
            }
            debug!(%id, category = %envelope.category, "Web push accepted");
            return Ok(id);
        }

        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());

        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                self.forget_subscription();
                info!(
                    endpoint = %subscription.endpoint,
                    %status,
                    "Web push subscription expired or was revoked"
                );
                Err(DeliveryError::permission_denied(format!(
                    "subscription gone ({})",
                    status
                )))
            }
            StatusCode::PAYLOAD_TOO_LARGE => Err(DeliveryError::not_supported(
                "push service rejected payload size",
            )),
            _ => {
                warn!(%status, "Web push delivery failed");
                Err(status_error("web push service", status, &body_text))
            }
        }
    }

    async fn cancel(&self, id: &DeliveryId) -> DeliveryResult<()> {
        self.prune_sent();
        let Some((_, message)) = self.sent.remove(id) else {
            return Ok(());
        };
        self.delete_message(id, &message.location).await
    }

    async fn cancel_all(&self) -> DeliveryResult<()> {
        self.prune_sent();
        let pending: Vec<(DeliveryId, SentMessage)> = self
            .sent
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        self.sent.clear();

        stream::iter(pending)
            .for_each_concurrent(DEFAULT_CONCURRENCY, |(id, message)| async move {
                if let Err(e) = self.delete_message(&id, &message.location).await {
                    warn!(%id, error = %e, "Failed to withdraw web push message");
                }
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{NotificationPriority, classify};
    use p256::SecretKey;
    use p256::elliptic_curve::rand_core::OsRng;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    fn test_config(with_subscription: bool) -> WebPushConfig {
        let vapid = SecretKey::random(&mut OsRng);
        let browser = SecretKey::random(&mut OsRng);
        WebPushConfig {
            enabled: true,
            vapid_public_key: crypto::encode_b64url(
                vapid.public_key().to_encoded_point(false).as_bytes(),
            ),
            vapid_private_key: crypto::encode_b64url(&vapid.to_bytes()),
            subscription: with_subscription.then(|| WebPushSubscription {
                endpoint: "https://push.example.net/wpush/v2/abc".to_string(),
                p256dh: crypto::encode_b64url(
                    browser.public_key().to_encoded_point(false).as_bytes(),
                ),
                auth: crypto::encode_b64url(&[7u8; 16]),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_web_push_config_default() {
        let config = WebPushConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.vapid_subject, "mailto:admin@localhost");
        assert_eq!(config.ttl_secs, 3600);
    }

    #[test]
    fn test_invalid_vapid_keys_fail_construction() {
        let config = WebPushConfig {
            enabled: true,
            vapid_public_key: "abc".into(),
            vapid_private_key: "def".into(),
            ..Default::default()
        };
        assert!(WebPushChannel::new(config).is_err());
    }

    #[test]
    fn test_subscription_grants_permission() {
        let channel = WebPushChannel::new(test_config(true)).unwrap();
        assert_eq!(channel.permission_status(), PermissionStatus::Granted);
        assert!(channel.push_token().is_none());

        let channel = WebPushChannel::new(test_config(false)).unwrap();
        assert_eq!(channel.permission_status(), PermissionStatus::NotDetermined);
    }

    #[tokio::test]
    async fn test_register_subscription() {
        let channel = WebPushChannel::new(test_config(false)).unwrap();
        let subscription = test_config(true).subscription.unwrap();

        channel
            .register_device(DeviceRegistration::WebSubscription(subscription))
            .await
            .unwrap();
        let status = channel
            .request_permission(&PermissionRequest::full())
            .await
            .unwrap();
        assert_eq!(status, PermissionStatus::Granted);
        assert!(channel.state.read().granted.require_interaction);
        assert!(!channel.state.read().granted.critical_alert);

        let err = channel
            .register_device(DeviceRegistration::PushToken {
                token: "abc".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_send_without_subscription_is_permission_denied() {
        let channel = WebPushChannel::new(test_config(false)).unwrap();
        let envelope = classify(NotificationCategory::Info, "t", "b", None).unwrap();
        let err = channel.send(&envelope).await.unwrap_err();
        assert!(matches!(err, DeliveryError::PermissionDenied(_)));
    }

    #[test]
    fn test_payload_actions_follow_registration() {
        let envelope = classify(
            NotificationCategory::Alert,
            "Water Main Break",
            "Expect low pressure",
            Some(NotificationPriority::High),
        )
        .unwrap();
        let granted = PermissionRequest::full();

        let unregistered = WebPushPayload::from_envelope(&envelope, None, &granted);
        assert!(unregistered.actions.is_empty());

        let registered = vec![NotificationAction::from_id("view")];
        let payload = WebPushPayload::from_envelope(&envelope, Some(&registered), &granted);
        assert_eq!(payload.actions, registered);
        assert!(payload.require_interaction);
        assert_eq!(payload.interruption_level, "timeSensitive");
        assert_eq!(payload.tag.as_deref(), Some("alert"));
    }

    #[test]
    fn test_payload_is_capped() {
        let mut envelope = classify(NotificationCategory::Info, "t", "b", None).unwrap();
        envelope
            .data
            .insert("blob".into(), Value::String("x".repeat(10_000)));
        let bytes = WebPushPayload::from_envelope(&envelope, None, &PermissionRequest::default())
            .into_bytes_capped(MAX_PAYLOAD_BYTES)
            .unwrap();
        assert!(bytes.len() <= MAX_PAYLOAD_BYTES);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["body"], "Open the app to view details.");
    }

    #[test]
    fn test_audience_and_urgency() {
        assert_eq!(
            push_service_audience("https://fcm.googleapis.com/fcm/send/abc").unwrap(),
            "https://fcm.googleapis.com"
        );
        assert_eq!(
            push_service_audience("https://push.example.net:8443/x").unwrap(),
            "https://push.example.net:8443"
        );
        assert_eq!(urgency(InterruptionLevel::Critical), "high");
        assert_eq!(urgency(InterruptionLevel::Passive), "low");
    }

    #[test]
    fn test_vapid_authorization_is_cached() {
        let channel = WebPushChannel::new(test_config(true)).unwrap();
        let first = channel
            .authorization("https://push.example.net/wpush/v2/abc")
            .unwrap();
        let second = channel
            .authorization("https://push.example.net/other")
            .unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("vapid t="));
        assert!(first.ends_with(channel.vapid_public_key()));
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_noop() {
        let channel = WebPushChannel::new(test_config(true)).unwrap();
        channel.cancel(&DeliveryId::new("missing")).await.unwrap();
        channel.cancel_all().await.unwrap();
    }
}
