//! Mobile push channel.
//!
//! Delivers through an Expo-compatible push gateway: one JSON message per
//! notification, answered with a push ticket that is either `ok` (with a
//! ticket id) or `error` (with a machine-readable reason).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::http::{build_client, send_honoring_retry_after, status_error, truncate_string};
use super::{
    CategoryDefinition, ChannelKind, DeliveryResult, DeviceRegistration, NotificationChannel,
    PermissionRequest, PermissionStatus,
};
use crate::Result;
use crate::envelope::{
    DeliveryId, InterruptionLevel, NotificationAction, NotificationCategory, NotificationEnvelope,
    NotificationPriority,
};
use crate::error::DeliveryError;

const DEFAULT_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";
const MAX_TITLE_CHARS: usize = 120;
const MAX_BODY_CHARS: usize = 1000;

/// Mobile push channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobilePushConfig {
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Push gateway URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Optional gateway access token (sent as a bearer token).
    #[serde(default)]
    pub access_token: Option<String>,
    /// Push token of the target device, if already known.
    #[serde(default)]
    pub device_token: Option<String>,
    /// Seconds the gateway keeps an undelivered message.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u32,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_ttl() -> u32 {
    3600
}

fn default_timeout() -> u64 {
    15
}

impl Default for MobilePushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            access_token: None,
            device_token: None,
            ttl_secs: default_ttl(),
            timeout_secs: default_timeout(),
        }
    }
}

impl MobilePushConfig {
    /// Read `NOTIFY_MOBILE_PUSH_*` variables. Returns `None` when the channel
    /// is not configured at all.
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let endpoint = var("NOTIFY_MOBILE_PUSH_ENDPOINT");
        let access_token = var("NOTIFY_MOBILE_PUSH_ACCESS_TOKEN");
        let device_token = var("NOTIFY_MOBILE_PUSH_DEVICE_TOKEN");
        if endpoint.is_none() && access_token.is_none() && device_token.is_none() {
            return None;
        }

        Some(Self {
            enabled: true,
            endpoint: endpoint.unwrap_or_else(default_endpoint),
            access_token,
            device_token,
            ttl_secs: var("NOTIFY_MOBILE_PUSH_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_ttl),
            ..Default::default()
        })
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    token: Option<String>,
    permission: PermissionStatus,
    granted: PermissionRequest,
    categories: HashMap<NotificationCategory, Vec<NotificationAction>>,
}

/// A push ticket returned by the gateway.
#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    id: Option<String>,
    message: Option<String>,
    details: Option<TicketDetails>,
}

#[derive(Debug, Deserialize)]
struct TicketDetails {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    data: Option<Vec<PushTicket>>,
    #[serde(default)]
    errors: Vec<GatewayError>,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    code: Option<String>,
    message: Option<String>,
}

/// Mobile push notification channel.
pub struct MobilePushChannel {
    config: MobilePushConfig,
    client: Client,
    state: RwLock<DeviceState>,
}

impl MobilePushChannel {
    /// Create a new mobile push channel.
    pub fn new(config: MobilePushConfig) -> Result<Self> {
        let client = build_client(config.timeout_secs)?;
        let token = config.device_token.clone().filter(|t| !t.trim().is_empty());
        let state = DeviceState {
            permission: if token.is_some() {
                PermissionStatus::Granted
            } else {
                PermissionStatus::NotDetermined
            },
            token,
            ..Default::default()
        };
        Ok(Self {
            config,
            client,
            state: RwLock::new(state),
        })
    }

    fn interruption_level(level: InterruptionLevel) -> &'static str {
        match level {
            InterruptionLevel::Passive => "passive",
            InterruptionLevel::Active => "active",
            InterruptionLevel::TimeSensitive => "time-sensitive",
            InterruptionLevel::Critical => "critical",
        }
    }

    fn gateway_priority(priority: NotificationPriority) -> &'static str {
        match priority {
            NotificationPriority::High => "high",
            NotificationPriority::Normal => "normal",
            NotificationPriority::Low => "default",
        }
    }

    /// Build the gateway message for `envelope`.
    fn build_payload(&self, token: &str, envelope: &NotificationEnvelope) -> Value {
        let state = self.state.read();
        let presentation = &envelope.presentation;

        let sound = if envelope.is_emergency() && state.granted.critical_alert {
            json!({ "critical": true, "name": "default", "volume": 1.0 })
        } else if presentation.sound {
            json!("default")
        } else {
            Value::Null
        };

        // Android channels are created per category, with a quiet variant.
        let channel_id = if presentation.vibrate {
            envelope.category.as_str().to_string()
        } else {
            format!("{}-quiet", envelope.category.as_str())
        };

        let mut data = envelope.data.clone();
        data.insert("category".into(), json!(envelope.category.as_str()));
        data.insert("threadKey".into(), json!(envelope.thread_key));
        data.insert("relevanceScore".into(), json!(envelope.relevance_score));
        data.insert(
            "requiresInteraction".into(),
            json!(envelope.requires_interaction),
        );
        data.insert("actions".into(), json!(envelope.actions));
        if envelope.is_emergency() && state.granted.full_screen_intent {
            data.insert("fullScreenIntent".into(), json!(true));
        }

        let mut message = json!({
            "to": token,
            "title": truncate_string(&envelope.title, MAX_TITLE_CHARS),
            "body": truncate_string(&envelope.body, MAX_BODY_CHARS),
            "sound": sound,
            "priority": Self::gateway_priority(envelope.priority),
            "channelId": channel_id,
            "interruptionLevel": Self::interruption_level(envelope.interruption_level),
            "ttl": self.config.ttl_secs,
            "data": data,
        });

        if presentation.badge {
            message["badge"] = json!(1);
        }
        if state.categories.contains_key(&envelope.category) {
            message["categoryId"] = json!(envelope.category.as_str());
        }

        message
    }

    /// Translate a ticket into a delivery result, updating device state.
    fn handle_ticket(&self, ticket: PushTicket) -> DeliveryResult<DeliveryId> {
        if ticket.status == "ok" {
            return Ok(ticket
                .id
                .map(DeliveryId::from)
                .unwrap_or_else(DeliveryId::generate));
        }

        let reason = ticket
            .details
            .and_then(|d| d.error)
            .unwrap_or_else(|| "Unknown".to_string());
        let message = ticket.message.unwrap_or_default();

        match reason.as_str() {
            "DeviceNotRegistered" => {
                let mut state = self.state.write();
                state.token = None;
                state.permission = PermissionStatus::Denied;
                warn!("Mobile push token is no longer registered, clearing it");
                Err(DeliveryError::permission_denied(message))
            }
            "MessageRateExceeded" => Err(DeliveryError::transient(message)),
            _ => Err(DeliveryError::not_supported(format!("{}: {}", reason, message))),
        }
    }
}

#[async_trait]
impl NotificationChannel for MobilePushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::MobilePush
    }

    fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.endpoint.is_empty()
    }

    fn supported_features(&self) -> PermissionRequest {
        PermissionRequest {
            alert: true,
            sound: true,
            badge: true,
            critical_alert: true,
            time_sensitive: true,
            full_screen_intent: true,
            require_interaction: false,
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
            return Err(DeliveryError::not_supported("mobile push is not configured"));
        }

        let mut state = self.state.write();
        if state.token.is_some() {
            state.permission = PermissionStatus::Granted;
            state.granted = request.intersect(&self.supported_features());
            debug!(granted = ?state.granted, "Mobile push permission granted");
        }
        Ok(state.permission)
    }

    async fn register_device(&self, registration: DeviceRegistration) -> DeliveryResult<()> {
        match registration {
            DeviceRegistration::PushToken { token } => {
                let token = token.trim().to_string();
                if token.is_empty() {
                    return Err(DeliveryError::permission_denied("empty push token"));
                }
                let mut state = self.state.write();
                state.token = Some(token);
                // A fresh token means the app was (re)authorized by the user.
                state.permission = PermissionStatus::Granted;
                info!("Registered mobile push token");
                Ok(())
            }
            DeviceRegistration::WebSubscription(_) => Err(DeliveryError::not_supported(
                "mobile push does not accept web push subscriptions",
            )),
        }
    }

    fn push_token(&self) -> Option<String> {
        self.state.read().token.clone()
    }

    async fn register_categories(&self, categories: &[CategoryDefinition]) -> DeliveryResult<()> {
        let mut state = self.state.write();
        for definition in categories {
            state
                .categories
                .insert(definition.category, definition.actions.clone());
        }
        debug!(count = categories.len(), "Registered mobile push categories");
        Ok(())
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> DeliveryResult<DeliveryId> {
        if !self.is_configured() {
            return Err(DeliveryError::not_supported("mobile push is not configured"));
        }
        let token = {
            let state = self.state.read();
            match (&state.token, state.permission) {
                (Some(token), PermissionStatus::Granted) => token.clone(),
                _ => {
                    return Err(DeliveryError::permission_denied(
                        "no authorized mobile push token",
                    ));
                }
            }
        };

        let payload = json!([self.build_payload(&token, envelope)]);
        let response = send_honoring_retry_after("mobile_push", || {
            let mut request = self
                .client
                .post(&self.config.endpoint)
                .header("Accept", "application/json")
                .json(&payload);
            if let Some(access_token) = &self.config.access_token {
                request = request.bearer_auth(access_token);
            }
            request
        })
        .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("Mobile push gateway failed: {} - {}", status, body);
            return Err(status_error("mobile push gateway", status, &body));
        }

        let parsed: PushResponse = serde_json::from_str(&body).map_err(|e| {
            DeliveryError::transient(format!("unreadable push gateway response: {}", e))
        })?;

        if let Some(error) = parsed.errors.first() {
            return Err(DeliveryError::not_supported(format!(
                "{}: {}",
                error.code.as_deref().unwrap_or("GatewayError"),
                error.message.as_deref().unwrap_or_default()
            )));
        }

        let ticket = parsed
            .data
            .and_then(|tickets| tickets.into_iter().next())
            .ok_or_else(|| DeliveryError::transient("push gateway returned no ticket"))?;

        let id = self.handle_ticket(ticket)?;
        debug!(%id, category = %envelope.category, "Mobile push accepted");
        Ok(id)
    }

    async fn cancel(&self, id: &DeliveryId) -> DeliveryResult<()> {
        // The gateway cannot recall an accepted ticket.
        debug!(%id, "Mobile push cannot withdraw accepted notifications");
        Ok(())
    }

    async fn cancel_all(&self) -> DeliveryResult<()> {
        Ok(())
    }
}
