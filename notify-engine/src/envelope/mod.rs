//! Notification envelopes.
//!
//! An envelope is the fully-resolved, ready-to-send representation of a
//! notification. Envelopes are produced by the [`classifier`] and consumed by
//! the platform channels.

pub mod classifier;

pub use classifier::{classify, classify_input};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Category of a notification.
///
/// The category determines default interruption level, relevance, the set of
/// interactive actions and whether user preferences may suppress it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// Safety-critical alert; never suppressed.
    Emergency,
    /// Board or community alert.
    Alert,
    /// Informational notice.
    Info,
    /// Caller-constructed notification.
    Custom,
}

impl NotificationCategory {
    /// Category identifier used when registering with a channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Alert => "alert",
            Self::Info => "info",
            Self::Custom => "custom",
        }
    }

    /// Action ids a channel may present for this category, in display order.
    pub fn registered_actions(&self) -> &'static [&'static str] {
        match self {
            Self::Emergency => &["acknowledge", "view"],
            Self::Alert => &["view", "dismiss", "reply"],
            Self::Info => &["view"],
            Self::Custom => &["view", "dismiss"],
        }
    }

    pub fn default_interruption_level(&self) -> InterruptionLevel {
        match self {
            Self::Emergency => InterruptionLevel::Critical,
            Self::Alert => InterruptionLevel::Active,
            Self::Info => InterruptionLevel::Passive,
            Self::Custom => InterruptionLevel::Active,
        }
    }

    pub fn default_relevance(&self) -> f64 {
        match self {
            Self::Emergency => 1.0,
            Self::Alert => 0.7,
            Self::Info => 0.3,
            Self::Custom => 0.5,
        }
    }

    pub fn default_priority(&self) -> NotificationPriority {
        match self {
            Self::Emergency | Self::Alert => NotificationPriority::High,
            Self::Info => NotificationPriority::Low,
            Self::Custom => NotificationPriority::Normal,
        }
    }
}

/// Delivery priority.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// How assertively a notification interrupts the user.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
#[serde(rename_all = "camelCase")]
pub enum InterruptionLevel {
    Passive,
    Active,
    TimeSensitive,
    Critical,
}

/// An interactive action shown alongside a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
}

impl NotificationAction {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Build an action from a registered id, using its standard label.
    pub fn from_id(id: &str) -> Self {
        let label = match id {
            "acknowledge" => "Acknowledge",
            "view" => "View",
            "dismiss" => "Dismiss",
            "reply" => "Reply",
            other => other,
        };
        Self::new(id, label)
    }
}

/// Presentation toggles applied right before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    pub sound: bool,
    pub vibrate: bool,
    pub badge: bool,
}

impl Default for Presentation {
    fn default() -> Self {
        Self {
            sound: true,
            vibrate: true,
            badge: true,
        }
    }
}

/// The unit of delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    pub title: String,
    pub body: String,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub interruption_level: InterruptionLevel,
    pub relevance_score: f64,
    pub thread_key: Option<String>,
    pub requires_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub presentation: Presentation,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl NotificationEnvelope {
    pub fn is_emergency(&self) -> bool {
        self.category == NotificationCategory::Emergency
    }
}

/// Caller-supplied description of a custom notification.
///
/// Every optional field falls back to the category default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationInput {
    /// Caller-assigned id, used to cancel the notification while queued.
    pub id: Option<String>,
    pub category: Option<NotificationCategory>,
    pub title: String,
    pub body: String,
    pub priority: Option<NotificationPriority>,
    pub interruption_level: Option<InterruptionLevel>,
    pub relevance_score: Option<f64>,
    pub thread_key: Option<String>,
    pub requires_interaction: Option<bool>,
    /// Requested action ids; ids not registered for the category are dropped.
    pub actions: Option<Vec<String>>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl NotificationInput {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Default::default()
        }
    }
}

/// Identifier returned by a channel for an accepted notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(String);

impl DeliveryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id for channels that do not hand one back.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeliveryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DeliveryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
