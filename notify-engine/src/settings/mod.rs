//! User notification preferences.
//!
//! Settings are a single [`NotificationSettings`] value persisted as JSON in a
//! [`PreferenceStore`] under one key per platform family.

mod store;

pub use store::{MemoryPreferenceStore, PreferenceStore, SqlitePreferenceStore};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;
use crate::envelope::{NotificationCategory, Presentation};

/// Namespace prefix of the persisted settings keys.
pub const SETTINGS_KEY_PREFIX: &str = "notification_settings";

/// Platform family a settings record belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFamily {
    Mobile,
    Web,
}

impl PlatformFamily {
    pub fn settings_key(&self) -> String {
        format!("{}.{}", SETTINGS_KEY_PREFIX, self)
    }
}

/// Per-category enable flags and global presentation toggles.
///
/// Emergencies are always delivered and have no flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub alerts: bool,
    pub info: bool,
    pub sound: bool,
    pub vibrate: bool,
    pub badge: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            alerts: true,
            info: true,
            sound: true,
            vibrate: true,
            badge: true,
        }
    }
}

impl NotificationSettings {
    /// Whether a notification of `category` may be delivered.
    pub fn should_send_notification(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::Emergency => true,
            NotificationCategory::Alert => self.alerts,
            NotificationCategory::Info => self.info,
            NotificationCategory::Custom => true,
        }
    }

    /// Presentation toggles for `category`. Emergencies always play a sound.
    pub fn presentation_for(&self, category: NotificationCategory) -> Presentation {
        Presentation {
            sound: self.sound || category == NotificationCategory::Emergency,
            vibrate: self.vibrate,
            badge: self.badge,
        }
    }

    /// Apply a partial update, returning the merged record.
    pub fn merged(mut self, patch: &SettingsPatch) -> Self {
        if let Some(v) = patch.alerts {
            self.alerts = v;
        }
        if let Some(v) = patch.info {
            self.info = v;
        }
        if let Some(v) = patch.sound {
            self.sound = v;
        }
        if let Some(v) = patch.vibrate {
            self.vibrate = v;
        }
        if let Some(v) = patch.badge {
            self.badge = v;
        }
        self
    }
}

/// Partial settings update; `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub alerts: Option<bool>,
    pub info: Option<bool>,
    pub sound: Option<bool>,
    pub vibrate: Option<bool>,
    pub badge: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Loads and saves [`NotificationSettings`] for one platform family.
#[derive(Clone)]
pub struct SettingsRepository {
    store: Arc<dyn PreferenceStore>,
    key: String,
}

impl SettingsRepository {
    pub fn new(store: Arc<dyn PreferenceStore>, family: PlatformFamily) -> Self {
        Self {
            store,
            key: family.settings_key(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the stored settings, creating and persisting defaults if absent.
    ///
    /// A corrupt record is replaced with defaults.
    pub async fn load_or_init(&self) -> Result<NotificationSettings> {
        match self.store.get(&self.key).await? {
            Some(raw) => match serde_json::from_str::<NotificationSettings>(&raw) {
                Ok(settings) => {
                    debug!(key = %self.key, "Loaded notification settings");
                    Ok(settings)
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Discarding unreadable notification settings");
                    let settings = NotificationSettings::default();
                    self.save(&settings).await?;
                    Ok(settings)
                }
            },
            None => {
                let settings = NotificationSettings::default();
                self.save(&settings).await?;
                debug!(key = %self.key, "Created default notification settings");
                Ok(settings)
            }
        }
    }

    pub async fn save(&self, settings: &NotificationSettings) -> Result<()> {
        let raw = serde_json::to_string(settings)?;
        self.store.set(&self.key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = NotificationSettings::default();
        assert!(settings.alerts);
        assert!(settings.info);
        assert!(settings.sound && settings.vibrate && settings.badge);
    }

    #[test]
    fn test_emergency_cannot_be_disabled() {
        let settings = NotificationSettings {
            alerts: false,
            info: false,
            sound: false,
            ..Default::default()
        };
        assert!(settings.should_send_notification(NotificationCategory::Emergency));
        assert!(!settings.should_send_notification(NotificationCategory::Alert));
        assert!(!settings.should_send_notification(NotificationCategory::Info));
        assert!(settings.presentation_for(NotificationCategory::Emergency).sound);
        assert!(!settings.presentation_for(NotificationCategory::Info).sound);
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let patch = SettingsPatch {
            alerts: Some(false),
            ..Default::default()
        };
        let merged = NotificationSettings::default().merged(&patch);
        assert_eq!(
            merged,
            NotificationSettings {
                alerts: false,
                ..Default::default()
            }
        );
        assert!(SettingsPatch::default().is_empty());
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: NotificationSettings = serde_json::from_str(r#"{"info":false}"#).unwrap();
        assert!(!settings.info);
        assert!(settings.alerts);
    }

    #[test]
    fn test_settings_keys() {
        assert_eq!(
            PlatformFamily::Mobile.settings_key(),
            "notification_settings.mobile"
        );
        assert_eq!(PlatformFamily::Web.settings_key(), "notification_settings.web");
    }

    #[tokio::test]
    async fn test_load_or_init_persists_defaults() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let repo = SettingsRepository::new(store.clone(), PlatformFamily::Web);

        let settings = repo.load_or_init().await.unwrap();
        assert_eq!(settings, NotificationSettings::default());
        assert!(store.get("notification_settings.web").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_or_init_replaces_corrupt_record() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store
            .set("notification_settings.mobile", "not json")
            .await
            .unwrap();
        let repo = SettingsRepository::new(store.clone(), PlatformFamily::Mobile);

        let settings = repo.load_or_init().await.unwrap();
        assert_eq!(settings, NotificationSettings::default());
        let raw = store.get("notification_settings.mobile").await.unwrap().unwrap();
        assert!(serde_json::from_str::<NotificationSettings>(&raw).is_ok());
    }
}
