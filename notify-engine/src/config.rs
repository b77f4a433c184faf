//! Engine configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channels::{ChannelConfig, MobilePushConfig, WebPushConfig};
use crate::engine::RetryPolicy;
use crate::settings::PlatformFamily;
use crate::{Error, Result};

/// Configuration for [`crate::engine::NotificationEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Bound on the delivery queue. `None` keeps every entry.
    pub max_queue_size: Option<usize>,
    /// Settings namespace used when no channel is configured.
    pub platform: PlatformFamily,
    /// Channel the engine delivers through.
    pub channel: Option<ChannelConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_queue_size: None,
            platform: PlatformFamily::Mobile,
            channel: None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| Error::config(format!("Invalid {}='{}': {}", name, raw, e)))
        })
        .transpose()
}

impl EngineConfig {
    /// Build a configuration from `NOTIFY_*` environment variables, loading a
    /// `.env` file first when present.
    ///
    /// `NOTIFY_CHANNEL` selects `mobile_push`, `web_push` or `none`. When it is
    /// unset, web push is used if VAPID keys are present, then mobile push if
    /// any gateway variable is present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded environment file");
        }

        let mut config = Self::default();
        if let Some(v) = env_parse("NOTIFY_MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = env_parse("NOTIFY_RETRY_INITIAL_DELAY_MS")? {
            config.retry.initial_delay_ms = v;
        }
        if let Some(v) = env_parse("NOTIFY_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = v;
        }
        if let Some(v) = env_parse("NOTIFY_RETRY_JITTER")? {
            config.retry.jitter = v;
        }
        config.max_queue_size = env_parse("NOTIFY_MAX_QUEUE_SIZE")?;
        if let Some(raw) = env_var("NOTIFY_PLATFORM") {
            config.platform = PlatformFamily::from_str(&raw)
                .map_err(|_| Error::config(format!("Invalid NOTIFY_PLATFORM='{}'", raw)))?;
        }

        config.channel = match env_var("NOTIFY_CHANNEL").as_deref() {
            Some("mobile_push") => Some(ChannelConfig::MobilePush(
                MobilePushConfig::from_env().ok_or_else(|| {
                    Error::config("NOTIFY_CHANNEL=mobile_push but no mobile push variables are set")
                })?,
            )),
            Some("web_push") => Some(ChannelConfig::WebPush(WebPushConfig::from_env()?.ok_or_else(
                || Error::config("NOTIFY_CHANNEL=web_push but no VAPID keys are set"),
            )?)),
            Some("none") => None,
            Some(other) => {
                return Err(Error::config(format!("Unknown NOTIFY_CHANNEL '{}'", other)));
            }
            None => match WebPushConfig::from_env()? {
                Some(web) => Some(ChannelConfig::WebPush(web)),
                None => MobilePushConfig::from_env().map(ChannelConfig::MobilePush),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Settings namespace: the channel's family, or `platform` without one.
    pub fn platform_family(&self) -> PlatformFamily {
        self.channel
            .as_ref()
            .map(|c| c.kind().platform_family())
            .unwrap_or(self.platform)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::config(
                "retry initial_delay_ms must not exceed max_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::config("retry jitter must be between 0.0 and 1.0"));
        }
        if self.max_queue_size == Some(0) {
            return Err(Error::config("max_queue_size must be positive when set"));
        }
        Ok(())
    }
}
