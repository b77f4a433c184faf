//! Capability probe.
//!
//! Decides whether the configured channel can deliver right now: it must
//! exist, have its credentials, and hold the user's permission.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channels::{NotificationChannel, PermissionRequest, PermissionStatus};
use crate::error::DeliveryErrorKind;

/// Why the engine cannot deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// No channel is configured, or it lacks credentials.
    NoChannel,
    /// The user declined notification permission.
    PermissionDenied,
    /// Permission was revoked after the engine became ready.
    PermissionRevoked,
    /// The channel failed while probing.
    ProbeFailed,
}

/// Result of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Ready,
    Unavailable(DegradedReason),
}

pub struct CapabilityProbe {
    channel: Option<Arc<dyn NotificationChannel>>,
}

impl CapabilityProbe {
    pub fn new(channel: Option<Arc<dyn NotificationChannel>>) -> Self {
        Self { channel }
    }

    /// Probe at start-up.
    ///
    /// Asks for permission only when the user has not decided yet. An earlier
    /// grant is re-requested silently so the channel learns which features
    /// were granted; an earlier denial is respected.
    pub async fn probe(&self) -> ProbeResult {
        let Some(channel) = self.usable_channel() else {
            return ProbeResult::Unavailable(DegradedReason::NoChannel);
        };

        match channel.permission_status() {
            PermissionStatus::Denied => {
                debug!(channel = %channel.kind(), "Notification permission previously denied");
                ProbeResult::Unavailable(DegradedReason::PermissionDenied)
            }
            PermissionStatus::NotDetermined | PermissionStatus::Granted => {
                Self::request(channel.as_ref()).await
            }
        }
    }

    /// Explicit permission request, made regardless of earlier decisions.
    pub async fn request_permissions(&self) -> ProbeResult {
        match self.usable_channel() {
            Some(channel) => Self::request(channel.as_ref()).await,
            None => ProbeResult::Unavailable(DegradedReason::NoChannel),
        }
    }

    fn usable_channel(&self) -> Option<&Arc<dyn NotificationChannel>> {
        let channel = self.channel.as_ref()?;
        if channel.is_configured() {
            Some(channel)
        } else {
            warn!(channel = %channel.kind(), "Notification channel is missing credentials");
            None
        }
    }

    async fn request(channel: &dyn NotificationChannel) -> ProbeResult {
        match channel.request_permission(&PermissionRequest::full()).await {
            Ok(PermissionStatus::Granted) => ProbeResult::Ready,
            Ok(status) => {
                debug!(channel = %channel.kind(), %status, "Notification permission not granted");
                ProbeResult::Unavailable(DegradedReason::PermissionDenied)
            }
            Err(e) => {
                warn!(channel = %channel.kind(), error = %e, "Permission request failed");
                match e.kind() {
                    DeliveryErrorKind::NotSupported => {
                        ProbeResult::Unavailable(DegradedReason::NoChannel)
                    }
                    DeliveryErrorKind::PermissionDenied => {
                        ProbeResult::Unavailable(DegradedReason::PermissionDenied)
                    }
                    DeliveryErrorKind::TransientFailure => {
                        ProbeResult::Unavailable(DegradedReason::ProbeFailed)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedChannel;

    #[tokio::test]
    async fn test_no_channel() {
        let probe = CapabilityProbe::new(None);
        assert_eq!(
            probe.probe().await,
            ProbeResult::Unavailable(DegradedReason::NoChannel)
        );
    }

    #[tokio::test]
    async fn test_unconfigured_channel() {
        let channel = Arc::new(ScriptedChannel::granted());
        channel.set_configured(false);
        let probe = CapabilityProbe::new(Some(channel.clone()));
        assert_eq!(
            probe.probe().await,
            ProbeResult::Unavailable(DegradedReason::NoChannel)
        );
        assert_eq!(channel.permission_requests(), 0);
    }

    #[tokio::test]
    async fn test_granted_channel_is_ready() {
        let channel = Arc::new(ScriptedChannel::granted());
        let probe = CapabilityProbe::new(Some(channel.clone()));
        assert_eq!(probe.probe().await, ProbeResult::Ready);
        assert_eq!(channel.permission_requests(), 1);
    }

    #[tokio::test]
    async fn test_previous_denial_is_not_reprompted() {
        let channel = Arc::new(ScriptedChannel::denied());
        let probe = CapabilityProbe::new(Some(channel.clone()));
        assert_eq!(
            probe.probe().await,
            ProbeResult::Unavailable(DegradedReason::PermissionDenied)
        );
        assert_eq!(channel.permission_requests(), 0);

        channel.set_grant_on_request(true);
        assert_eq!(probe.request_permissions().await, ProbeResult::Ready);
        assert_eq!(channel.permission_requests(), 1);
    }
}
