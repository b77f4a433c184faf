//! Shared HTTP plumbing for push channels.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::debug;

use super::DeliveryResult;
use crate::error::DeliveryError;
use crate::{Error, Result};

/// Longest `Retry-After` a channel waits out in-line before giving up.
const MAX_INLINE_RETRY_AFTER: Duration = Duration::from_secs(30);

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

pub(super) fn build_client(timeout_secs: u64) -> Result<Client> {
    install_rustls_provider();
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Other(format!("Failed to build reqwest client: {}", e)))
}

/// Send a request, waiting out one short rate limit before giving up.
///
/// `build` must produce an identical request each time it is called.
pub(super) async fn send_honoring_retry_after<F>(
    channel: &'static str,
    build: F,
) -> DeliveryResult<Response>
where
    F: Fn() -> RequestBuilder,
{
    let response = build().send().await?;
    if response.status() == StatusCode::TOO_MANY_REQUESTS
        && let Some(delay) = retry_after_delay(&response)
        && delay <= MAX_INLINE_RETRY_AFTER
    {
        debug!(channel, ?delay, "Rate limited, waiting before a single retry");
        tokio::time::sleep(delay).await;
        return Ok(build().send().await?);
    }
    Ok(response)
}

/// Map a non-success status shared by every push service.
pub(super) fn status_error(channel: &str, status: StatusCode, body: &str) -> DeliveryError {
    let detail = format!("{} responded {}: {}", channel, status, truncate_string(body, 300));
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        DeliveryError::transient(detail)
    } else {
        DeliveryError::not_supported(detail)
    }
}

pub(super) fn retry_after_delay(response: &Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let value = value.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Truncate to `max_chars` characters, marking the cut with an ellipsis.
pub(super) fn truncate_string(input: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let mut chars = input.chars();
    let mut out: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
