//! CRM HTTP client layer.
//!
//! The expiration engine itself never retries: transport-level resilience
//! (bounded backoff on 429/5xx and connect/timeout errors) lives here, in
//! the client, so every engine-level call is a single sequential await.
//!
//! Modules:
//! - cards: the pipelines/cards data source (listing + detail)

pub mod cards;

pub use cards::{CardPage, CardSource, KeyCrmClient};

use std::time::Duration;

/// Errors from CRM API operations.
#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unexpected response shape: {0}")]
    Envelope(String),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

/// Rate limits, request timeouts, and server-side errors are worth another
/// attempt; everything else (auth failures, 404s, validation errors) is not.
fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    // A parseable Retry-After from the CRM wins over our own schedule,
    // capped so a misbehaving header cannot stall the run.
    if let Some(secs) = retry_after
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(30));
    }

    let shift = attempt.saturating_sub(1).min(16);
    let backoff = policy
        .initial_backoff_ms
        .saturating_mul(1u64 << shift)
        .min(policy.max_backoff_ms);
    // Sub-second jitter so cron runs that collided once don't re-collide
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_millis()))
        .unwrap_or(0)
        % 125;
    Duration::from_millis(backoff + jitter)
}

/// Send a request, retrying on rate limits, server errors, and transport
/// failures. Honors `Retry-After` when the CRM sends one.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, CrmError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(CrmError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if status_is_retryable(status) && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "crm retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "crm retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(CrmError::Http(err));
            }
        }
    }

    Err(CrmError::Envelope("request exhausted retries".to_string()))
}
