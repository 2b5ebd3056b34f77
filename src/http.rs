//! JSON-over-HTTP calls to model services, with retry.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use ragchat_core::ServiceFailure;

/// How often and how patiently to retry a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(5))
    }

    /// Worst-case wall time of one call: every attempt running into
    /// `per_attempt`, plus all backoff delays.
    pub fn budget(&self, per_attempt: Duration) -> Duration {
        let backoff: Duration = (1..=self.max_retries).map(|a| self.delay(a)).sum();
        per_attempt * (self.max_retries + 1) + backoff
    }
}

/// Build the shared HTTP client with a per-request timeout.
pub fn client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// POST `body` to `url` and parse the JSON reply, retrying transient
/// failures according to `policy`.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    policy: &RetryPolicy,
) -> Result<Value, ServiceFailure> {
    let mut last_err = ServiceFailure::Transport(format!("no request sent to {}", url));

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay(attempt)).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        let failure = match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| ServiceFailure::InvalidResponse(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                ServiceFailure::Api {
                    status: status.as_u16(),
                    body: body_text,
                }
            }
            Err(e) => ServiceFailure::Transport(format!("{} ({})", e, url)),
        };

        // Client error (not 429), don't retry
        if !failure.is_retryable() {
            return Err(failure);
        }
        if attempt < policy.max_retries {
            warn!(url, attempt = attempt + 1, error = %failure, "request failed, retrying");
        }
        last_err = failure;
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(8);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(6), Duration::from_secs(32));
        assert_eq!(policy.delay(8), Duration::from_secs(32));
    }

    #[test]
    fn test_budget_covers_attempts_and_backoff() {
        let policy = RetryPolicy::new(2);
        // 3 attempts of 10s plus 1s + 2s of backoff.
        assert_eq!(policy.budget(Duration::from_secs(10)), Duration::from_secs(33));
        assert_eq!(
            RetryPolicy::new(0).budget(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
        };
        let client = client(Duration::from_secs(2)).unwrap();
        // Port 9 on localhost is almost never listening.
        let err = post_json(&client, "http://127.0.0.1:9/x", None, &Value::Null, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceFailure::Transport(_)));
    }
}
