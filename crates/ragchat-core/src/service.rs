//! Bounded calls to external model services.
//!
//! Every embedding and generation call made by the core goes through
//! [`bounded`], so a stalled provider surfaces as
//! [`ServiceFailure::Timeout`] instead of hanging the request.

use std::future::Future;
use std::time::Duration;

use crate::error::ServiceFailure;

/// Per-service call timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub embedding: Duration,
    pub generation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            embedding: Duration::from_secs(30),
            generation: Duration::from_secs(60),
        }
    }
}

/// Run `fut` with a deadline. Dropping the future on expiry cancels it.
pub async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<ServiceFailure>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(E::from(ServiceFailure::Timeout(limit))),
    }
}
