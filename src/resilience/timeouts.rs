//! Timeout enforcement.
//!
//! Every external call (sign, broadcast, gateway query) runs under a
//! deadline. A timeout surfaces as `GatewayError::Timeout`, which the
//! lifecycle treats as transient.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

use crate::gateway::{GatewayError, GatewayResult};

/// Run `fut`, failing with `Timeout(limit)` if it does not finish in time.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

/// Wall-clock time from `since` to `now`; zero if `now` is earlier.
pub fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
