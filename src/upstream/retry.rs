use crate::error::MeteoError;
use crate::types::observation::Observation;
use crate::types::station::Station;
use crate::upstream::{UpstreamClient, UpstreamError};
use bon::Builder;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Bounded exponential backoff for transient upstream failures.
///
/// The wait after failed attempt `n` (1-based) is
/// `min(base_delay * 2^(n-1), max_delay)`.
///
/// # Examples
///
/// ```
/// use antarctic_meteo::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder()
///     .base_delay(Duration::from_secs(1))
///     .max_delay(Duration::from_secs(5))
///     .build();
/// assert_eq!(policy.delay(1), Duration::from_secs(1));
/// assert_eq!(policy.delay(3), Duration::from_secs(4));
/// assert_eq!(policy.delay(4), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    #[builder(default = DEFAULT_BASE_DELAY)]
    pub base_delay: Duration,
    #[builder(default = DEFAULT_MAX_DELAY)]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Attempt ceiling; at least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Calls `client` until it succeeds, fails permanently, or the attempt
/// ceiling is reached.
///
/// # Errors
///
/// * [`MeteoError::UpstreamRejected`] on the first permanent failure, without retrying.
/// * [`MeteoError::UpstreamUnavailable`] once every attempt failed transiently.
pub async fn fetch_with_retry(
    client: &dyn UpstreamClient,
    policy: &RetryPolicy,
    station: &Station,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Observation>, MeteoError> {
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match client.fetch_raw(station, start, end).await {
            Ok(observations) => {
                info!(
                    "Fetched {} observations for station {} on attempt {}",
                    observations.len(),
                    station.id,
                    attempt
                );
                return Ok(observations);
            }
            Err(UpstreamError::Permanent { message, .. }) => {
                warn!("Upstream rejected station {}: {}", station.id, message);
                return Err(MeteoError::UpstreamRejected {
                    station: station.id.clone(),
                    message,
                });
            }
            Err(e @ UpstreamError::Transient { .. }) if attempt >= attempts => {
                warn!(
                    "Giving up on station {} after {} attempts: {}",
                    station.id, attempt, e
                );
                return Err(MeteoError::UpstreamUnavailable {
                    station: station.id.clone(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(
                    "Attempt {}/{} for station {} failed, retrying in {:?}: {}",
                    attempt, attempts, station.id, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
