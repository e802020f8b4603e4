//! Periodic reclamation of expired and stale cache entries.

use crate::cache::CacheStore;
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of one eviction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub ran_at: DateTime<Utc>,
    /// Entries removed because `expires_at` had passed.
    pub expired_removed: usize,
    /// Entries removed because they were fetched before the retention horizon.
    pub stale_removed: usize,
    /// Set when either pass failed. The scheduler keeps running regardless.
    pub error: Option<String>,
}

/// Prunes a [`CacheStore`] on a fixed period.
///
/// Each run removes entries whose expiry has passed and, when a retention
/// horizon is set, entries fetched longer ago than that horizon. A failed run
/// is logged and reported; the next tick simply tries again.
pub struct EvictionScheduler {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    retention: Option<Duration>,
}

/// A running scheduler.
pub struct EvictionHandle {
    join: JoinHandle<()>,
    token: CancellationToken,
    reports: watch::Receiver<Option<EvictionReport>>,
}

impl EvictionScheduler {
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        retention: Option<Duration>,
    ) -> Self {
        Self {
            store,
            clock,
            interval,
            retention,
        }
    }

    /// Runs a single eviction pass against the current time.
    pub async fn run_once(&self) -> EvictionReport {
        let now = self.clock.now();
        let mut errors = Vec::new();

        let expired_removed = match self.store.delete_expired(now).await {
            Ok(count) => count,
            Err(e) => {
                error!("Evicting expired cache entries failed: {}", e);
                errors.push(e.to_string());
                0
            }
        };

        let cutoff = self
            .retention
            .and_then(|r| chrono::Duration::from_std(r).ok())
            .and_then(|r| now.checked_sub_signed(r));
        let stale_removed = match cutoff {
            Some(cutoff) => match self.store.delete_fetched_before(cutoff).await {
                Ok(count) => count,
                Err(e) => {
                    error!("Evicting cache entries fetched before {} failed: {}", cutoff, e);
                    errors.push(e.to_string());
                    0
                }
            },
            None => 0,
        };

        if expired_removed + stale_removed > 0 {
            info!(
                "Evicted {} expired and {} stale cache entries",
                expired_removed, stale_removed
            );
        }
        EvictionReport {
            ran_at: now,
            expired_removed,
            stale_removed,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    /// Starts the periodic task. The first run happens immediately. The task
    /// stops when `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> EvictionHandle {
        let (sender, reports) = watch::channel(None);
        let period = self.interval.max(Duration::from_millis(1));
        let task_token = token.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Cache eviction running every {:?}", period);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        sender.send_replace(Some(report));
                    }
                }
            }
            info!("Cache eviction stopped");
        });

        EvictionHandle {
            join,
            token,
            reports,
        }
    }
}

impl EvictionHandle {
    /// Subscribes to the report of every run.
    pub fn reports(&self) -> watch::Receiver<Option<EvictionReport>> {
        self.reports.clone()
    }

    pub fn last_report(&self) -> Option<EvictionReport> {
        self.reports.borrow().clone()
    }

    /// Cancels the task and waits for it to finish its current run.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            warn!("Cache eviction task ended abnormally: {}", e);
        }
    }
}
