//! The data provider the engine fetches raw observations from.

pub mod aemet;
pub mod retry;

use crate::types::observation::Observation;
use crate::types::station::Station;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// How an upstream call failed, which decides whether it is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Rate limiting, server-side failures, timeouts and dropped connections.
    #[error("Transient upstream failure{}: {message}", status_suffix(*status))]
    Transient { status: Option<u16>, message: String },

    /// Bad station, bad range, bad credentials, or a payload we cannot read.
    #[error("Upstream rejected request{}: {message}", status_suffix(*status))]
    Permanent { status: Option<u16>, message: String },
}

impl UpstreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        UpstreamError::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        UpstreamError::Permanent {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Transient { status, .. } | UpstreamError::Permanent { status, .. } => *status,
        }
    }
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" (status {})", s)).unwrap_or_default()
}

/// Fetches raw observations for one station over `[start, end)`.
///
/// Implementations make a single attempt; retrying is the caller's concern
/// (see [`retry::fetch_with_retry`]).
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_raw(
        &self,
        station: &Station,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, UpstreamError>;
}
