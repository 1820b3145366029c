//! Source health DTOs for the v1 API.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::enrichment::{EgressHealth, SourceHealth};

/// One registered source adapter with its circuit and quota state.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatusResponse {
    pub name: String,
    /// Included in jobs that do not name their sources.
    pub default_enabled: bool,
    /// `false` while the circuit is open.
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Decayed success ratio in `[0, 1]`.
    pub reliability: f64,
    /// `timeout`, `rate_limited`, `captcha`, `blocked` or `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    /// Requests left in the current rate-limit window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_window: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_window_secs: Option<u64>,
}

impl SourceStatusResponse {
    pub fn from_health(health: SourceHealth, default_enabled: bool) -> Self {
        Self {
            name: health.source,
            default_enabled,
            available: health.available,
            suspended_until: health.suspended_until,
            consecutive_failures: health.consecutive_failures,
            reliability: health.reliability,
            last_failure: health.last_failure.map(|r| r.to_string()),
            rate_limit_remaining: None,
            rate_limit_per_window: None,
            rate_limit_window_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressStatusResponse {
    pub id: String,
    /// `direct`, `datacenter` or `residential`.
    pub class: String,
    pub reliability: f64,
}

impl From<EgressHealth> for EgressStatusResponse {
    fn from(e: EgressHealth) -> Self {
        Self {
            id: e.id,
            class: e.class,
            reliability: e.reliability,
        }
    }
}

/// Response for `GET /v1/sources`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListSourcesResponse {
    pub sources: Vec<SourceStatusResponse>,
    pub egress: Vec<EgressStatusResponse>,
}
