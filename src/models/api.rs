use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Role;

/// Sanitized body of `POST /api/dev/seed`.
///
/// `facility_id` is `None` when the caller omitted it; the handler then
/// seeds the default facility.
#[derive(Debug, Deserialize)]
pub struct SeedRequest {
    pub facility_id: Option<String>,
}

/// Response after a seed job is accepted.
#[derive(Debug, Serialize)]
pub struct SeedAccepted {
    /// Always `"accepted"`
    pub status: &'static str,
    pub job_id: Uuid,
    /// Target facility, `None` for the default facility
    pub facility_id: Option<String>,
    /// Id of the caller who requested the job
    pub requested_by: String,
    pub accepted_at: DateTime<Utc>,
}

/// Response of `GET /api/dev/status`.
#[derive(Debug, Serialize)]
pub struct DevStatusResponse {
    pub environment: &'static str,
    /// Whether dev operations may run right now
    pub safe: bool,
    /// Why not, when `safe` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub dev_mode_enabled: bool,
    /// Rate limit entries currently tracked by the dev-ops limiter
    pub tracked_rate_limit_keys: usize,
}

/// Response of `GET /api/me`.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: String,
    pub email: String,
    pub role: Role,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: &'static str,
    pub environment: &'static str,
    /// Service version
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}
