//! Privileged dev operations.
//!
//! Both routes sit behind [`SecureDevLayer`](crate::middleware::SecureDevLayer),
//! so by the time a handler runs the caller is an authenticated
//! administrator (or the dev-mode identity), the request passed the
//! structural checks and the dev-ops limiter, and the environment is not
//! production.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::AppResult;
use crate::middleware::SanitizedJson;
use crate::models::{DevStatusResponse, SeedAccepted, SeedRequest};
use crate::safety::validate_environment_safety;
use crate::state::AppState;

/// `POST /api/dev/seed`: accept a facility seed job.
///
/// The pipeline only rules out production; the handler additionally
/// requires a service credential (and a dev token in staging) before
/// touching anything, answering 503 otherwise.
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn seed_facility(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    SanitizedJson(request): SanitizedJson<SeedRequest>,
) -> AppResult<(StatusCode, Json<SeedAccepted>)> {
    validate_environment_safety(&state.config)?;

    let job_id = Uuid::new_v4();
    info!(
        %job_id,
        facility_id = request.facility_id.as_deref().unwrap_or("default"),
        "Seed job accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SeedAccepted {
            status: "accepted",
            job_id,
            facility_id: request.facility_id,
            requested_by: identity.id,
            accepted_at: Utc::now(),
        }),
    ))
}

/// `GET /api/dev/status`: whether dev operations could run here.
#[instrument(skip(state))]
pub async fn dev_status(State(state): State<AppState>) -> Json<DevStatusResponse> {
    let verdict = validate_environment_safety(&state.config);

    Json(DevStatusResponse {
        environment: state.config.environment.as_str(),
        safe: verdict.is_ok(),
        reason: verdict.err().map(|e| e.to_string()),
        dev_mode_enabled: state.config.environment.is_development()
            && state.config.dev_token.is_some(),
        tracked_rate_limit_keys: state.dev_ops_limiter.store().len(),
    })
}
