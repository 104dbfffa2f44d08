use axum::{Extension, Json};
use tracing::instrument;

use crate::auth::Identity;
use crate::models::ProfileResponse;

/// `GET /api/me`: the identity [`AuthLayer`](crate::middleware::AuthLayer)
/// attached to the request.
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn current_user(Extension(identity): Extension<Identity>) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        id: identity.id,
        email: identity.email,
        role: identity.role,
    })
}
