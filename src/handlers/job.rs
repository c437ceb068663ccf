//! Manual job triggers for admins.

use axum::{Extension, Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::{
    error::AppError, jobs::Job, middleware::auth::AuthContext, state::AppState,
    validation::ValidJson,
};

/// `POST /v1/job/enqueue` with a body such as `{ "job": "sync_all_employers" }`.
///
/// Returns 202 once queued; the outcome shows up in the logs.
pub async fn enqueue_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(job): ValidJson<Job>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let admin_id = auth.principal.require_admin()?;
    let name = job.name();

    tracing::info!(job = name, %admin_id, "job enqueued by admin");
    state.jobs.enqueue(job);

    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": name }))))
}
