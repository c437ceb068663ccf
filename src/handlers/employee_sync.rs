//! Roster sync endpoints.
//!
//! - POST /v1/employee-sync/run - Start a sync (employer: own; admin: body `employer_id`)
//! - GET /v1/employee-sync/list - Past runs, newest first
//! - GET /v1/employee-sync/{id} - One run

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::{AuthContext, Principal},
    models::employee_sync::{EmployeeSync, RunSyncRequest, SyncListQuery},
    services::{
        access,
        employee_sync_service::{self, SYNC_COLUMNS},
    },
    state::AppState,
    validation::{Page, Pagination, ValidJson},
};

/// Claims the employer's sync slot and runs the sync in the background.
///
/// - **202 Accepted**: the `running` sync row; poll `GET /v1/employee-sync/{id}`
/// - **409 `sync_in_progress`**: another run for the employer has not finished
/// - **422 `finch_not_connected`**: the employer never connected Finch
pub async fn run_sync(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<RunSyncRequest>,
) -> Result<(StatusCode, Json<EmployeeSync>), AppError> {
    let employer_id = access::target_employer(&auth.principal, request.employer_id)?;
    let sync = employee_sync_service::spawn_sync(&state, employer_id).await?;
    Ok((StatusCode::ACCEPTED, Json(sync)))
}

pub async fn list_syncs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SyncListQuery>,
) -> Result<Json<Page<EmployeeSync>>, AppError> {
    let employer_filter = match auth.principal {
        Principal::Admin { .. } => query.employer_id,
        Principal::Employer { employer_id, .. } => Some(employer_id),
        Principal::User { .. } => return Err(AppError::Forbidden),
    };
    let pagination = Pagination {
        page: query.page,
        limit: query.limit,
    };

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM employee_syncs WHERE ($1::uuid IS NULL OR employer_id = $1)",
    )
    .bind(employer_filter)
    .fetch_one(&state.pool)
    .await?;

    let syncs = sqlx::query_as::<_, EmployeeSync>(&format!(
        "SELECT {SYNC_COLUMNS} FROM employee_syncs
         WHERE ($1::uuid IS NULL OR employer_id = $1)
         ORDER BY started_at DESC
         LIMIT $2 OFFSET $3"
    ))
    .bind(employer_filter)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(Page::new(syncs, pagination, total)))
}

pub async fn get_sync(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmployeeSync>, AppError> {
    let sync = sqlx::query_as::<_, EmployeeSync>(&format!(
        "SELECT {SYNC_COLUMNS} FROM employee_syncs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::EmployeeSync))?;

    match auth.principal {
        Principal::Admin { .. } => Ok(Json(sync)),
        Principal::Employer { employer_id, .. } if employer_id == sync.employer_id => Ok(Json(sync)),
        Principal::Employer { .. } => Err(AppError::NotFound(Entity::EmployeeSync)),
        Principal::User { .. } => Err(AppError::Forbidden),
    }
}
