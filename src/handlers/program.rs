//! Employer program endpoints.
//!
//! Admins manage programs; employers can read their own. `distribute` credits
//! a month's program amounts and is safe to repeat.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::{AuthContext, Principal},
    models::program::{
        CreateProgramRequest, DistributeRequest, DistributionSummary, Period, Program,
        ProgramListQuery, UpdateProgramRequest,
    },
    services::program_service::{self, PROGRAM_COLUMNS},
    state::AppState,
    validation::ValidJson,
};

pub async fn create_program(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<CreateProgramRequest>,
) -> Result<(StatusCode, Json<Program>), AppError> {
    auth.principal.require_admin()?;

    let employer_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM employers WHERE id = $1 AND deleted_at IS NULL)",
    )
    .bind(request.employer_id)
    .fetch_one(&state.pool)
    .await?;
    if !employer_exists {
        return Err(AppError::NotFound(Entity::Employer));
    }

    let program = sqlx::query_as::<_, Program>(&format!(
        r#"
        INSERT INTO programs (
            employer_id, name, monthly_amount_cents, match_basis_points, match_cap_cents,
            starts_on, ends_on
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {PROGRAM_COLUMNS}
        "#
    ))
    .bind(request.employer_id)
    .bind(request.name.trim())
    .bind(request.monthly_amount_cents)
    .bind(request.match_basis_points)
    .bind(request.match_cap_cents)
    .bind(request.starts_on)
    .bind(request.ends_on)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(program_id = %program.id, employer_id = %program.employer_id, "program created");
    Ok((StatusCode::CREATED, Json(program)))
}

async fn find_program(state: &AppState, id: Uuid) -> Result<Program, AppError> {
    sqlx::query_as::<_, Program>(&format!("SELECT {PROGRAM_COLUMNS} FROM programs WHERE id = $1"))
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound(Entity::Program))
}

pub async fn update_program(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    ValidJson(request): ValidJson<UpdateProgramRequest>,
) -> Result<Json<Program>, AppError> {
    auth.principal.require_admin()?;
    let current = find_program(&state, id).await?;

    let (starts_on, ends_on) = request.dates_over(&current)?;

    let program = sqlx::query_as::<_, Program>(&format!(
        r#"
        UPDATE programs
        SET name = $1, monthly_amount_cents = $2, match_basis_points = $3, match_cap_cents = $4,
            status = $5, starts_on = $6, ends_on = $7, updated_at = NOW()
        WHERE id = $8
        RETURNING {PROGRAM_COLUMNS}
        "#
    ))
    .bind(request.name.as_deref().map(str::trim).unwrap_or(&current.name))
    .bind(request.monthly_amount_cents.unwrap_or(current.monthly_amount_cents))
    .bind(request.match_basis_points.unwrap_or(current.match_basis_points))
    .bind(request.match_cap_cents.unwrap_or(current.match_cap_cents))
    .bind(request.status.unwrap_or(current.status).as_str())
    .bind(starts_on)
    .bind(ends_on)
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(program))
}

pub async fn list_programs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ProgramListQuery>,
) -> Result<Json<Vec<Program>>, AppError> {
    let employer_filter = match auth.principal {
        Principal::Admin { .. } => query.employer_id,
        Principal::Employer { employer_id, .. } => Some(employer_id),
        Principal::User { .. } => return Err(AppError::Forbidden),
    };

    let programs = sqlx::query_as::<_, Program>(&format!(
        "SELECT {PROGRAM_COLUMNS} FROM programs
         WHERE ($1::uuid IS NULL OR employer_id = $1)
         ORDER BY created_at DESC"
    ))
    .bind(employer_filter)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(programs))
}

pub async fn get_program(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Program>, AppError> {
    let program = find_program(&state, id).await?;
    match auth.principal {
        Principal::Admin { .. } => Ok(Json(program)),
        Principal::Employer { employer_id, .. } if employer_id == program.employer_id => {
            Ok(Json(program))
        }
        Principal::Employer { .. } => Err(AppError::NotFound(Entity::Program)),
        Principal::User { .. } => Err(AppError::Forbidden),
    }
}

/// `POST /v1/program/distribute` with `{ "period": "2025-03" }`; omit the
/// period for the current month.
pub async fn distribute(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<DistributeRequest>,
) -> Result<Json<DistributionSummary>, AppError> {
    auth.principal.require_admin()?;
    let period = request.period.unwrap_or_else(Period::current);
    Ok(Json(program_service::distribute(&state.pool, period).await?))
}
