//! Employer endpoints.
//!
//! - POST /v1/employer/create - Admin
//! - GET /v1/employer/list - Admin
//! - GET /v1/employer/{id} - Admin, or the employer itself
//! - PATCH /v1/employer/{id} - Admin; employers may rename themselves
//! - DELETE /v1/employer/{id} - Admin soft delete
//! - POST /v1/employer/connect-finch - Employer (or admin with `?employer_id=`)

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::{AuthContext, Principal},
    models::employer::{
        ConnectFinchRequest, CreateEmployerRequest, EMPLOYER_COLUMNS, Employer, EmployerListQuery,
        EmployerResponse, EmployerStatus, UpdateEmployerRequest,
    },
    services::access,
    state::AppState,
    validation::{Page, Pagination, ValidJson},
};

/// Unambiguous characters only (no 0/O, 1/I).
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const INVITE_LENGTH: usize = 8;

pub fn generate_invite_code() -> String {
    (0..INVITE_LENGTH)
        .map(|_| INVITE_ALPHABET[rand::random_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

async fn find_employer(state: &AppState, id: Uuid) -> Result<Employer, AppError> {
    sqlx::query_as::<_, Employer>(&format!(
        "SELECT {EMPLOYER_COLUMNS} FROM employers WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Employer))
}

pub async fn create_employer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<CreateEmployerRequest>,
) -> Result<(StatusCode, Json<EmployerResponse>), AppError> {
    auth.principal.require_admin()?;

    let organization_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM organizations WHERE id = $1 AND deleted_at IS NULL)",
    )
    .bind(request.organization_id)
    .fetch_one(&state.pool)
    .await?;
    if !organization_exists {
        return Err(AppError::NotFound(Entity::Organization));
    }

    let employer = sqlx::query_as::<_, Employer>(&format!(
        r#"
        INSERT INTO employers (organization_id, name, ein, status, invite_code)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {EMPLOYER_COLUMNS}
        "#
    ))
    .bind(request.organization_id)
    .bind(request.name.trim())
    .bind(&request.ein)
    .bind(request.status.unwrap_or(EmployerStatus::Pending).as_str())
    .bind(generate_invite_code())
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(employer_id = %employer.id, "employer created");
    Ok((StatusCode::CREATED, Json(employer.into())))
}

pub async fn list_employers(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<EmployerListQuery>,
) -> Result<Json<Page<EmployerResponse>>, AppError> {
    auth.principal.require_admin()?;
    let pagination = Pagination {
        page: query.page,
        limit: query.limit,
    };
    let status = query.status.map(|s| s.as_str());

    let filter = "deleted_at IS NULL
           AND ($1::uuid IS NULL OR organization_id = $1)
           AND ($2::text IS NULL OR status = $2)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM employers WHERE {filter}"))
        .bind(query.organization_id)
        .bind(status)
        .fetch_one(&state.pool)
        .await?;

    let employers = sqlx::query_as::<_, Employer>(&format!(
        "SELECT {EMPLOYER_COLUMNS} FROM employers WHERE {filter}
         ORDER BY name
         LIMIT $3 OFFSET $4"
    ))
    .bind(query.organization_id)
    .bind(status)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(Page::new(employers, pagination, total).map(Into::into)))
}

pub async fn get_employer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmployerResponse>, AppError> {
    let id = access::target_employer(&auth.principal, Some(id))?;
    Ok(Json(find_employer(&state, id).await?.into()))
}

pub async fn update_employer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    ValidJson(request): ValidJson<UpdateEmployerRequest>,
) -> Result<Json<EmployerResponse>, AppError> {
    let id = access::target_employer(&auth.principal, Some(id))?;
    if matches!(auth.principal, Principal::Employer { .. }) && request.touches_admin_fields() {
        return Err(AppError::Forbidden);
    }
    let current = find_employer(&state, id).await?;

    let employer = sqlx::query_as::<_, Employer>(&format!(
        "UPDATE employers SET name = $1, ein = $2, status = $3, updated_at = NOW()
         WHERE id = $4
         RETURNING {EMPLOYER_COLUMNS}"
    ))
    .bind(request.name.as_deref().map(str::trim).unwrap_or(&current.name))
    .bind(request.ein.as_ref().or(current.ein.as_ref()))
    .bind(request.status.unwrap_or(current.status).as_str())
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(employer.into()))
}

pub async fn delete_employer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.principal.require_admin()?;

    let result = sqlx::query(
        "UPDATE employers SET deleted_at = NOW(), status = 'inactive', updated_at = NOW()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(Entity::Employer));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct EmployerSelector {
    pub employer_id: Option<Uuid>,
}

/// Store the Finch access token obtained by the employer's Finch Connect flow.
pub async fn connect_finch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(selector): Query<EmployerSelector>,
    ValidJson(request): ValidJson<ConnectFinchRequest>,
) -> Result<Json<EmployerResponse>, AppError> {
    let id = access::target_employer(&auth.principal, selector.employer_id)?;

    let employer = sqlx::query_as::<_, Employer>(&format!(
        "UPDATE employers
         SET finch_access_token = $1, finch_connected_at = NOW(), updated_at = NOW()
         WHERE id = $2 AND deleted_at IS NULL
         RETURNING {EMPLOYER_COLUMNS}"
    ))
    .bind(request.access_token.trim())
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Employer))?;

    tracing::info!(employer_id = %employer.id, "finch connected");
    Ok(Json(employer.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_codes_avoid_lookalikes() {
        for _ in 0..100 {
            let code = generate_invite_code();
            assert_eq!(code.len(), INVITE_LENGTH);
            assert!(code.bytes().all(|b| INVITE_ALPHABET.contains(&b)));
            assert!(!code.contains(['0', 'O', '1', 'I']));
        }
    }
}
