//! Organization endpoints (admins only).

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::AuthContext,
    models::organization::{CreateOrganizationRequest, Organization, UpdateOrganizationRequest},
    state::AppState,
    validation::ValidJson,
};

const ORGANIZATION_COLUMNS: &str = "id, name, status, created_at, updated_at, deleted_at";

fn name_taken(err: sqlx::Error) -> AppError {
    match AppError::from(err) {
        AppError::Conflict(_) => AppError::Conflict("Organization name is taken".to_string()),
        other => other,
    }
}

pub async fn create_organization(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<Organization>), AppError> {
    auth.principal.require_admin()?;

    let organization = sqlx::query_as::<_, Organization>(&format!(
        "INSERT INTO organizations (name) VALUES ($1) RETURNING {ORGANIZATION_COLUMNS}"
    ))
    .bind(request.name.trim())
    .fetch_one(&state.pool)
    .await
    .map_err(name_taken)?;

    Ok((StatusCode::CREATED, Json(organization)))
}

pub async fn list_organizations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Organization>>, AppError> {
    auth.principal.require_admin()?;

    let organizations = sqlx::query_as::<_, Organization>(&format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE deleted_at IS NULL ORDER BY name"
    ))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(organizations))
}

async fn find_organization(state: &AppState, id: Uuid) -> Result<Organization, AppError> {
    sqlx::query_as::<_, Organization>(&format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Organization))
}

pub async fn get_organization(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Organization>, AppError> {
    auth.principal.require_admin()?;
    Ok(Json(find_organization(&state, id).await?))
}

pub async fn update_organization(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    ValidJson(request): ValidJson<UpdateOrganizationRequest>,
) -> Result<Json<Organization>, AppError> {
    auth.principal.require_admin()?;
    let current = find_organization(&state, id).await?;

    let organization = sqlx::query_as::<_, Organization>(&format!(
        "UPDATE organizations SET name = $1, status = $2, updated_at = NOW()
         WHERE id = $3
         RETURNING {ORGANIZATION_COLUMNS}"
    ))
    .bind(request.name.as_deref().map(str::trim).unwrap_or(&current.name))
    .bind(request.status.unwrap_or(current.status).as_str())
    .bind(id)
    .fetch_one(&state.pool)
    .await
    .map_err(name_taken)?;

    Ok(Json(organization))
}

/// Soft delete; refused while active employers still belong to the organization.
pub async fn delete_organization(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.principal.require_admin()?;
    find_organization(&state, id).await?;

    let in_use: bool = sqlx::query_scalar(
        "SELECT EXISTS(
            SELECT 1 FROM employers
            WHERE organization_id = $1 AND status = 'active' AND deleted_at IS NULL
        )",
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;
    if in_use {
        return Err(AppError::Conflict(
            "Organization still has active employers".to_string(),
        ));
    }

    sqlx::query("UPDATE organizations SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
