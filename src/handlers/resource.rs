//! Educational resources.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::{AuthContext, Principal},
    models::resource::{
        CreateResourceRequest, Resource, ResourceListQuery, UpdateResourceRequest,
    },
    state::AppState,
    validation::ValidJson,
};

const RESOURCE_COLUMNS: &str =
    "id, title, url, category, published, created_at, updated_at, deleted_at";

pub async fn create_resource(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<CreateResourceRequest>,
) -> Result<(StatusCode, Json<Resource>), AppError> {
    auth.principal.require_admin()?;

    let resource = sqlx::query_as::<_, Resource>(&format!(
        "INSERT INTO resources (title, url, category, published)
         VALUES ($1, $2, $3, $4)
         RETURNING {RESOURCE_COLUMNS}"
    ))
    .bind(request.title.trim())
    .bind(request.url.trim())
    .bind(request.category.trim().to_lowercase())
    .bind(request.published)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(resource)))
}

pub async fn update_resource(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    ValidJson(request): ValidJson<UpdateResourceRequest>,
) -> Result<Json<Resource>, AppError> {
    auth.principal.require_admin()?;

    let current = sqlx::query_as::<_, Resource>(&format!(
        "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Resource))?;

    let resource = sqlx::query_as::<_, Resource>(&format!(
        "UPDATE resources
         SET title = $1, url = $2, category = $3, published = $4, updated_at = NOW()
         WHERE id = $5
         RETURNING {RESOURCE_COLUMNS}"
    ))
    .bind(request.title.as_deref().map(str::trim).unwrap_or(&current.title))
    .bind(request.url.as_deref().map(str::trim).unwrap_or(&current.url))
    .bind(
        request
            .category
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .unwrap_or(current.category),
    )
    .bind(request.published.unwrap_or(current.published))
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(resource))
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.principal.require_admin()?;

    let result = sqlx::query(
        "UPDATE resources SET deleted_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(Entity::Resource));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Non-admins only see published resources.
pub async fn list_resources(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ResourceListQuery>,
) -> Result<Json<Vec<Resource>>, AppError> {
    let published_only = !matches!(auth.principal, Principal::Admin { .. });

    let resources = sqlx::query_as::<_, Resource>(&format!(
        "SELECT {RESOURCE_COLUMNS} FROM resources
         WHERE deleted_at IS NULL
           AND ($1::text IS NULL OR category = $1)
           AND (NOT $2 OR published)
         ORDER BY category, title"
    ))
    .bind(query.category.as_deref().map(|c| c.trim().to_lowercase()))
    .bind(published_only)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(resources))
}
