//! Admin management (admins only).

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::AuthContext,
    models::admin::{Admin, AdminResponse, CreateAdminRequest},
    services::auth_service,
    state::AppState,
    validation::{ValidJson, normalize_email},
};

/// `POST /v1/admin/create`
pub async fn create_admin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<CreateAdminRequest>,
) -> Result<(StatusCode, Json<AdminResponse>), AppError> {
    let created_by = auth.principal.require_admin()?;
    let password_hash = auth_service::hash_password(&request.password)?;

    let admin = sqlx::query_as::<_, Admin>(
        r#"
        INSERT INTO admins (email, password_hash, name)
        VALUES ($1, $2, $3)
        RETURNING id, email, password_hash, name, created_at, deleted_at
        "#,
    )
    .bind(normalize_email(&request.email))
    .bind(password_hash)
    .bind(request.name.trim())
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict("Email is already registered".to_string()),
        other => other,
    })?;

    tracing::info!(admin_id = %admin.id, %created_by, "admin created");
    Ok((StatusCode::CREATED, Json(admin.into())))
}

/// `GET /v1/admin/list`
pub async fn list_admins(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<AdminResponse>>, AppError> {
    auth.principal.require_admin()?;

    let admins = sqlx::query_as::<_, Admin>(
        "SELECT id, email, password_hash, name, created_at, deleted_at
         FROM admins WHERE deleted_at IS NULL ORDER BY created_at",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(admins.into_iter().map(Into::into).collect()))
}

/// `DELETE /v1/admin/{id}`
///
/// Soft delete. Admins cannot delete themselves, so at least one always remains.
pub async fn delete_admin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(admin_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let caller = auth.principal.require_admin()?;
    if caller == admin_id {
        return Err(AppError::InvalidRequest(
            "Admins cannot delete themselves".to_string(),
        ));
    }

    let result = sqlx::query(
        "UPDATE admins SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(admin_id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(Entity::Admin));
    }

    sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE subject_id = $1 AND revoked_at IS NULL")
        .bind(admin_id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
