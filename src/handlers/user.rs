//! User endpoints.
//!
//! - GET /v1/user/list - Admin: everyone; employer: own employees
//! - GET /v1/user/{id} - Admin: anyone; employer: own employees; user: self
//! - PATCH /v1/user/{id} - Admin: any field; user: own names and phone
//! - DELETE /v1/user/{id} - Admin soft delete

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::{AuthContext, Principal},
    models::user::{USER_COLUMNS, UpdateUserRequest, User, UserListQuery, UserResponse},
    services::{access, auth_service},
    state::AppState,
    validation::{Page, Pagination, ValidJson},
};

pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Page<UserResponse>>, AppError> {
    let employer_filter = match auth.principal {
        Principal::Admin { .. } => query.employer_id,
        Principal::Employer { employer_id, .. } => Some(employer_id),
        Principal::User { .. } => return Err(AppError::Forbidden),
    };
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));
    let pagination = Pagination {
        page: query.page,
        limit: query.limit,
    };

    let filter = "deleted_at IS NULL
           AND ($1::uuid IS NULL OR employer_id = $1)
           AND ($2::text IS NULL OR email ILIKE $2 OR first_name ILIKE $2 OR last_name ILIKE $2)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {filter}"))
        .bind(employer_filter)
        .bind(&search)
        .fetch_one(&state.pool)
        .await?;

    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {filter}
         ORDER BY created_at DESC
         LIMIT $3 OFFSET $4"
    ))
    .bind(employer_filter)
    .bind(&search)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(Page::new(users, pagination, total).map(Into::into)))
}

async fn load_user(state: &AppState, user_id: Uuid) -> Result<User, AppError> {
    auth_service::find_user(&state.pool, user_id)
        .await?
        .ok_or(AppError::NotFound(Entity::User))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    let user_id = access::target_user(&state.pool, &auth.principal, Some(user_id)).await?;
    Ok(Json(load_user(&state, user_id).await?.into()))
}

/// Partial update. Only admins may change `status`, `user_type` or `employer_id`.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    ValidJson(request): ValidJson<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    match auth.principal {
        Principal::Admin { .. } => {}
        Principal::User { user_id: me, .. } if me == user_id => {
            if request.touches_admin_fields() {
                return Err(AppError::Forbidden);
            }
        }
        _ => return Err(AppError::Forbidden),
    }

    let current = load_user(&state, user_id).await?;

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET first_name = $1, last_name = $2, phone = $3, status = $4, user_type = $5,
            employer_id = $6, updated_at = NOW()
        WHERE id = $7
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(request.first_name.as_deref().map(str::trim).unwrap_or(&current.first_name))
    .bind(request.last_name.as_deref().map(str::trim).unwrap_or(&current.last_name))
    .bind(request.phone_over(current.phone.as_deref()))
    .bind(request.status.unwrap_or(current.status).as_str())
    .bind(request.user_type.unwrap_or(current.user_type).as_str())
    .bind(request.employer_id.or(current.employer_id))
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(user.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let admin_id = auth.principal.require_admin()?;

    let mut tx = state.pool.begin().await?;
    let result = sqlx::query(
        "UPDATE users SET deleted_at = NOW(), status = 'inactive', updated_at = NOW()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(Entity::User));
    }

    sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE subject_id = $1 AND revoked_at IS NULL")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(%user_id, %admin_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
