//! A user's mailing address: users read and replace their own, admins read anyone's.

use axum::{
    Extension, Json,
    extract::{Query, State},
};

use crate::{
    error::{AppError, Entity},
    middleware::auth::{AuthContext, Principal},
    models::address::{Address, AddressQuery, UpsertAddressRequest},
    state::AppState,
    validation::ValidJson,
};

const ADDRESS_COLUMNS: &str =
    "id, user_id, line1, line2, city, state, postal_code, created_at, updated_at";

pub async fn get_address(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Address>, AppError> {
    let user_id = match auth.principal {
        Principal::User { user_id, .. } => user_id,
        Principal::Admin { .. } => query
            .user_id
            .ok_or_else(|| AppError::validation("user_id", "is required"))?,
        Principal::Employer { .. } => return Err(AppError::Forbidden),
    };

    let address = sqlx::query_as::<_, Address>(&format!(
        "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Address))?;

    Ok(Json(address))
}

pub async fn upsert_address(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<UpsertAddressRequest>,
) -> Result<Json<Address>, AppError> {
    let user_id = auth.principal.require_user()?;

    let address = sqlx::query_as::<_, Address>(&format!(
        r#"
        INSERT INTO addresses (user_id, line1, line2, city, state, postal_code)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id) DO UPDATE
        SET line1 = EXCLUDED.line1, line2 = EXCLUDED.line2, city = EXCLUDED.city,
            state = EXCLUDED.state, postal_code = EXCLUDED.postal_code, updated_at = NOW()
        RETURNING {ADDRESS_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(request.line1.trim())
    .bind(request.line2.as_deref().map(str::trim))
    .bind(request.city.trim())
    .bind(request.state.trim().to_uppercase())
    .bind(request.postal_code.trim())
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(address))
}
