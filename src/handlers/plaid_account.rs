//! Bank linking endpoints.
//!
//! - POST /v1/plaid-account/link-token - Start Plaid Link (user)
//! - POST /v1/plaid-account/exchange - Finish Plaid Link and store the account (user)
//! - GET /v1/plaid-account/list - Own accounts (user) or `?user_id=` (admin)
//! - POST /v1/plaid-account/{id}/refresh - Pull a fresh balance from Plaid (user)
//! - POST /v1/plaid-account/{id}/attach - Retry the Dwolla funding source (user)
//! - DELETE /v1/plaid-account/{id} - Unlink (user)

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::{AuthContext, Principal},
    models::plaid_account::{
        ExchangeTokenRequest, LinkTokenResponse, PlaidAccountQuery, PlaidAccountResponse,
    },
    services::plaid_service,
    state::AppState,
    validation::ValidJson,
};

pub async fn create_link_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<LinkTokenResponse>, AppError> {
    let user_id = auth.principal.require_user()?;
    let link_token = state.plaid.create_link_token(user_id).await?;
    Ok(Json(LinkTokenResponse { link_token }))
}

/// Exchange the Link `public_token` and keep the account the user picked.
///
/// # Request Body
///
/// ```json
/// {
///   "public_token": "public-sandbox-...",
///   "account_id": "vzeNDwK7KQIm4yEog683uElbp9GRLEFXGK98D",
///   "institution_name": "Chase"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the stored account; `transfers_enabled` is false when the
///   Dwolla funding source could not be attached (retry with `/{id}/attach`)
/// - **409**: the account is already linked
/// - **502**: Plaid rejected the token
pub async fn exchange_public_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<ExchangeTokenRequest>,
) -> Result<(StatusCode, Json<PlaidAccountResponse>), AppError> {
    let user_id = auth.principal.require_user()?;
    let account = plaid_service::link_account(&state, user_id, request).await?;
    Ok((StatusCode::CREATED, Json(account.into())))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<PlaidAccountQuery>,
) -> Result<Json<Vec<PlaidAccountResponse>>, AppError> {
    let user_id = match auth.principal {
        Principal::User { user_id, .. } => user_id,
        Principal::Admin { .. } => query
            .user_id
            .ok_or_else(|| AppError::validation("user_id", "is required"))?,
        Principal::Employer { .. } => return Err(AppError::Forbidden),
    };

    let accounts = plaid_service::list_for_user(&state, user_id).await?;
    Ok(Json(accounts.into_iter().map(Into::into).collect()))
}

pub async fn refresh_balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<PlaidAccountResponse>, AppError> {
    let user_id = auth.principal.require_user()?;
    let account = plaid_service::refresh_balance(&state, id, user_id).await?;
    Ok(Json(account.into()))
}

/// - **200 OK**: the account, now with `transfers_enabled`
/// - **502**: Dwolla still refuses; nothing changed
pub async fn attach_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<PlaidAccountResponse>, AppError> {
    let user_id = auth.principal.require_user()?;
    let account = plaid_service::attach_account(&state, id, user_id).await?;
    Ok(Json(account.into()))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let user_id = auth.principal.require_user()?;
    plaid_service::remove_account(&state, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
