//! Money movement endpoints.
//!
//! - POST /v1/transaction/create - Start a deposit or withdrawal (user)
//! - GET /v1/transaction/list - Own transfers (user), all or `?user_id=` (admin)
//! - GET /v1/transaction/{id} - One transfer
//! - POST /v1/transaction/sync - Poll Dwolla for pending transfers (admin)
//! - POST /v1/transaction/webhook - Dwolla callback (public, signed)

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::{AuthContext, Principal},
    models::transaction::{
        CreateTransactionRequest, SyncSummary, Transaction, TransactionListQuery,
    },
    services::transaction_service::{self, TRANSACTION_COLUMNS},
    state::AppState,
    validation::{Page, Pagination, ValidJson},
};

/// Header Dwolla signs webhook bodies in.
pub const SIGNATURE_HEADER: &str = "x-request-signature-sha-256";

/// Start a transfer.
///
/// # Request Body
///
/// ```json
/// {
///   "plaid_account_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cents": 25000,
///   "direction": "deposit",
///   "idempotency_key": "deposit-2025-03"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the pending transaction (or the original one for a
///   repeated `idempotency_key`)
/// - **404**: bank account not found for this user
/// - **422**: `account_not_linked` or `insufficient_balance`
/// - **502**: Dwolla refused the transfer; the transaction is stored as `failed`
pub async fn create_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let user_id = auth.principal.require_user()?;
    let transaction = transaction_service::create_transaction(&state, user_id, request).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<Page<Transaction>>, AppError> {
    let user_filter = match auth.principal {
        Principal::User { user_id, .. } => Some(user_id),
        Principal::Admin { .. } => query.user_id,
        Principal::Employer { .. } => return Err(AppError::Forbidden),
    };
    let status = query.status.map(|s| s.as_str());
    let pagination = Pagination {
        page: query.page,
        limit: query.limit,
    };

    let filter = "($1::uuid IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2)";

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM transactions WHERE {filter}"))
            .bind(user_filter)
            .bind(status)
            .fetch_one(&state.pool)
            .await?;

    let transactions = sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE {filter}
         ORDER BY created_at DESC
         LIMIT $3 OFFSET $4"
    ))
    .bind(user_filter)
    .bind(status)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(Page::new(transactions, pagination, total)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    let owner = match auth.principal {
        Principal::User { user_id, .. } => Some(user_id),
        Principal::Admin { .. } => None,
        Principal::Employer { .. } => return Err(AppError::Forbidden),
    };
    Ok(Json(
        transaction_service::get_transaction(&state, id, owner).await?,
    ))
}

pub async fn sync_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SyncSummary>, AppError> {
    auth.principal.require_admin()?;
    Ok(Json(transaction_service::sync_pending(&state).await?))
}

/// Dwolla webhook.
///
/// The signature is checked against the raw body before it is parsed.
/// Unknown transfers and non-transfer topics are acknowledged and ignored so
/// Dwolla stops retrying them.
pub async fn dwolla_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    transaction_service::verify_webhook_signature(
        &state.config.dwolla_webhook_secret,
        &body,
        signature,
    )?;

    let updated = transaction_service::handle_webhook(&state, &body).await?;
    Ok(Json(json!({ "received": true, "updated": updated })))
}
