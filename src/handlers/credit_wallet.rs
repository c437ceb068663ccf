//! Credit wallet endpoints.
//!
//! - GET /v1/credit-wallet/list - Wallets of the caller (user) or `?user_id=` (admin, employer)
//! - GET /v1/credit-wallet/{id}/logs - Ledger entries, newest first
//! - GET /v1/credit-wallet/summary - Balances by wallet type and in total
//! - POST /v1/credit-wallet/adjust - Admin correction with a signed delta

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::AuthContext,
    models::credit_wallet::{
        AdjustWalletRequest, CreditWallet, CreditWalletLog, LedgerEntry, WalletLogQuery,
        WalletQuery, WalletSummary,
    },
    services::{access, auth_service, wallet_service},
    state::AppState,
    validation::{Page, Pagination, ValidJson},
};

pub async fn list_wallets(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<Vec<CreditWallet>>, AppError> {
    let user_id = access::target_user(&state.pool, &auth.principal, query.user_id).await?;
    Ok(Json(wallet_service::list_wallets(&state.pool, user_id).await?))
}

/// Same visibility as the wallet list: the log's wallet must belong to a
/// user the caller may see.
pub async fn wallet_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(wallet_id): Path<Uuid>,
    Query(query): Query<WalletLogQuery>,
) -> Result<Json<Page<CreditWalletLog>>, AppError> {
    let wallet = wallet_service::get_wallet(&state.pool, wallet_id).await?;
    access::target_user(&state.pool, &auth.principal, Some(wallet.user_id))
        .await
        .map_err(|_| AppError::NotFound(Entity::Wallet))?;

    let pagination = Pagination {
        page: query.page,
        limit: query.limit,
    };
    Ok(Json(
        wallet_service::list_logs(&state.pool, wallet.id, pagination).await?,
    ))
}

pub async fn wallet_summary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<WalletSummary>, AppError> {
    let user_id = access::target_user(&state.pool, &auth.principal, query.user_id).await?;
    let wallets = wallet_service::list_wallets(&state.pool, user_id).await?;
    Ok(Json(WalletSummary::from_wallets(user_id, &wallets)))
}

/// Admin adjustment. A positive delta increments, a negative one decrements
/// and is refused with `insufficient_balance` if it would overdraw.
///
/// ```json
/// { "user_id": "...", "wallet_type": "PLATFORM", "delta_cents": 2500, "reason": "Goodwill" }
/// ```
pub async fn adjust_wallet(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<AdjustWalletRequest>,
) -> Result<Json<CreditWalletLog>, AppError> {
    let admin_id = auth.principal.require_admin()?;

    let exists = auth_service::find_user(&state.pool, request.user_id)
        .await?
        .is_some();
    if !exists {
        return Err(AppError::NotFound(Entity::User));
    }

    let entry = LedgerEntry::new(request.reason.trim())
        .with_reference(format!("admin:{admin_id}"))
        .by_admin(admin_id);

    let log = if request.delta_cents > 0 {
        wallet_service::increment(
            &state.pool,
            request.user_id,
            request.wallet_type,
            request.delta_cents,
            entry,
        )
        .await?
    } else {
        wallet_service::decrement(
            &state.pool,
            request.user_id,
            request.wallet_type,
            -request.delta_cents,
            entry,
        )
        .await?
    };

    Ok(Json(log))
}
