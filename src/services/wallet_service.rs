//! Credit wallet ledger.
//!
//! # Atomicity Guarantees
//!
//! Every balance change locks the wallet row (`FOR UPDATE`), updates the
//! balance and appends a log entry inside the caller's database transaction.
//! Functions that take a `PgConnection` never commit; callers compose them
//! with other writes (distribution rows, transfer status) and commit once.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, Entity},
    models::credit_wallet::{CreditWallet, CreditWalletLog, LedgerEntry, WalletType},
    validation::{Page, Pagination},
};

const WALLET_COLUMNS: &str = "id, user_id, wallet_type, balance_cents, created_at, updated_at";

/// Create the wallet if missing; a no-op otherwise.
pub async fn ensure_wallet(
    conn: &mut PgConnection,
    user_id: Uuid,
    wallet_type: WalletType,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO credit_wallets (user_id, wallet_type) VALUES ($1, $2)
         ON CONFLICT (user_id, wallet_type) DO NOTHING",
    )
    .bind(user_id)
    .bind(wallet_type.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

/// Apply a signed change to a user's wallet, creating the wallet on first use.
///
/// # Errors
///
/// - `InvalidRequest`: `delta_cents` is zero
/// - `InsufficientBalance`: the balance would drop below zero
pub async fn apply_delta(
    conn: &mut PgConnection,
    user_id: Uuid,
    wallet_type: WalletType,
    delta_cents: i64,
    entry: LedgerEntry,
) -> Result<CreditWalletLog, AppError> {
    if delta_cents == 0 {
        return Err(AppError::InvalidRequest(
            "Amount must not be zero".to_string(),
        ));
    }

    ensure_wallet(conn, user_id, wallet_type).await?;

    let (wallet_id, balance_cents): (Uuid, i64) = sqlx::query_as(
        "SELECT id, balance_cents FROM credit_wallets
         WHERE user_id = $1 AND wallet_type = $2
         FOR UPDATE",
    )
    .bind(user_id)
    .bind(wallet_type.as_str())
    .fetch_one(&mut *conn)
    .await?;

    let balance_after = next_balance(balance_cents, delta_cents)?;

    sqlx::query("UPDATE credit_wallets SET balance_cents = $1, updated_at = NOW() WHERE id = $2")
        .bind(balance_after)
        .bind(wallet_id)
        .execute(&mut *conn)
        .await?;

    let log = sqlx::query_as::<_, CreditWalletLog>(
        r#"
        INSERT INTO credit_wallet_logs
            (wallet_id, delta_cents, balance_after_cents, reason, reference, actor_admin_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, wallet_id, delta_cents, balance_after_cents, reason, reference,
                  actor_admin_id, created_at
        "#,
    )
    .bind(wallet_id)
    .bind(delta_cents)
    .bind(balance_after)
    .bind(entry.reason)
    .bind(entry.reference)
    .bind(entry.actor_admin_id)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(
        %user_id,
        wallet_type = %wallet_type,
        delta_cents,
        balance_after,
        "wallet balance changed"
    );

    Ok(log)
}

/// Balance after applying `delta`, or `InsufficientBalance`.
pub fn next_balance(balance_cents: i64, delta_cents: i64) -> Result<i64, AppError> {
    let next = balance_cents
        .checked_add(delta_cents)
        .ok_or_else(|| AppError::InvalidRequest("Amount is too large".to_string()))?;
    if next < 0 {
        return Err(AppError::InsufficientBalance);
    }
    Ok(next)
}

/// Add credit in its own transaction.
pub async fn increment(
    pool: &DbPool,
    user_id: Uuid,
    wallet_type: WalletType,
    amount_cents: i64,
    entry: LedgerEntry,
) -> Result<CreditWalletLog, AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }
    let mut tx = pool.begin().await?;
    let log = apply_delta(&mut tx, user_id, wallet_type, amount_cents, entry).await?;
    tx.commit().await?;
    Ok(log)
}

/// Remove credit in its own transaction.
pub async fn decrement(
    pool: &DbPool,
    user_id: Uuid,
    wallet_type: WalletType,
    amount_cents: i64,
    entry: LedgerEntry,
) -> Result<CreditWalletLog, AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }
    let mut tx = pool.begin().await?;
    let log = apply_delta(&mut tx, user_id, wallet_type, -amount_cents, entry).await?;
    tx.commit().await?;
    Ok(log)
}

pub async fn list_wallets(pool: &DbPool, user_id: Uuid) -> Result<Vec<CreditWallet>, AppError> {
    let wallets = sqlx::query_as::<_, CreditWallet>(&format!(
        "SELECT {WALLET_COLUMNS} FROM credit_wallets WHERE user_id = $1 ORDER BY wallet_type"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(wallets)
}

pub async fn get_wallet(pool: &DbPool, wallet_id: Uuid) -> Result<CreditWallet, AppError> {
    sqlx::query_as::<_, CreditWallet>(&format!(
        "SELECT {WALLET_COLUMNS} FROM credit_wallets WHERE id = $1"
    ))
    .bind(wallet_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Wallet))
}

/// Newest entries first.
pub async fn list_logs(
    pool: &DbPool,
    wallet_id: Uuid,
    pagination: Pagination,
) -> Result<Page<CreditWalletLog>, AppError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM credit_wallet_logs WHERE wallet_id = $1")
            .bind(wallet_id)
            .fetch_one(pool)
            .await?;

    let logs = sqlx::query_as::<_, CreditWalletLog>(
        "SELECT id, wallet_id, delta_cents, balance_after_cents, reason, reference,
                actor_admin_id, created_at
         FROM credit_wallet_logs
         WHERE wallet_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2 OFFSET $3",
    )
    .bind(wallet_id)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page::new(logs, pagination, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_add() {
        assert_eq!(next_balance(1_000, 250).unwrap(), 1_250);
    }

    #[test]
    fn decrement_to_zero_is_allowed() {
        assert_eq!(next_balance(1_000, -1_000).unwrap(), 0);
    }

    #[test]
    fn overdraw_is_rejected() {
        let err = next_balance(1_000, -1_001).unwrap_err();
        assert_eq!(err.code(), "insufficient_balance");
    }

    #[test]
    fn overflow_is_rejected() {
        assert_eq!(
            next_balance(i64::MAX, 1).unwrap_err().code(),
            "invalid_request"
        );
    }

    #[tokio::test]
    async fn balance_matches_the_sum_of_its_log() {
        let Some(pool) = crate::db::testing::scratch_pool().await else {
            return;
        };
        let user_id = crate::db::testing::insert_user(&pool, None, "saver@example.com").await;

        increment(&pool, user_id, WalletType::Platform, 5_000, LedgerEntry::new("Welcome credit"))
            .await
            .unwrap();
        decrement(&pool, user_id, WalletType::Platform, 1_250, LedgerEntry::new("Correction"))
            .await
            .unwrap();
        let err = decrement(&pool, user_id, WalletType::Platform, 10_000, LedgerEntry::new("Too much"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "insufficient_balance");

        let wallets = list_wallets(&pool, user_id).await.unwrap();
        assert_eq!(wallets.len(), 1);
        let wallet = &wallets[0];
        assert_eq!(wallet.balance_cents, 3_750);

        let (entries, logged): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(delta_cents), 0)::BIGINT
             FROM credit_wallet_logs WHERE wallet_id = $1",
        )
        .bind(wallet.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(entries, 2);
        assert_eq!(logged, wallet.balance_cents);
    }
}
