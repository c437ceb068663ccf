//! Transaction service - ACH money movement through Dwolla.
//!
//! This service handles:
//! - Idempotent transfer creation
//! - Withdrawal balance checks
//! - Applying Dwolla status changes exactly once
//! - Employer deposit matching into the EMPLOYER wallet
//! - Signed Dwolla webhooks
//!
//! # Atomicity Guarantees
//!
//! A status change and the matching credit it triggers commit together.
//! Status only ever moves away from `pending`, so replayed webhooks and
//! overlapping sync passes cannot credit a match twice.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    clients::TransferStatus,
    db::DbPool,
    error::{AppError, Entity},
    jobs::Job,
    mailer::Template,
    models::{
        credit_wallet::{LedgerEntry, WalletType},
        program::{Period, Program},
        transaction::{
            CreateTransactionRequest, DwollaWebhookEvent, SyncSummary, Transaction,
            TransactionStatus, TransferDirection,
        },
    },
    services::{plaid_service, wallet_service},
    state::AppState,
};

type HmacSha256 = Hmac<Sha256>;

pub const TRANSACTION_COLUMNS: &str = "id, user_id, plaid_account_id, amount_cents, direction, \
     status, dwolla_transfer_url, failure_reason, description, idempotency_key, created_at, updated_at";

/// Start a deposit or withdrawal.
///
/// # Process
///
/// 1. Return the original transaction for a repeated idempotency key
/// 2. Check the bank account belongs to the user and can transfer
/// 3. Lock the user row, check withdrawable savings, record the transaction
/// 4. Ask Dwolla for the transfer (keyed by the transaction id)
/// 5. Store the transfer URL, or mark the transaction failed
pub async fn create_transaction(
    state: &AppState,
    user_id: Uuid,
    request: CreateTransactionRequest,
) -> Result<Transaction, AppError> {
    if let Some(ref key) = request.idempotency_key {
        if let Some(existing) = find_by_idempotency_key(&state.pool, user_id, key).await? {
            return Ok(existing);
        }
    }

    let account = plaid_service::find_owned(state, request.plaid_account_id, user_id).await?;
    let funding_source = account
        .dwolla_funding_source_url
        .clone()
        .ok_or(AppError::AccountNotLinked)?;

    let master = state.config.dwolla_master_funding_source.clone();
    if master.is_empty() {
        return Err(AppError::Internal(
            "DWOLLA_MASTER_FUNDING_SOURCE is not configured".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;

    // Serializes concurrent withdrawals for the same user
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    if request.direction == TransferDirection::Withdrawal {
        let available = withdrawable_cents(&mut tx, user_id).await?;
        if available < request.amount_cents {
            tx.rollback().await?;
            return Err(AppError::InsufficientBalance);
        }
    }

    let inserted = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        INSERT INTO transactions (
            user_id, plaid_account_id, amount_cents, direction, description, idempotency_key
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, idempotency_key) DO NOTHING
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(account.id)
    .bind(request.amount_cents)
    .bind(request.direction.as_str())
    .bind(&request.description)
    .bind(&request.idempotency_key)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;

    // A concurrent request with the same key won the insert
    let Some(transaction) = inserted else {
        let key = request.idempotency_key.as_deref().unwrap_or_default();
        return find_by_idempotency_key(&state.pool, user_id, key)
            .await?
            .ok_or(AppError::NotFound(Entity::Transaction));
    };

    let (source, destination) = match request.direction {
        TransferDirection::Deposit => (funding_source, master),
        TransferDirection::Withdrawal => (master, funding_source),
    };

    let transfer = state
        .dwolla
        .create_transfer(
            &source,
            &destination,
            transaction.amount_cents,
            Some(&transaction.id.to_string()),
        )
        .await;

    match transfer {
        Ok(transfer_url) => {
            let updated = sqlx::query_as::<_, Transaction>(&format!(
                "UPDATE transactions SET dwolla_transfer_url = $1, updated_at = NOW()
                 WHERE id = $2
                 RETURNING {TRANSACTION_COLUMNS}"
            ))
            .bind(transfer_url)
            .bind(transaction.id)
            .fetch_one(&state.pool)
            .await?;

            tracing::info!(
                transaction_id = %updated.id,
                %user_id,
                direction = %updated.direction,
                amount_cents = updated.amount_cents,
                "transfer initiated"
            );
            Ok(updated)
        }
        Err(err) => {
            sqlx::query(
                "UPDATE transactions SET status = 'failed', failure_reason = $1, updated_at = NOW()
                 WHERE id = $2",
            )
            .bind("Transfer could not be initiated")
            .bind(transaction.id)
            .execute(&state.pool)
            .await?;
            Err(err.into())
        }
    }
}

async fn find_by_idempotency_key(
    pool: &DbPool,
    user_id: Uuid,
    key: &str,
) -> Result<Option<Transaction>, AppError> {
    let transaction = sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions
         WHERE user_id = $1 AND idempotency_key = $2"
    ))
    .bind(user_id)
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(transaction)
}

/// Processed deposits minus withdrawals that are processed or still in flight.
async fn withdrawable_cents(conn: &mut PgConnection, user_id: Uuid) -> Result<i64, AppError> {
    let available: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(CASE
            WHEN direction = 'deposit' AND status = 'processed' THEN amount_cents
            WHEN direction = 'withdrawal' AND status IN ('processed', 'pending') THEN -amount_cents
            ELSE 0
        END), 0)::BIGINT
        FROM transactions
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(available)
}

/// Apply a Dwolla status to a pending transaction.
///
/// Returns `false` when nothing changed (still pending, or already final).
pub async fn apply_transfer_status(
    state: &AppState,
    transaction_id: Uuid,
    status: &TransferStatus,
) -> Result<bool, AppError> {
    let new_status = TransactionStatus::from(status);
    if !new_status.is_final() {
        return Ok(false);
    }
    let failure_reason = match status {
        TransferStatus::Failed { reason } => reason.clone(),
        _ => None,
    };

    let mut tx = state.pool.begin().await?;

    let Some(transaction) = sqlx::query_as::<_, Transaction>(&format!(
        "UPDATE transactions SET status = $1, failure_reason = $2, updated_at = NOW()
         WHERE id = $3 AND status = 'pending'
         RETURNING {TRANSACTION_COLUMNS}"
    ))
    .bind(new_status.as_str())
    .bind(failure_reason)
    .bind(transaction_id)
    .fetch_optional(&mut *tx)
    .await?
    else {
        tx.rollback().await?;
        return Ok(false);
    };

    if transaction.status == TransactionStatus::Processed
        && transaction.direction == TransferDirection::Deposit
    {
        credit_employer_match(&mut tx, &transaction).await?;
    }

    tx.commit().await?;

    tracing::info!(%transaction_id, status = %new_status, "transfer status applied");
    notify_owner(state, &transaction).await;

    Ok(true)
}

/// Credit the EMPLOYER wallet for a processed deposit under the employer's program.
async fn credit_employer_match(
    conn: &mut PgConnection,
    transaction: &Transaction,
) -> Result<i64, AppError> {
    let program = sqlx::query_as::<_, Program>(
        r#"
        SELECT p.id, p.employer_id, p.name, p.monthly_amount_cents, p.match_basis_points,
               p.match_cap_cents, p.status, p.starts_on, p.ends_on, p.created_at, p.updated_at
        FROM programs p
        JOIN users u ON u.employer_id = p.employer_id
        WHERE u.id = $1
          AND u.status = 'active'
          AND p.status = 'active'
          AND p.match_basis_points > 0
          AND p.starts_on <= CURRENT_DATE
          AND (p.ends_on IS NULL OR p.ends_on >= CURRENT_DATE)
        ORDER BY p.starts_on, p.created_at
        LIMIT 1
        "#,
    )
    .bind(transaction.user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(program) = program else {
        return Ok(0);
    };

    let period = Period::current();
    let matched_this_month: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(l.delta_cents), 0)::BIGINT
        FROM credit_wallet_logs l
        JOIN credit_wallets w ON w.id = l.wallet_id
        WHERE w.user_id = $1
          AND w.wallet_type = 'EMPLOYER'
          AND l.reference LIKE 'match:%'
          AND l.created_at >= $2::date
        "#,
    )
    .bind(transaction.user_id)
    .bind(period.first_day())
    .fetch_one(&mut *conn)
    .await?;

    let amount = program.match_for(transaction.amount_cents, matched_this_month);
    if amount > 0 {
        wallet_service::apply_delta(
            conn,
            transaction.user_id,
            WalletType::Employer,
            amount,
            LedgerEntry::new(format!("Employer match: {}", program.name))
                .with_reference(format!("match:{}", transaction.id)),
        )
        .await?;
    }

    Ok(amount)
}

async fn notify_owner(state: &AppState, transaction: &Transaction) {
    let owner: Result<Option<(String, String)>, sqlx::Error> =
        sqlx::query_as("SELECT email, first_name FROM users WHERE id = $1")
            .bind(transaction.user_id)
            .fetch_optional(&state.pool)
            .await;

    match owner {
        Ok(Some((email, first_name))) => {
            let template = Template::TransferUpdate {
                first_name,
                amount_cents: transaction.amount_cents,
                direction: transaction.direction.to_string(),
                status: transaction.status.to_string(),
            };
            state.jobs.enqueue(Job::SendEmail(
                template.render(&state.config.mail_from, &email),
            ));
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "could not load transfer owner for email"),
    }
}

/// Poll Dwolla for every pending transfer.
pub async fn sync_pending(state: &AppState) -> Result<SyncSummary, AppError> {
    let pending: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT id, dwolla_transfer_url FROM transactions
         WHERE status = 'pending' AND dwolla_transfer_url IS NOT NULL
         ORDER BY created_at",
    )
    .fetch_all(&state.pool)
    .await?;

    let mut summary = SyncSummary::default();
    for (transaction_id, transfer_url) in pending {
        summary.checked += 1;
        let result = match state.dwolla.get_transfer(&transfer_url).await {
            Ok(status) => apply_transfer_status(state, transaction_id, &status).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(true) => summary.updated += 1,
            Ok(false) => {}
            Err(err) => {
                summary.errors += 1;
                tracing::error!(%transaction_id, error = %err, "transfer sync failed");
            }
        }
    }

    tracing::info!(
        checked = summary.checked,
        updated = summary.updated,
        errors = summary.errors,
        "pending transfers synced"
    );
    Ok(summary)
}

/// Check Dwolla's `X-Request-Signature-SHA-256` header: hex HMAC-SHA256 of the raw body.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), AppError> {
    if secret.is_empty() {
        return Err(AppError::InvalidSignature);
    }
    let expected = hex::decode(signature.trim()).map_err(|_| AppError::InvalidSignature)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AppError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::InvalidSignature)
}

/// Handle a verified Dwolla webhook. Events for unknown transfers are ignored.
pub async fn handle_webhook(state: &AppState, body: &[u8]) -> Result<bool, AppError> {
    let event: DwollaWebhookEvent = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidRequest(format!("Malformed webhook: {e}")))?;

    if !event.topic.contains("transfer") {
        tracing::debug!(topic = %event.topic, "ignoring non-transfer webhook");
        return Ok(false);
    }

    let transfer_url = event.links.resource.href;
    let transaction_id: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM transactions WHERE dwolla_transfer_url = $1")
            .bind(&transfer_url)
            .fetch_optional(&state.pool)
            .await?;

    let Some(transaction_id) = transaction_id else {
        tracing::debug!(%transfer_url, "webhook for unknown transfer");
        return Ok(false);
    };

    let status = state.dwolla.get_transfer(&transfer_url).await?;
    apply_transfer_status(state, transaction_id, &status).await
}

/// Get a transaction, enforcing ownership for non-admin callers.
pub async fn get_transaction(
    state: &AppState,
    transaction_id: Uuid,
    owner: Option<Uuid>,
) -> Result<Transaction, AppError> {
    let transaction = sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
    ))
    .bind(transaction_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Transaction))?;

    match owner {
        Some(owner) if owner != transaction.user_id => Err(AppError::NotFound(Entity::Transaction)),
        _ => Ok(transaction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"topic":"transfer_completed"}"#;
        let signature = sign("whsec", body);
        assert!(verify_webhook_signature("whsec", body, &signature).is_ok());
    }

    #[test]
    fn tampered_body_fails() {
        let signature = sign("whsec", b"original");
        let err = verify_webhook_signature("whsec", b"tampered", &signature).unwrap_err();
        assert_eq!(err.code(), "invalid_signature");
    }

    #[test]
    fn non_hex_or_unconfigured_fails() {
        assert!(verify_webhook_signature("whsec", b"body", "zz-not-hex").is_err());
        let signature = sign("", b"body");
        assert!(verify_webhook_signature("", b"body", &signature).is_err());
    }

    mod with_database {
        use std::sync::Arc;

        use super::*;
        use crate::{
            clients::fakes::FakeDwolla,
            db::testing::{insert_employer, insert_linked_account, insert_user},
            state::testing::db_harness,
        };

        fn deposit(plaid_account_id: Uuid, amount_cents: i64, key: Option<&str>) -> CreateTransactionRequest {
            CreateTransactionRequest {
                plaid_account_id,
                amount_cents,
                direction: TransferDirection::Deposit,
                description: None,
                idempotency_key: key.map(str::to_string),
            }
        }

        async fn employer_wallet(pool: &DbPool, user_id: Uuid) -> i64 {
            sqlx::query_scalar(
                "SELECT COALESCE(MAX(balance_cents), 0) FROM credit_wallets
                 WHERE user_id = $1 AND wallet_type = 'EMPLOYER'",
            )
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
        }

        #[tokio::test]
        async fn idempotency_keys_are_scoped_to_the_user() {
            let Some(mut harness) = db_harness().await else {
                return;
            };
            let dwolla = Arc::new(FakeDwolla::default());
            harness.state.dwolla = dwolla.clone();
            let state = &harness.state;

            let ana = insert_user(&state.pool, None, "ana@example.com").await;
            let ben = insert_user(&state.pool, None, "ben@example.com").await;
            let ana_account = insert_linked_account(&state.pool, ana).await;
            let ben_account = insert_linked_account(&state.pool, ben).await;

            let first = create_transaction(state, ana, deposit(ana_account, 1_000, Some("order-1")))
                .await
                .unwrap();
            let other = create_transaction(state, ben, deposit(ben_account, 2_000, Some("order-1")))
                .await
                .unwrap();
            assert_ne!(first.id, other.id);
            assert_eq!(other.user_id, ben);

            let repeat = create_transaction(state, ana, deposit(ana_account, 1_000, Some("order-1")))
                .await
                .unwrap();
            assert_eq!(repeat.id, first.id);
            assert_eq!(dwolla.transfers.lock().unwrap().len(), 2);
        }

        #[tokio::test]
        async fn status_applies_once_and_match_respects_the_monthly_cap() {
            let Some(harness) = db_harness().await else {
                return;
            };
            let state = &harness.state;

            let employer_id = insert_employer(&state.pool, None).await;
            sqlx::query(
                "INSERT INTO programs (employer_id, name, match_basis_points, match_cap_cents, starts_on)
                 VALUES ($1, 'Match', 5000, 3000, CURRENT_DATE - 30)",
            )
            .bind(employer_id)
            .execute(&state.pool)
            .await
            .unwrap();
            let user_id = insert_user(&state.pool, Some(employer_id), "ana@acme.com").await;
            let account = insert_linked_account(&state.pool, user_id).await;

            let first = create_transaction(state, user_id, deposit(account, 4_000, None))
                .await
                .unwrap();
            assert!(apply_transfer_status(state, first.id, &TransferStatus::Processed).await.unwrap());
            assert_eq!(employer_wallet(&state.pool, user_id).await, 2_000);

            // Replays and late contradicting updates change nothing
            assert!(!apply_transfer_status(state, first.id, &TransferStatus::Processed).await.unwrap());
            let failed = TransferStatus::Failed { reason: Some("R01".to_string()) };
            assert!(!apply_transfer_status(state, first.id, &failed).await.unwrap());
            assert_eq!(employer_wallet(&state.pool, user_id).await, 2_000);

            let second = create_transaction(state, user_id, deposit(account, 4_000, None))
                .await
                .unwrap();
            assert!(apply_transfer_status(state, second.id, &TransferStatus::Processed).await.unwrap());
            assert_eq!(employer_wallet(&state.pool, user_id).await, 3_000);

            let matches: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM credit_wallet_logs WHERE reference LIKE 'match:%'",
            )
            .fetch_one(&state.pool)
            .await
            .unwrap();
            assert_eq!(matches, 2);
        }

        #[tokio::test]
        async fn earliest_starting_program_provides_the_match() {
            let Some(harness) = db_harness().await else {
                return;
            };
            let state = &harness.state;

            let employer_id = insert_employer(&state.pool, None).await;
            for (name, bps, starts_days_ago) in [("Newer", 1000, 10), ("Original", 5000, 60)] {
                sqlx::query(
                    "INSERT INTO programs (employer_id, name, match_basis_points, match_cap_cents, starts_on)
                     VALUES ($1, $2, $3, 100000, CURRENT_DATE - $4::int)",
                )
                .bind(employer_id)
                .bind(name)
                .bind(bps)
                .bind(starts_days_ago)
                .execute(&state.pool)
                .await
                .unwrap();
            }
            let user_id = insert_user(&state.pool, Some(employer_id), "ana@acme.com").await;
            let account = insert_linked_account(&state.pool, user_id).await;

            let transaction = create_transaction(state, user_id, deposit(account, 10_000, None))
                .await
                .unwrap();
            assert!(apply_transfer_status(state, transaction.id, &TransferStatus::Processed).await.unwrap());
            assert_eq!(employer_wallet(&state.pool, user_id).await, 5_000);
        }
    }
}
