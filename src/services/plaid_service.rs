//! Linking bank accounts through Plaid and attaching them to Dwolla.
//!
//! # Process
//!
//! 1. Exchange the Link public token for an item access token
//! 2. Fetch the item's accounts and keep the one the user picked
//! 3. Make sure the user has a Dwolla customer
//! 4. Create a processor token and a Dwolla funding source from it
//! 5. Store the account with its funding source URL
//!
//! Steps 3-4 are best-effort: a failure there still stores the account,
//! which can be used for balances but not for transfers until
//! [`attach_account`] succeeds.

use uuid::Uuid;

use crate::{
    clients::NewCustomer,
    error::{AppError, Entity},
    models::{
        plaid_account::{ExchangeTokenRequest, PLAID_ACCOUNT_COLUMNS, PlaidAccount},
        user::{USER_COLUMNS, User},
    },
    state::AppState,
};

async fn find_user(state: &AppState, user_id: Uuid) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::User))
}

pub async fn link_account(
    state: &AppState,
    user_id: Uuid,
    request: ExchangeTokenRequest,
) -> Result<PlaidAccount, AppError> {
    let user = find_user(state, user_id).await?;

    let item = state.plaid.exchange_public_token(&request.public_token).await?;
    let account = state
        .plaid
        .get_accounts(&item.access_token)
        .await?
        .into_iter()
        .find(|account| account.account_id == request.account_id)
        .ok_or_else(|| AppError::validation("account_id", "is not part of the linked item"))?;

    let funding_source = match attach_funding_source(
        state,
        &user,
        &item.access_token,
        &account.account_id,
        &account.name,
    )
    .await
    {
        Ok(url) => Some(url),
        Err(err) => {
            tracing::warn!(%user_id, error = %err, "bank linked without Dwolla funding source");
            None
        }
    };

    let stored = sqlx::query_as::<_, PlaidAccount>(&format!(
        r#"
        INSERT INTO plaid_accounts (
            user_id, plaid_item_id, plaid_access_token, plaid_account_id, name, mask, subtype,
            institution_name, available_balance_cents, current_balance_cents, balance_updated_at,
            dwolla_funding_source_url
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), $11)
        RETURNING {PLAID_ACCOUNT_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&item.item_id)
    .bind(&item.access_token)
    .bind(&account.account_id)
    .bind(&account.name)
    .bind(&account.mask)
    .bind(&account.subtype)
    .bind(&request.institution_name)
    .bind(account.available_cents)
    .bind(account.current_cents)
    .bind(funding_source)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict("Bank account is already linked".to_string()),
        other => other,
    })?;

    tracing::info!(%user_id, plaid_account_id = %stored.id, "bank account linked");
    Ok(stored)
}

/// Retry the Dwolla step for an account stored without a funding source.
///
/// Already-attached accounts are returned unchanged. Dwolla failures
/// propagate as `502 upstream_error` so the client can try again.
pub async fn attach_account(
    state: &AppState,
    account_id: Uuid,
    user_id: Uuid,
) -> Result<PlaidAccount, AppError> {
    let account = find_owned(state, account_id, user_id).await?;
    if account.dwolla_funding_source_url.is_some() {
        return Ok(account);
    }

    let user = find_user(state, user_id).await?;
    let url = attach_funding_source(
        state,
        &user,
        &account.plaid_access_token,
        &account.plaid_account_id,
        &account.name,
    )
    .await?;

    let attached = sqlx::query_as::<_, PlaidAccount>(&format!(
        "UPDATE plaid_accounts SET dwolla_funding_source_url = $1, updated_at = NOW()
         WHERE id = $2
         RETURNING {PLAID_ACCOUNT_COLUMNS}"
    ))
    .bind(url)
    .bind(account.id)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(%user_id, plaid_account_id = %attached.id, "funding source attached");
    Ok(attached)
}

async fn attach_funding_source(
    state: &AppState,
    user: &User,
    access_token: &str,
    account_id: &str,
    name: &str,
) -> Result<String, AppError> {
    let customer_url = ensure_dwolla_customer(state, user).await?;
    let processor_token = state
        .plaid
        .create_processor_token(access_token, account_id)
        .await?;
    let url = state
        .dwolla
        .create_funding_source(&customer_url, &processor_token, name)
        .await?;
    Ok(url)
}

/// Return the user's Dwolla customer URL, creating the customer on first use.
pub async fn ensure_dwolla_customer(state: &AppState, user: &User) -> Result<String, AppError> {
    if let Some(url) = &user.dwolla_customer_url {
        return Ok(url.clone());
    }

    let url = state
        .dwolla
        .create_customer(&NewCustomer {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
        })
        .await?;

    sqlx::query("UPDATE users SET dwolla_customer_url = $1, updated_at = NOW() WHERE id = $2")
        .bind(&url)
        .bind(user.id)
        .execute(&state.pool)
        .await?;

    Ok(url)
}

pub async fn find_owned(
    state: &AppState,
    account_id: Uuid,
    user_id: Uuid,
) -> Result<PlaidAccount, AppError> {
    sqlx::query_as::<_, PlaidAccount>(&format!(
        "SELECT {PLAID_ACCOUNT_COLUMNS} FROM plaid_accounts
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"
    ))
    .bind(account_id)
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::PlaidAccount))
}

pub async fn list_for_user(state: &AppState, user_id: Uuid) -> Result<Vec<PlaidAccount>, AppError> {
    let accounts = sqlx::query_as::<_, PlaidAccount>(&format!(
        "SELECT {PLAID_ACCOUNT_COLUMNS} FROM plaid_accounts
         WHERE user_id = $1 AND deleted_at IS NULL
         ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(accounts)
}

pub async fn refresh_balance(
    state: &AppState,
    account_id: Uuid,
    user_id: Uuid,
) -> Result<PlaidAccount, AppError> {
    let account = find_owned(state, account_id, user_id).await?;
    let balance = state
        .plaid
        .get_balance(&account.plaid_access_token, &account.plaid_account_id)
        .await?;

    let updated = sqlx::query_as::<_, PlaidAccount>(&format!(
        "UPDATE plaid_accounts
         SET available_balance_cents = $1, current_balance_cents = $2,
             balance_updated_at = NOW(), updated_at = NOW()
         WHERE id = $3
         RETURNING {PLAID_ACCOUNT_COLUMNS}"
    ))
    .bind(balance.available_cents)
    .bind(balance.current_cents)
    .bind(account.id)
    .fetch_one(&state.pool)
    .await?;

    Ok(updated)
}

/// Soft-delete the account. Pending transfers keep it alive.
pub async fn remove_account(
    state: &AppState,
    account_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    let account = find_owned(state, account_id, user_id).await?;

    let pending: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM transactions WHERE plaid_account_id = $1 AND status = 'pending')",
    )
    .bind(account.id)
    .fetch_one(&state.pool)
    .await?;
    if pending {
        return Err(AppError::Conflict(
            "Bank account has pending transfers".to_string(),
        ));
    }

    if let Some(url) = &account.dwolla_funding_source_url {
        if let Err(err) = state.dwolla.remove_funding_source(url).await {
            tracing::warn!(
                plaid_account_id = %account.id,
                error = %err,
                "could not remove Dwolla funding source"
            );
        }
    }

    sqlx::query("UPDATE plaid_accounts SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(account.id)
        .execute(&state.pool)
        .await?;

    Ok(())
}
