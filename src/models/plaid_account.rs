//! Bank accounts linked through Plaid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{Validate, optional_non_empty, require_non_empty},
};

/// Represents a row of the `plaid_accounts` table.
///
/// `plaid_access_token` is an item credential and is never serialized.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlaidAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plaid_item_id: String,
    pub plaid_access_token: String,
    pub plaid_account_id: String,
    pub name: String,
    pub mask: Option<String>,
    pub subtype: Option<String>,
    pub institution_name: Option<String>,
    pub available_balance_cents: Option<i64>,
    pub current_balance_cents: Option<i64>,
    pub balance_updated_at: Option<DateTime<Utc>>,
    pub dwolla_funding_source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub const PLAID_ACCOUNT_COLUMNS: &str = "id, user_id, plaid_item_id, plaid_access_token, \
     plaid_account_id, name, mask, subtype, institution_name, available_balance_cents, \
     current_balance_cents, balance_updated_at, dwolla_funding_source_url, created_at, updated_at, deleted_at";

/// Body for `POST /v1/plaid-account/exchange`, sent after Plaid Link succeeds.
#[derive(Debug, Deserialize)]
pub struct ExchangeTokenRequest {
    pub public_token: String,
    /// Plaid's id of the account the user picked in Link
    pub account_id: String,
    pub institution_name: Option<String>,
}

impl Validate for ExchangeTokenRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("public_token", &self.public_token, 256)?;
        require_non_empty("account_id", &self.account_id, 256)?;
        optional_non_empty("institution_name", self.institution_name.as_deref(), 200)
    }
}

#[derive(Debug, Serialize)]
pub struct LinkTokenResponse {
    pub link_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaidAccountQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PlaidAccountResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub mask: Option<String>,
    pub subtype: Option<String>,
    pub institution_name: Option<String>,
    pub available_balance_cents: Option<i64>,
    pub current_balance_cents: Option<i64>,
    pub balance_updated_at: Option<DateTime<Utc>>,
    pub transfers_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<PlaidAccount> for PlaidAccountResponse {
    fn from(account: PlaidAccount) -> Self {
        Self {
            id: account.id,
            user_id: account.user_id,
            name: account.name,
            mask: account.mask,
            subtype: account.subtype,
            institution_name: account.institution_name,
            available_balance_cents: account.available_balance_cents,
            current_balance_cents: account.current_balance_cents,
            balance_updated_at: account.balance_updated_at,
            transfers_enabled: account.dwolla_funding_source_url.is_some(),
            created_at: account.created_at,
        }
    }
}
