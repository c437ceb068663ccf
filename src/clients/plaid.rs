//! Plaid client: bank linking, account metadata and balances.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{ClientError, check_status, dollars_to_cents, http_client};

const SERVICE: &str = "plaid";

/// Result of exchanging a Link public token.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemAccess {
    pub access_token: String,
    pub item_id: String,
}

/// One bank account as Plaid reports it, balances already in cents.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaidAccountInfo {
    pub account_id: String,
    pub name: String,
    pub mask: Option<String>,
    pub subtype: Option<String>,
    pub available_cents: Option<i64>,
    pub current_cents: Option<i64>,
}

#[async_trait]
pub trait PlaidApi: Send + Sync {
    /// Link token for the client-side Plaid widget.
    async fn create_link_token(&self, user_id: Uuid) -> Result<String, ClientError>;

    async fn exchange_public_token(&self, public_token: &str) -> Result<ItemAccess, ClientError>;

    async fn get_accounts(&self, access_token: &str) -> Result<Vec<PlaidAccountInfo>, ClientError>;

    /// Fresh (non-cached) balance for one account of an item.
    async fn get_balance(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<PlaidAccountInfo, ClientError>;

    /// Processor token that lets Dwolla attach the account as a funding source.
    async fn create_processor_token(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<String, ClientError>;
}

pub struct PlaidClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct LinkTokenResponse {
    link_token: String,
}

#[derive(Debug, Deserialize)]
struct ProcessorTokenResponse {
    processor_token: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    account_id: String,
    name: String,
    #[serde(default)]
    mask: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    balances: RawBalances,
}

#[derive(Debug, Deserialize)]
struct RawBalances {
    #[serde(default)]
    available: Option<f64>,
    #[serde(default)]
    current: Option<f64>,
}

impl From<RawAccount> for PlaidAccountInfo {
    fn from(raw: RawAccount) -> Self {
        Self {
            account_id: raw.account_id,
            name: raw.name,
            mask: raw.mask,
            subtype: raw.subtype,
            available_cents: raw.balances.available.map(dollars_to_cents),
            current_cents: raw.balances.current.map(dollars_to_cents),
        }
    }
}

impl PlaidClient {
    pub fn new(base_url: &str, client_id: &str, secret: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            secret: secret.to_string(),
        }
    }

    /// POST with the credentials Plaid expects inside every JSON body.
    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        mut body: serde_json::Value,
    ) -> Result<T, ClientError> {
        if let Some(map) = body.as_object_mut() {
            map.insert("client_id".to_string(), json!(self.client_id));
            map.insert("secret".to_string(), json!(self.secret));
        }

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|source| ClientError::Http {
                service: SERVICE,
                source,
            })?;

        check_status(SERVICE, response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ClientError::Malformed {
                service: SERVICE,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl PlaidApi for PlaidClient {
    async fn create_link_token(&self, user_id: Uuid) -> Result<String, ClientError> {
        let body = json!({
            "client_name": "Ownerific",
            "language": "en",
            "country_codes": ["US"],
            "products": ["auth"],
            "user": { "client_user_id": user_id.to_string() },
        });
        let response: LinkTokenResponse = self.post("/link/token/create", body).await?;
        Ok(response.link_token)
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<ItemAccess, ClientError> {
        self.post(
            "/item/public_token/exchange",
            json!({ "public_token": public_token }),
        )
        .await
    }

    async fn get_accounts(&self, access_token: &str) -> Result<Vec<PlaidAccountInfo>, ClientError> {
        let response: AccountsResponse = self
            .post("/accounts/get", json!({ "access_token": access_token }))
            .await?;
        Ok(response.accounts.into_iter().map(Into::into).collect())
    }

    async fn get_balance(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<PlaidAccountInfo, ClientError> {
        let response: AccountsResponse = self
            .post(
                "/accounts/balance/get",
                json!({
                    "access_token": access_token,
                    "options": { "account_ids": [account_id] },
                }),
            )
            .await?;

        response
            .accounts
            .into_iter()
            .find(|account| account.account_id == account_id)
            .map(Into::into)
            .ok_or_else(|| ClientError::Malformed {
                service: SERVICE,
                message: format!("balance response missing account {account_id}"),
            })
    }

    async fn create_processor_token(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<String, ClientError> {
        let response: ProcessorTokenResponse = self
            .post(
                "/processor/token/create",
                json!({
                    "access_token": access_token,
                    "account_id": account_id,
                    "processor": "dwolla",
                }),
            )
            .await?;
        Ok(response.processor_token)
    }
}
