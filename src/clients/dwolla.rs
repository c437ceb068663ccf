//! Dwolla client: customers, funding sources and ACH transfers.
//!
//! Dwolla uses OAuth client credentials. The access token is cached and
//! refreshed a minute before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::{ClientError, cents_to_decimal, check_status, http_client};

const SERVICE: &str = "dwolla";
const HAL_JSON: &str = "application/vnd.dwolla.v1.hal+json";

/// Customer to register before attaching bank accounts.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Lifecycle of a Dwolla transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Processed,
    Cancelled,
    Failed { reason: Option<String> },
}

impl TransferStatus {
    /// Parse Dwolla's status string; unknown values are treated as still pending.
    pub fn parse(status: &str, failure_reason: Option<String>) -> Self {
        match status {
            "processed" => TransferStatus::Processed,
            "cancelled" => TransferStatus::Cancelled,
            "failed" => TransferStatus::Failed {
                reason: failure_reason,
            },
            _ => TransferStatus::Pending,
        }
    }
}

#[async_trait]
pub trait DwollaApi: Send + Sync {
    /// Create a customer and return its resource URL.
    async fn create_customer(&self, customer: &NewCustomer) -> Result<String, ClientError>;

    /// Attach a Plaid processor token as a funding source; returns its URL.
    async fn create_funding_source(
        &self,
        customer_url: &str,
        processor_token: &str,
        name: &str,
    ) -> Result<String, ClientError>;

    async fn remove_funding_source(&self, funding_source_url: &str) -> Result<(), ClientError>;

    /// Start an ACH transfer; returns the transfer URL.
    async fn create_transfer(
        &self,
        source: &str,
        destination: &str,
        amount_cents: i64,
        idempotency_key: Option<&str>,
    ) -> Result<String, ClientError>;

    async fn get_transfer(&self, transfer_url: &str) -> Result<TransferStatus, ClientError>;
}

pub struct DwollaClient {
    client: reqwest::Client,
    base_url: String,
    key: String,
    secret: String,
    token: Mutex<Option<(String, Instant)>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TransferResource {
    status: String,
}

#[derive(Debug, Deserialize)]
struct FailureResource {
    code: Option<String>,
    description: Option<String>,
}

impl FailureResource {
    fn reason(self) -> Option<String> {
        match (self.code, self.description) {
            (Some(code), Some(description)) => Some(format!("{code}: {description}")),
            (code, description) => code.or(description),
        }
    }
}

impl DwollaClient {
    pub fn new(base_url: &str, key: &str, secret: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            secret: secret.to_string(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, ClientError> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/token", self.base_url))
            .basic_auth(&self.key, Some(&self.secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|source| ClientError::Http {
                service: SERVICE,
                source,
            })?;

        let token: TokenResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| malformed(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        tracing::debug!("refreshed Dwolla access token");

        Ok(token.access_token)
    }

    /// POST a HAL+JSON body and return the `Location` of the created resource.
    async fn create(
        &self,
        url: &str,
        body: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<String, ClientError> {
        let token = self.access_token().await?;
        let mut request = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(ACCEPT, HAL_JSON)
            .header(CONTENT_TYPE, HAL_JSON)
            .json(&body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await.map_err(|source| ClientError::Http {
            service: SERVICE,
            source,
        })?;
        let response = check_status(SERVICE, response).await?;

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| malformed("created resource without Location header"))
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ClientError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(ACCEPT, HAL_JSON)
            .send()
            .await
            .map_err(|source| ClientError::Http {
                service: SERVICE,
                source,
            })?;

        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| malformed(e.to_string()))
    }
}

fn malformed(message: impl Into<String>) -> ClientError {
    ClientError::Malformed {
        service: SERVICE,
        message: message.into(),
    }
}

#[async_trait]
impl DwollaApi for DwollaClient {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<String, ClientError> {
        let body = json!({
            "firstName": customer.first_name,
            "lastName": customer.last_name,
            "email": customer.email,
            "type": "receive-only",
        });
        self.create(&format!("{}/customers", self.base_url), body, None)
            .await
    }

    async fn create_funding_source(
        &self,
        customer_url: &str,
        processor_token: &str,
        name: &str,
    ) -> Result<String, ClientError> {
        let body = json!({ "plaidToken": processor_token, "name": name });
        self.create(&format!("{customer_url}/funding-sources"), body, None)
            .await
    }

    async fn remove_funding_source(&self, funding_source_url: &str) -> Result<(), ClientError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(funding_source_url)
            .bearer_auth(token)
            .header(ACCEPT, HAL_JSON)
            .header(CONTENT_TYPE, HAL_JSON)
            .json(&json!({ "removed": true }))
            .send()
            .await
            .map_err(|source| ClientError::Http {
                service: SERVICE,
                source,
            })?;
        check_status(SERVICE, response).await?;
        Ok(())
    }

    async fn create_transfer(
        &self,
        source: &str,
        destination: &str,
        amount_cents: i64,
        idempotency_key: Option<&str>,
    ) -> Result<String, ClientError> {
        let body = json!({
            "_links": {
                "source": { "href": source },
                "destination": { "href": destination },
            },
            "amount": { "currency": "USD", "value": cents_to_decimal(amount_cents) },
        });
        self.create(&format!("{}/transfers", self.base_url), body, idempotency_key)
            .await
    }

    async fn get_transfer(&self, transfer_url: &str) -> Result<TransferStatus, ClientError> {
        let transfer: TransferResource = self.get(transfer_url).await?;

        let reason = if transfer.status == "failed" {
            match self
                .get::<FailureResource>(&format!("{transfer_url}/failure"))
                .await
            {
                Ok(failure) => failure.reason(),
                Err(err) => {
                    tracing::warn!(error = %err, "could not load Dwolla failure reason");
                    None
                }
            }
        } else {
            None
        };

        Ok(TransferStatus::parse(&transfer.status, reason))
    }
}
