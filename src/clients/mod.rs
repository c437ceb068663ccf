//! Thin HTTP clients for the partner services.
//!
//! Each service sits behind a trait so handlers and jobs hold
//! `Arc<dyn Trait>` and tests can substitute fakes.

pub mod dwolla;
pub mod finch;
pub mod plaid;

pub use dwolla::{DwollaApi, DwollaClient, NewCustomer, TransferStatus};
pub use finch::{FinchApi, FinchClient, FinchIndividual, FinchIndividualDetail};
pub use plaid::{ItemAccess, PlaidAccountInfo, PlaidApi, PlaidClient};

use std::time::Duration;

/// Failure talking to a partner API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-2xx status.
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response was malformed: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },
}

/// Shared reqwest client with the timeout every partner call uses.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Turn a non-2xx response into `ClientError::Status`, keeping the body for logs.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(service, status = status.as_u16(), "partner API rejected request");
    Err(ClientError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}

/// Convert a dollar amount reported by a partner into cents.
pub fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}

/// Format cents as the decimal string Dwolla expects (`"12.05"`).
pub fn cents_to_decimal(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
pub mod fakes {
    //! In-memory partner doubles for handler and service tests.

    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;

    #[derive(Default)]
    pub struct FakePlaid;

    #[async_trait]
    impl PlaidApi for FakePlaid {
        async fn create_link_token(&self, user_id: Uuid) -> Result<String, ClientError> {
            Ok(format!("link-sandbox-{user_id}"))
        }

        async fn exchange_public_token(&self, _public_token: &str) -> Result<ItemAccess, ClientError> {
            Ok(ItemAccess {
                access_token: "access-sandbox-1".to_string(),
                item_id: "item-1".to_string(),
            })
        }

        async fn get_accounts(&self, _access_token: &str) -> Result<Vec<PlaidAccountInfo>, ClientError> {
            Ok(vec![PlaidAccountInfo {
                account_id: "acc-1".to_string(),
                name: "Plaid Checking".to_string(),
                mask: Some("0000".to_string()),
                subtype: Some("checking".to_string()),
                available_cents: Some(10_000),
                current_cents: Some(11_000),
            }])
        }

        async fn get_balance(
            &self,
            _access_token: &str,
            account_id: &str,
        ) -> Result<PlaidAccountInfo, ClientError> {
            Err(ClientError::Malformed {
                service: "plaid",
                message: format!("unknown account {account_id}"),
            })
        }

        async fn create_processor_token(
            &self,
            _access_token: &str,
            _account_id: &str,
        ) -> Result<String, ClientError> {
            Ok("processor-sandbox-1".to_string())
        }
    }

    /// Records every transfer it is asked to create.
    #[derive(Default)]
    pub struct FakeDwolla {
        pub transfers: Mutex<Vec<(String, String, i64)>>,
        /// When set, funding source creation answers 503.
        pub refuse_funding_sources: AtomicBool,
    }

    impl FakeDwolla {
        pub fn refusing_funding_sources() -> Self {
            Self {
                refuse_funding_sources: AtomicBool::new(true),
                ..Self::default()
            }
        }

        pub fn accept_funding_sources(&self) {
            self.refuse_funding_sources.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DwollaApi for FakeDwolla {
        async fn create_customer(&self, _customer: &NewCustomer) -> Result<String, ClientError> {
            Ok("https://api-sandbox.dwolla.com/customers/c-1".to_string())
        }

        async fn create_funding_source(
            &self,
            customer_url: &str,
            _processor_token: &str,
            _name: &str,
        ) -> Result<String, ClientError> {
            if self.refuse_funding_sources.load(Ordering::SeqCst) {
                return Err(ClientError::Status {
                    service: "dwolla",
                    status: 503,
                    body: "Service Unavailable".to_string(),
                });
            }
            Ok(format!("{customer_url}/funding-sources/fs-1"))
        }

        async fn remove_funding_source(&self, _funding_source_url: &str) -> Result<(), ClientError> {
            Ok(())
        }

        async fn create_transfer(
            &self,
            source: &str,
            destination: &str,
            amount_cents: i64,
            _idempotency_key: Option<&str>,
        ) -> Result<String, ClientError> {
            let mut transfers = self.transfers.lock().unwrap();
            transfers.push((source.to_string(), destination.to_string(), amount_cents));
            Ok(format!(
                "https://api-sandbox.dwolla.com/transfers/t-{}",
                transfers.len()
            ))
        }

        async fn get_transfer(&self, _transfer_url: &str) -> Result<TransferStatus, ClientError> {
            Ok(TransferStatus::Pending)
        }
    }

    #[derive(Default)]
    pub struct FakeFinch {
        pub roster: Vec<FinchIndividual>,
        pub details: Vec<FinchIndividualDetail>,
    }

    #[async_trait]
    impl FinchApi for FakeFinch {
        async fn directory(
            &self,
            _access_token: &str,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<FinchIndividual>, ClientError> {
            Ok(self.roster.iter().skip(offset).take(limit).cloned().collect())
        }

        async fn individuals(
            &self,
            _access_token: &str,
            ids: &[String],
        ) -> Result<Vec<FinchIndividualDetail>, ClientError> {
            Ok(self
                .details
                .iter()
                .filter(|detail| ids.contains(&detail.id))
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollars_round_to_nearest_cent() {
        assert_eq!(dollars_to_cents(110.0), 11000);
        assert_eq!(dollars_to_cents(0.1 + 0.2), 30);
        assert_eq!(dollars_to_cents(-4.999), -500);
    }

    #[test]
    fn cents_render_with_two_decimals() {
        assert_eq!(cents_to_decimal(1205), "12.05");
        assert_eq!(cents_to_decimal(7), "0.07");
        assert_eq!(cents_to_decimal(100_000), "1000.00");
        assert_eq!(cents_to_decimal(-250), "-2.50");
    }
}
