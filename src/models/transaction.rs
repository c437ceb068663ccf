//! ACH transfers between a user's linked bank and pooled savings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    clients::TransferStatus,
    error::AppError,
    validation::{Validate, optional_non_empty, require_range},
};

super::text_enum! {
    /// `deposit` moves bank -> savings, `withdrawal` savings -> bank.
    TransferDirection {
        Deposit => "deposit",
        Withdrawal => "withdrawal",
    }
}

super::text_enum! {
    TransactionStatus {
        Pending => "pending",
        Processed => "processed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl TransactionStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl From<&TransferStatus> for TransactionStatus {
    fn from(status: &TransferStatus) -> Self {
        match status {
            TransferStatus::Pending => TransactionStatus::Pending,
            TransferStatus::Processed => TransactionStatus::Processed,
            TransferStatus::Cancelled => TransactionStatus::Cancelled,
            TransferStatus::Failed { .. } => TransactionStatus::Failed,
        }
    }
}

/// Smallest transfer: $1.00
pub const MIN_TRANSFER_CENTS: i64 = 100;
/// Largest transfer: $1,000,000.00
pub const MAX_TRANSFER_CENTS: i64 = 100_000_000;

/// Represents a row of the `transactions` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plaid_account_id: Uuid,
    pub amount_cents: i64,
    #[sqlx(try_from = "String")]
    pub direction: TransferDirection,
    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,
    #[serde(skip_serializing)]
    pub dwolla_transfer_url: Option<String>,
    pub failure_reason: Option<String>,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to move money.
///
/// ```json
/// {
///   "plaid_account_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cents": 25000,
///   "direction": "deposit",
///   "description": "March savings",
///   "idempotency_key": "deposit-2025-03"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub plaid_account_id: Uuid,
    pub amount_cents: i64,
    #[serde(default = "default_direction")]
    pub direction: TransferDirection,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

fn default_direction() -> TransferDirection {
    TransferDirection::Deposit
}

impl Validate for CreateTransactionRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_range(
            "amount_cents",
            self.amount_cents,
            MIN_TRANSFER_CENTS,
            MAX_TRANSFER_CENTS,
        )?;
        optional_non_empty("description", self.description.as_deref(), 255)?;
        optional_non_empty("idempotency_key", self.idempotency_key.as_deref(), 255)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionListQuery {
    pub user_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Result of a status sync pass.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct SyncSummary {
    pub checked: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Dwolla webhook envelope; only the resource link matters.
#[derive(Debug, Deserialize)]
pub struct DwollaWebhookEvent {
    pub topic: String,
    #[serde(rename = "_links")]
    pub links: DwollaWebhookLinks,
}

#[derive(Debug, Deserialize)]
pub struct DwollaWebhookLinks {
    pub resource: DwollaLink,
}

#[derive(Debug, Deserialize)]
pub struct DwollaLink {
    pub href: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_defaults_to_deposit() {
        let request: CreateTransactionRequest = serde_json::from_value(serde_json::json!({
            "plaid_account_id": Uuid::nil(),
            "amount_cents": 500
        }))
        .unwrap();
        assert_eq!(request.direction, TransferDirection::Deposit);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn amount_bounds() {
        let request = |amount_cents| CreateTransactionRequest {
            plaid_account_id: Uuid::nil(),
            amount_cents,
            direction: TransferDirection::Deposit,
            description: None,
            idempotency_key: None,
        };
        assert!(request(99).validate().is_err());
        assert!(request(MIN_TRANSFER_CENTS).validate().is_ok());
        assert!(request(MAX_TRANSFER_CENTS + 1).validate().is_err());
    }

    #[test]
    fn webhook_event_exposes_resource() {
        let event: DwollaWebhookEvent = serde_json::from_value(serde_json::json!({
            "id": "80d8ff6e-fe47-4d7e-a4e4-f8b3f3b36fe3",
            "topic": "customer_bank_transfer_completed",
            "_links": {
                "self": { "href": "https://api-sandbox.dwolla.com/events/80d8" },
                "resource": { "href": "https://api-sandbox.dwolla.com/transfers/t-1" }
            }
        }))
        .unwrap();
        assert_eq!(event.links.resource.href, "https://api-sandbox.dwolla.com/transfers/t-1");
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!TransactionStatus::Pending.is_final());
        assert!(TransactionStatus::Processed.is_final());
        assert_eq!(
            TransactionStatus::from(&TransferStatus::Failed { reason: None }),
            TransactionStatus::Failed
        );
    }
}
