//! Credit wallets and their append-only logs.
//!
//! Balances are stored in cents of "ownerific dollars". Every change to
//! `balance_cents` is paired with a log row in the same database transaction,
//! so a wallet's balance always equals the sum of its logged deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{Validate, require_non_empty},
};

super::text_enum! {
    /// Who funds the credit held in a wallet.
    WalletType {
        Platform => "PLATFORM",
        Employer => "EMPLOYER",
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CreditWallet {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub wallet_type: WalletType,
    pub balance_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CreditWalletLog {
    pub id: Uuid,
    pub wallet_id: Uuid,
    /// Positive for increments, negative for decrements
    pub delta_cents: i64,
    pub balance_after_cents: i64,
    pub reason: String,
    /// Source record, e.g. `program:<id>:2025-03` or `transaction:<id>`
    pub reference: Option<String>,
    pub actor_admin_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Describes why a balance changed.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub reason: String,
    pub reference: Option<String>,
    pub actor_admin_id: Option<Uuid>,
}

impl LedgerEntry {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            reference: None,
            actor_admin_id: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn by_admin(mut self, admin_id: Uuid) -> Self {
        self.actor_admin_id = Some(admin_id);
        self
    }
}

/// Admin adjustment of a user's wallet.
///
/// ```json
/// { "user_id": "...", "wallet_type": "PLATFORM", "delta_cents": -2500, "reason": "Correction" }
/// ```
#[derive(Debug, Deserialize)]
pub struct AdjustWalletRequest {
    pub user_id: Uuid,
    pub wallet_type: WalletType,
    /// Signed change; zero is rejected
    pub delta_cents: i64,
    pub reason: String,
}

impl Validate for AdjustWalletRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.delta_cents == 0 {
            return Err(AppError::validation("delta_cents", "must not be zero"));
        }
        if self.delta_cents.unsigned_abs() > 10_000_000_00 {
            return Err(AppError::validation("delta_cents", "is too large"));
        }
        require_non_empty("reason", &self.reason, 500)
    }
}

/// `?user_id=` selector used by admins and employers.
#[derive(Debug, Default, Deserialize)]
pub struct WalletQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WalletLogQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WalletSummary {
    pub user_id: Uuid,
    pub platform_cents: i64,
    pub employer_cents: i64,
    pub total_cents: i64,
}

impl WalletSummary {
    pub fn from_wallets(user_id: Uuid, wallets: &[CreditWallet]) -> Self {
        let sum = |kind: WalletType| {
            wallets
                .iter()
                .filter(|wallet| wallet.wallet_type == kind)
                .map(|wallet| wallet.balance_cents)
                .sum::<i64>()
        };
        let platform_cents = sum(WalletType::Platform);
        let employer_cents = sum(WalletType::Employer);
        Self {
            user_id,
            platform_cents,
            employer_cents,
            total_cents: platform_cents + employer_cents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(user_id: Uuid, wallet_type: WalletType, balance_cents: i64) -> CreditWallet {
        let now = Utc::now();
        CreditWallet {
            id: Uuid::new_v4(),
            user_id,
            wallet_type,
            balance_cents,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn summary_adds_both_wallet_types() {
        let user_id = Uuid::new_v4();
        let wallets = [
            wallet(user_id, WalletType::Platform, 2_500),
            wallet(user_id, WalletType::Employer, 10_000),
        ];
        let summary = WalletSummary::from_wallets(user_id, &wallets);
        assert_eq!(summary.platform_cents, 2_500);
        assert_eq!(summary.employer_cents, 10_000);
        assert_eq!(summary.total_cents, 12_500);
    }

    #[test]
    fn wallet_type_uses_upper_case_text() {
        assert_eq!(WalletType::Employer.as_str(), "EMPLOYER");
        let parsed: WalletType = serde_json::from_str("\"PLATFORM\"").unwrap();
        assert_eq!(parsed, WalletType::Platform);
    }

    #[test]
    fn zero_adjustments_are_rejected() {
        let request = AdjustWalletRequest {
            user_id: Uuid::new_v4(),
            wallet_type: WalletType::Platform,
            delta_cents: 0,
            reason: "noop".to_string(),
        };
        assert!(request.validate().is_err());
    }
}
