//! Error types and HTTP error response handling.
//!
//! Every failure in the service is an [`AppError`]. Each variant owns one row
//! of the error code table: an HTTP status and a stable machine-readable code.
//! Feature modules share this single enum instead of keeping their own tables.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::clients::ClientError;

/// Entities that can be missing, used to build `<entity>_not_found` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Admin,
    User,
    Organization,
    Employer,
    Wallet,
    PlaidAccount,
    Transaction,
    Program,
    EmployeeSync,
    Partner,
    Resource,
    Address,
    Questionnaire,
}

impl Entity {
    fn not_found_code(self) -> &'static str {
        match self {
            Entity::Admin => "admin_not_found",
            Entity::User => "user_not_found",
            Entity::Organization => "organization_not_found",
            Entity::Employer => "employer_not_found",
            Entity::Wallet => "wallet_not_found",
            Entity::PlaidAccount => "plaid_account_not_found",
            Entity::Transaction => "transaction_not_found",
            Entity::Program => "program_not_found",
            Entity::EmployeeSync => "employee_sync_not_found",
            Entity::Partner => "partner_not_found",
            Entity::Resource => "resource_not_found",
            Entity::Address => "address_not_found",
            Entity::Questionnaire => "questionnaire_not_found",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Entity::Admin => "Admin",
            Entity::User => "User",
            Entity::Organization => "Organization",
            Entity::Employer => "Employer",
            Entity::Wallet => "Wallet",
            Entity::PlaidAccount => "Plaid account",
            Entity::Transaction => "Transaction",
            Entity::Program => "Program",
            Entity::EmployeeSync => "Employee sync",
            Entity::Partner => "Partner",
            Entity::Resource => "Resource",
            Entity::Address => "Address",
            Entity::Questionnaire => "Questionnaire",
        }
    }
}

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Database Errors**: any `sqlx::Error`; unique violations become `Conflict`
/// - **Authentication Errors**: missing session, bad credentials, wrong role
/// - **Resource Errors**: requested entity not found (or not visible to the caller)
/// - **Ledger Errors**: operations that would break wallet or transfer rules
/// - **Validation Errors**: request payloads that fail schema checks
/// - **Upstream Errors**: Plaid, Dwolla or Finch failures
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// No session header, or the session is unknown, expired or revoked.
    #[error("Authentication required")]
    Unauthorized,

    /// Email/password pair did not match an active account.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// The caller's role has no handler for this route, or the row belongs to someone else.
    #[error("Forbidden")]
    Forbidden,

    #[error("{} not found", .0.label())]
    NotFound(Entity),

    #[error("Invalid request")]
    InvalidRequest(String),

    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Conflict")]
    Conflict(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    /// Plaid account has no Dwolla funding source yet.
    #[error("Bank account is not linked for transfers")]
    AccountNotLinked,

    #[error("Employer has not connected an HR system")]
    FinchNotConnected,

    #[error("An employee sync is already running for this employer")]
    SyncInProgress,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Reset or claim token is unknown, used or expired.
    #[error("Reset link is invalid or has expired")]
    InvalidResetToken,

    #[error("Upstream service error: {0}")]
    Upstream(#[from] ClientError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a field validation failure.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized | AppError::InvalidCredentials | AppError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_)
            | AppError::Validation { .. }
            | AppError::InvalidResetToken => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::SyncInProgress => StatusCode::CONFLICT,
            AppError::InsufficientBalance
            | AppError::AccountNotLinked
            | AppError::FinchNotConnected => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::Forbidden => "forbidden",
            AppError::NotFound(entity) => entity.not_found_code(),
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Validation { .. } => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::InsufficientBalance => "insufficient_balance",
            AppError::AccountNotLinked => "account_not_linked",
            AppError::FinchNotConnected => "finch_not_connected",
            AppError::SyncInProgress => "sync_in_progress",
            AppError::InvalidSignature => "invalid_signature",
            AppError::InvalidResetToken => "invalid_reset_token",
            AppError::Upstream(_) => "upstream_error",
        }
    }

    /// Message shown to clients. Internal details never leave the process.
    fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            AppError::Upstream(_) => "A partner service is unavailable".to_string(),
            AppError::InvalidRequest(msg) | AppError::Conflict(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Unique violations surface as 409 instead of a 500.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return AppError::Conflict("Record already exists".to_string());
            }
        }
        AppError::Database(err)
    }
}

/// Renders `{"error": {"code": "...", "message": "..."}}`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::Database(_) | AppError::Internal(_) | AppError::Upstream(_) => {
                tracing::error!(error = %self, "request failed");
            }
            AppError::Unauthorized | AppError::InvalidCredentials | AppError::InvalidSignature => {
                tracing::warn!(code = self.code(), "authentication rejected");
            }
            _ => {}
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.public_message()
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes_are_entity_specific() {
        let err = AppError::NotFound(Entity::PlaidAccount);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "plaid_account_not_found");
        assert_eq!(err.to_string(), "Plaid account not found");
    }

    #[test]
    fn ledger_errors_are_unprocessable() {
        for err in [
            AppError::InsufficientBalance,
            AppError::AccountNotLinked,
            AppError::FinchNotConnected,
        ] {
            assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = AppError::Internal("pool exhausted at 10.0.0.3".to_string());
        assert_eq!(err.public_message(), "An internal error occurred");
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn validation_message_names_the_field() {
        let err = AppError::validation("email", "must be a valid email address");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "email: must be a valid email address");
    }

    #[test]
    fn upstream_errors_map_to_bad_gateway() {
        let err = AppError::from(ClientError::Status {
            service: "plaid",
            status: 400,
            body: "INVALID_PUBLIC_TOKEN".to_string(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.public_message(), "A partner service is unavailable");
    }
}
