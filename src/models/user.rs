//! User (employee / individual saver) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{Validate, nullable, optional_non_empty},
};

super::text_enum! {
    UserType {
        Employee => "employee",
        EmployerManager => "employer_manager",
        Individual => "individual",
    }
}

super::text_enum! {
    UserStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

/// Represents a row of the `users` table.
///
/// `deleted_at` marks a soft delete; deleted users keep their ledger history
/// but can no longer log in and free their email for reuse.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    #[sqlx(try_from = "String")]
    pub user_type: UserType,
    #[sqlx(try_from = "String")]
    pub status: UserStatus,
    pub employer_id: Option<Uuid>,
    pub finch_individual_id: Option<String>,
    pub dwolla_customer_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn can_log_in(&self) -> bool {
        self.deleted_at.is_none() && self.status == UserStatus::Active
    }
}

/// Column list matching [`User`], for `query_as` statements.
pub const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone, user_type, \
     status, employer_id, finch_individual_id, dwolla_customer_url, created_at, updated_at, deleted_at";

/// Partial update. Fields outside a principal's reach are rejected by the controller.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// `null` clears the number
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    /// Admin only
    pub status: Option<UserStatus>,
    /// Admin only
    pub user_type: Option<UserType>,
    /// Admin only
    pub employer_id: Option<Uuid>,
}

impl UpdateUserRequest {
    pub fn touches_admin_fields(&self) -> bool {
        self.status.is_some() || self.user_type.is_some() || self.employer_id.is_some()
    }

    pub fn phone_over(&self, current: Option<&str>) -> Option<String> {
        match &self.phone {
            Some(phone) => phone.as_deref().map(str::trim).map(str::to_string),
            None => current.map(str::to_string),
        }
    }
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), AppError> {
        optional_non_empty("first_name", self.first_name.as_deref(), 100)?;
        optional_non_empty("last_name", self.last_name.as_deref(), 100)?;
        if let Some(Some(phone)) = &self.phone {
            let digits = phone.chars().filter(char::is_ascii_digit).count();
            if !(10..=15).contains(&digits) {
                return Err(AppError::validation("phone", "must contain 10 to 15 digits"));
            }
        }
        Ok(())
    }
}

/// Filters for `GET /v1/user/list`.
#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub employer_id: Option<Uuid>,
    /// Case-insensitive match on name or email
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// User as returned to clients; never includes the password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub user_type: UserType,
    pub status: UserStatus,
    pub employer_id: Option<Uuid>,
    pub bank_transfers_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            user_type: user.user_type,
            status: user.status,
            employer_id: user.employer_id,
            bank_transfers_enabled: user.dwolla_customer_url.is_some(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_patch_distinguishes_absent_from_null() {
        let stored = Some("555-010-0100");

        let absent: UpdateUserRequest = serde_json::from_str(r#"{"first_name":"Jane"}"#).unwrap();
        assert_eq!(absent.phone_over(stored).as_deref(), stored);

        let cleared: UpdateUserRequest = serde_json::from_str(r#"{"phone":null}"#).unwrap();
        assert!(cleared.validate().is_ok());
        assert_eq!(cleared.phone_over(stored), None);

        let replaced: UpdateUserRequest =
            serde_json::from_str(r#"{"phone":" 555-010-0199 "}"#).unwrap();
        assert!(replaced.validate().is_ok());
        assert_eq!(replaced.phone_over(stored).as_deref(), Some("555-010-0199"));
    }

    #[test]
    fn short_phone_is_rejected() {
        let request: UpdateUserRequest = serde_json::from_str(r#"{"phone":"12345"}"#).unwrap();
        assert!(request.validate().is_err());
    }
}
