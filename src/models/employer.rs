//! Employers enrolled in the benefit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{Validate, optional_non_empty, require_non_empty},
};

super::text_enum! {
    EmployerStatus {
        Pending => "pending",
        Active => "active",
        Inactive => "inactive",
    }
}

/// Represents a row of the `employers` table.
///
/// `finch_access_token` is a credential and never leaves the server;
/// responses only say whether a connection exists.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Employer {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub ein: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: EmployerStatus,
    pub invite_code: String,
    pub finch_access_token: Option<String>,
    pub finch_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub const EMPLOYER_COLUMNS: &str = "id, organization_id, name, ein, status, invite_code, \
     finch_access_token, finch_connected_at, created_at, updated_at, deleted_at";

/// Nine digits, optionally written `12-3456789`.
fn validate_ein(ein: &str) -> Result<(), AppError> {
    let digits: String = ein.chars().filter(|c| *c != '-').collect();
    if digits.len() == 9 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AppError::validation("ein", "must be a 9-digit EIN"))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployerRequest {
    pub organization_id: Uuid,
    pub name: String,
    pub ein: Option<String>,
    #[serde(default)]
    pub status: Option<EmployerStatus>,
}

impl Validate for CreateEmployerRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("name", &self.name, 200)?;
        if let Some(ein) = &self.ein {
            validate_ein(ein)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEmployerRequest {
    pub name: Option<String>,
    /// Admin only
    pub ein: Option<String>,
    /// Admin only
    pub status: Option<EmployerStatus>,
}

impl UpdateEmployerRequest {
    pub fn touches_admin_fields(&self) -> bool {
        self.ein.is_some() || self.status.is_some()
    }
}

impl Validate for UpdateEmployerRequest {
    fn validate(&self) -> Result<(), AppError> {
        optional_non_empty("name", self.name.as_deref(), 200)?;
        if let Some(ein) = &self.ein {
            validate_ein(ein)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectFinchRequest {
    pub access_token: String,
}

impl Validate for ConnectFinchRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("access_token", &self.access_token, 512)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EmployerListQuery {
    pub organization_id: Option<Uuid>,
    pub status: Option<EmployerStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EmployerResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub ein: Option<String>,
    pub status: EmployerStatus,
    pub invite_code: String,
    pub finch_connected: bool,
    pub finch_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Employer> for EmployerResponse {
    fn from(employer: Employer) -> Self {
        Self {
            id: employer.id,
            organization_id: employer.organization_id,
            name: employer.name,
            ein: employer.ein,
            status: employer.status,
            invite_code: employer.invite_code,
            finch_connected: employer.finch_access_token.is_some(),
            finch_connected_at: employer.finch_connected_at,
            created_at: employer.created_at,
            updated_at: employer.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ein_accepts_dashed_and_plain() {
        assert!(validate_ein("12-3456789").is_ok());
        assert!(validate_ein("123456789").is_ok());
        assert!(validate_ein("12-34567").is_err());
        assert!(validate_ein("12-34567AB").is_err());
    }

    #[test]
    fn response_hides_finch_token() {
        let now = Utc::now();
        let employer = Employer {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "Acme".to_string(),
            ein: None,
            status: EmployerStatus::Active,
            invite_code: "7F3K9Q2M".to_string(),
            finch_access_token: Some("finch-secret".to_string()),
            finch_connected_at: Some(now),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let json = serde_json::to_value(EmployerResponse::from(employer)).unwrap();
        assert_eq!(json["finch_connected"], true);
        assert!(!json.to_string().contains("finch-secret"));
    }
}
