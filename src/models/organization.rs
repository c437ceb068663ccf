//! Organizations: tenants that group employers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{Validate, optional_non_empty, require_non_empty},
};

super::text_enum! {
    OrganizationStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub status: OrganizationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
}

impl Validate for CreateOrganizationRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("name", &self.name, 200)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub status: Option<OrganizationStatus>,
}

impl Validate for UpdateOrganizationRequest {
    fn validate(&self) -> Result<(), AppError> {
        optional_non_empty("name", self.name.as_deref(), 200)
    }
}
