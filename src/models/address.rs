//! A user's current mailing address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{
        Validate, optional_non_empty, require_non_empty, require_postal_code, require_state_code,
    },
};

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertAddressRequest {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Validate for UpsertAddressRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("line1", &self.line1, 200)?;
        optional_non_empty("line2", self.line2.as_deref(), 200)?;
        require_non_empty("city", &self.city, 100)?;
        require_state_code("state", &self.state)?;
        require_postal_code("postal_code", &self.postal_code)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AddressQuery {
    pub user_id: Option<Uuid>,
}
