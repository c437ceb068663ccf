//! Homebuying partners: real estate agents, lenders and closing agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{
        Validate, optional_non_empty, require_email, require_http_url, require_non_empty,
        require_state_code,
    },
};

super::text_enum! {
    PartnerKind {
        Agent => "agent",
        Lender => "lender",
        Closer => "closer",
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Partner {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: PartnerKind,
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Used for both create and update; update treats absent fields as unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct PartnerRequest {
    pub kind: Option<PartnerKind>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub state: Option<String>,
}

impl Validate for PartnerRequest {
    fn validate(&self) -> Result<(), AppError> {
        optional_non_empty("name", self.name.as_deref(), 200)?;
        optional_non_empty("company", self.company.as_deref(), 200)?;
        if let Some(email) = &self.email {
            require_email("email", email)?;
        }
        if let Some(website) = &self.website {
            require_http_url("website", website)?;
        }
        if let Some(state) = &self.state {
            require_state_code("state", state)?;
        }
        Ok(())
    }
}

impl PartnerRequest {
    /// Create needs the fields update may omit.
    pub fn require_complete(&self) -> Result<(PartnerKind, &str), AppError> {
        let kind = self
            .kind
            .ok_or_else(|| AppError::validation("kind", "is required"))?;
        let name = self.name.as_deref().unwrap_or_default();
        require_non_empty("name", name, 200)?;
        Ok((kind, name))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PartnerListQuery {
    pub kind: Option<PartnerKind>,
    pub state: Option<String>,
}
