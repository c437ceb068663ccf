//! Educational resources shown to savers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{Validate, optional_non_empty, require_http_url, require_non_empty},
};

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Resource {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub category: String,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    pub title: String,
    pub url: String,
    pub category: String,
    #[serde(default)]
    pub published: bool,
}

impl Validate for CreateResourceRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("title", &self.title, 200)?;
        require_http_url("url", &self.url)?;
        require_non_empty("category", &self.category, 50)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateResourceRequest {
    pub title: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub published: Option<bool>,
}

impl Validate for UpdateResourceRequest {
    fn validate(&self) -> Result<(), AppError> {
        optional_non_empty("title", self.title.as_deref(), 200)?;
        if let Some(url) = &self.url {
            require_http_url("url", url)?;
        }
        optional_non_empty("category", self.category.as_deref(), 50)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourceListQuery {
    pub category: Option<String>,
}
