//! Request validation.
//!
//! Request bodies implement [`Validate`]; handlers take [`ValidJson<T>`]
//! instead of `Json<T>` so a payload is rejected with `400 validation_error`
//! before any query runs.

use axum::{
    Json,
    extract::{FromRequest, Request},
};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

use crate::error::AppError;

/// Schema checks for an incoming payload.
pub trait Validate {
    fn validate(&self) -> Result<(), AppError>;
}

/// JSON body that has passed [`Validate::validate`].
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// For `Option<Option<T>>` patch fields: absent stays `None`, `null` becomes
/// `Some(None)`. Pair with `#[serde(default)]`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub fn require_non_empty(field: &'static str, value: &str, max_len: usize) -> Result<(), AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(field, "is required"));
    }
    if trimmed.chars().count() > max_len {
        return Err(AppError::validation(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(())
}

pub fn optional_non_empty(
    field: &'static str,
    value: Option<&str>,
    max_len: usize,
) -> Result<(), AppError> {
    match value {
        Some(value) => require_non_empty(field, value, max_len),
        None => Ok(()),
    }
}

/// Loose structural check: one `@`, non-empty local part, dotted domain.
pub fn require_email(field: &'static str, value: &str) -> Result<(), AppError> {
    let value = value.trim();
    let valid = value.len() <= 254
        && !value.contains(char::is_whitespace)
        && match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };

    if valid {
        Ok(())
    } else {
        Err(AppError::validation(field, "must be a valid email address"))
    }
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn require_password(field: &'static str, value: &str) -> Result<(), AppError> {
    if value.chars().count() < 8 {
        return Err(AppError::validation(field, "must be at least 8 characters"));
    }
    if value.len() > 128 {
        return Err(AppError::validation(field, "must be at most 128 characters"));
    }
    Ok(())
}

pub fn require_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), AppError> {
    if value < min || value > max {
        return Err(AppError::validation(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(())
}

/// Two-letter US state or territory code, upper case.
pub fn require_state_code(field: &'static str, value: &str) -> Result<(), AppError> {
    if value.len() == 2 && value.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(AppError::validation(field, "must be a two-letter state code"))
    }
}

/// `12345` or `12345-6789`.
pub fn require_postal_code(field: &'static str, value: &str) -> Result<(), AppError> {
    let bytes = value.as_bytes();
    let digits = |s: &[u8]| s.iter().all(u8::is_ascii_digit);
    let valid = match bytes.len() {
        5 => digits(bytes),
        10 => digits(&bytes[..5]) && bytes[5] == b'-' && digits(&bytes[6..]),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::validation(field, "must be a 5-digit ZIP or ZIP+4"))
    }
}

pub fn require_http_url(field: &'static str, value: &str) -> Result<(), AppError> {
    if value.len() > 2048 {
        return Err(AppError::validation(field, "must be at most 2048 characters"));
    }
    let parsed =
        url::Url::parse(value).map_err(|_| AppError::validation(field, "must be a valid URL"))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(AppError::validation(field, "must be an http(s) URL")),
    }
}

/// `?page=&limit=` query parameters shared by list endpoints.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;
    /// Keeps `offset()` far from `i64` overflow.
    pub const MAX_PAGE: i64 = 1_000_000;

    /// Page number in `1..=MAX_PAGE`.
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, Self::MAX_PAGE)
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

/// Paged list response.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, pagination: Pagination, total: i64) -> Self {
        Self {
            items,
            page: pagination.page(),
            limit: pagination.limit(),
            total,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total: self.total,
        }
    }
}
