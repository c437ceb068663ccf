//! Signup, login and password payloads.

use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    models::{session::Role, user::UserResponse},
    validation::{Validate, require_email, require_non_empty, require_password},
};

/// Request body for `POST /v1/account/signup`.
///
/// ```json
/// {
///   "email": "jane@acme.com",
///   "password": "correct horse",
///   "first_name": "Jane",
///   "last_name": "Doe",
///   "invite_code": "7F3K9Q2M"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    /// Employer invite code; joins the employer's benefit when it matches.
    pub invite_code: Option<String>,
}

impl Validate for SignupRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_email("email", &self.email)?;
        require_password("password", &self.password)?;
        require_non_empty("first_name", &self.first_name, 100)?;
        require_non_empty("last_name", &self.last_name, 100)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_email("email", &self.email)?;
        require_non_empty("password", &self.password, 128)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl Validate for ChangePasswordRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("current_password", &self.current_password, 128)?;
        require_password("new_password", &self.new_password)?;
        if self.current_password == self.new_password {
            return Err(AppError::validation(
                "new_password",
                "must differ from the current password",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

impl Validate for ForgotPasswordRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_email("email", &self.email)
    }
}

/// Body for `POST /v1/account/reset-password`; `token` comes from the emailed link.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

impl Validate for ResetPasswordRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("token", &self.token, 128)?;
        require_password("new_password", &self.new_password)?;
        Ok(())
    }
}

/// Issued token. `header` tells the client which header to send it in.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub role: Role,
    pub header: &'static str,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    #[serde(flatten)]
    pub session: TokenResponse,
    pub user: UserResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup() -> SignupRequest {
        SignupRequest {
            email: "jane@acme.com".to_string(),
            password: "correct horse".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            invite_code: None,
        }
    }

    #[test]
    fn signup_validates_fields_in_order() {
        assert!(signup().validate().is_ok());

        let bad_email = SignupRequest {
            email: "nope".to_string(),
            ..signup()
        };
        assert_eq!(bad_email.validate().unwrap_err().code(), "validation_error");

        let blank_name = SignupRequest {
            last_name: " ".to_string(),
            ..signup()
        };
        assert_eq!(
            blank_name.validate().unwrap_err().to_string(),
            "last_name: is required"
        );
    }

    #[test]
    fn reset_needs_a_token_and_a_real_password() {
        let blank = ResetPasswordRequest {
            token: "  ".to_string(),
            new_password: "long enough".to_string(),
        };
        assert_eq!(blank.validate().unwrap_err().to_string(), "token: is required");

        let short = ResetPasswordRequest {
            token: "abc".to_string(),
            new_password: "short".to_string(),
        };
        assert!(short.validate().unwrap_err().to_string().starts_with("new_password"));
    }

    #[test]
    fn new_password_must_change() {
        let same = ChangePasswordRequest {
            current_password: "password123".to_string(),
            new_password: "password123".to_string(),
        };
        assert!(same.validate().is_err());
    }
}
