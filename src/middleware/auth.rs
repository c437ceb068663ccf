//! Session authentication middleware.
//!
//! Every protected request carries a session token in exactly one role
//! header (`jwt-admin`, `jwt-employer` or `jwt-user`). The middleware:
//! 1. Picks the first present header in that order
//! 2. Hashes the token and loads the live session
//! 3. Checks the session was issued for that role
//! 4. Injects an [`AuthContext`] for the controllers to dispatch on

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{db::DbPool, error::AppError, models::session::Role, services::auth_service};

/// The authenticated caller, as controllers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Admin {
        admin_id: Uuid,
    },
    User {
        user_id: Uuid,
        employer_id: Option<Uuid>,
    },
    /// An employer manager acting for their employer
    Employer {
        user_id: Uuid,
        employer_id: Uuid,
    },
}

impl Principal {
    pub fn role(&self) -> Role {
        match self {
            Principal::Admin { .. } => Role::Admin,
            Principal::User { .. } => Role::User,
            Principal::Employer { .. } => Role::Employer,
        }
    }

    /// The admin's id, or `Forbidden`.
    pub fn require_admin(&self) -> Result<Uuid, AppError> {
        match *self {
            Principal::Admin { admin_id } => Ok(admin_id),
            _ => Err(AppError::Forbidden),
        }
    }

    /// The saver's user id, or `Forbidden` for admins and employers.
    pub fn require_user(&self) -> Result<Uuid, AppError> {
        match *self {
            Principal::User { user_id, .. } => Ok(user_id),
            _ => Err(AppError::Forbidden),
        }
    }
}

/// Authentication context attached to authenticated requests.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Session that authenticated the request; logout revokes it
    pub session_id: Uuid,
    pub principal: Principal,
}

/// Find the role header to authenticate with.
///
/// Accepts a bare token or `Bearer <token>`. Empty values count as absent.
pub fn extract_token(headers: &HeaderMap) -> Option<(Role, &str)> {
    Role::PRECEDENCE.iter().find_map(|role| {
        let raw = headers.get(role.header())?.to_str().ok()?.trim();
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        (!token.is_empty()).then_some((*role, token))
    })
}

pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (role, token) = extract_token(request.headers()).ok_or(AppError::Unauthorized)?;

    let context = auth_service::authenticate(&pool, role, token).await?;
    tracing::debug!(role = %role, session_id = %context.session_id, "request authenticated");

    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn no_role_header_means_anonymous() {
        assert_eq!(extract_token(&headers(&[("authorization", "Bearer abc")])), None);
    }

    #[test]
    fn admin_header_wins() {
        let map = headers(&[("jwt-user", "user-token"), ("jwt-admin", "admin-token")]);
        assert_eq!(extract_token(&map), Some((Role::Admin, "admin-token")));
    }

    #[test]
    fn employer_before_user() {
        let map = headers(&[("jwt-user", "u"), ("jwt-employer", "e")]);
        assert_eq!(extract_token(&map), Some((Role::Employer, "e")));
    }

    #[test]
    fn bearer_prefix_is_optional() {
        let map = headers(&[("jwt-user", "Bearer abc123")]);
        assert_eq!(extract_token(&map), Some((Role::User, "abc123")));
    }

    #[test]
    fn blank_header_falls_through() {
        let map = headers(&[("jwt-admin", "  "), ("jwt-user", "u")]);
        assert_eq!(extract_token(&map), Some((Role::User, "u")));
    }

    #[test]
    fn principal_reports_role() {
        let employer = Principal::Employer {
            user_id: Uuid::new_v4(),
            employer_id: Uuid::new_v4(),
        };
        assert_eq!(employer.role(), Role::Employer);
    }
}
