//! Login sessions.
//!
//! The raw token is handed to the client once; only its SHA-256 hash is stored.

use chrono::{DateTime, Utc};
use uuid::Uuid;

super::text_enum! {
    /// Which kind of principal a session authenticates, and which header carries it.
    Role {
        Admin => "admin",
        User => "user",
        Employer => "employer",
    }
}

impl Role {
    /// Request header that carries a token for this role.
    pub fn header(self) -> &'static str {
        match self {
            Role::Admin => "jwt-admin",
            Role::User => "jwt-user",
            Role::Employer => "jwt-employer",
        }
    }

    /// Header lookup order when a request carries more than one.
    pub const PRECEDENCE: [Role; 3] = [Role::Admin, Role::Employer, Role::User];
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub token_hash: String,
    /// `admins.id` for admin sessions, `users.id` otherwise
    pub subject_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_in: Duration, revoked: bool) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            token_hash: "ab".repeat(32),
            subject_id: Uuid::new_v4(),
            role: Role::User,
            expires_at: now + expires_in,
            revoked_at: revoked.then_some(now),
            created_at: now,
        }
    }

    #[test]
    fn live_until_expiry_or_revocation() {
        let now = Utc::now();
        assert!(session(Duration::hours(1), false).is_live(now));
        assert!(!session(Duration::hours(-1), false).is_live(now));
        assert!(!session(Duration::hours(1), true).is_live(now));
    }

    #[test]
    fn headers_match_roles() {
        assert_eq!(Role::Admin.header(), "jwt-admin");
        assert_eq!(Role::Employer.header(), "jwt-employer");
        assert_eq!(Role::User.header(), "jwt-user");
    }
}
