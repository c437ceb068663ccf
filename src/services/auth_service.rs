//! Passwords, session tokens and sign-in flows.
//!
//! Passwords are hashed with Argon2. Session tokens are 32 random bytes,
//! hex-encoded for the client and stored as their SHA-256 hex digest.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, Entity},
    middleware::auth::{AuthContext, Principal},
    models::{
        account::{SignupRequest, TokenResponse},
        admin::Admin,
        credit_wallet::WalletType,
        session::{Role, Session},
        user::{USER_COLUMNS, User, UserType},
    },
    services::wallet_service,
    validation::normalize_email,
};

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| AppError::Internal(format!("salt encoding failed: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// False for a wrong password and for unparseable stored hashes alike.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Lifetime of a forgot-password token.
pub const RESET_TOKEN_TTL_HOURS: i64 = 2;
/// Lifetime of the claim token in a roster invite.
pub const CLAIM_TOKEN_TTL_HOURS: i64 = 14 * 24;

/// Password nobody knows, for accounts created by the roster sync.
pub fn unusable_password_hash() -> Result<String, AppError> {
    hash_password(&generate_token())
}

/// 32 random bytes as 64 hex characters.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a session and return the raw token; only its hash is persisted.
pub async fn issue_session(
    conn: &mut PgConnection,
    role: Role,
    subject_id: Uuid,
    ttl_hours: i64,
) -> Result<TokenResponse, AppError> {
    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    sqlx::query(
        "INSERT INTO sessions (token_hash, subject_id, role, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(hash_token(&token))
    .bind(subject_id)
    .bind(role.as_str())
    .bind(expires_at)
    .execute(conn)
    .await?;

    Ok(TokenResponse {
        token,
        role,
        header: role.header(),
        expires_at,
    })
}

/// Resolve a presented token into the caller.
///
/// # Errors
///
/// `Unauthorized` when the session is unknown, expired, revoked, issued for a
/// different role, or its subject can no longer log in.
pub async fn authenticate(pool: &DbPool, role: Role, token: &str) -> Result<AuthContext, AppError> {
    let session = sqlx::query_as::<_, Session>(
        "SELECT id, token_hash, subject_id, role, expires_at, revoked_at, created_at
         FROM sessions
         WHERE token_hash = $1",
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    if !session.is_live(Utc::now()) || session.role != role {
        return Err(AppError::Unauthorized);
    }

    let principal = match role {
        Role::Admin => {
            let active: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM admins WHERE id = $1 AND deleted_at IS NULL)",
            )
            .bind(session.subject_id)
            .fetch_one(pool)
            .await?;
            if !active {
                return Err(AppError::Unauthorized);
            }
            Principal::Admin {
                admin_id: session.subject_id,
            }
        }
        Role::User | Role::Employer => {
            let user = find_user(pool, session.subject_id)
                .await?
                .filter(User::can_log_in)
                .ok_or(AppError::Unauthorized)?;
            principal_for_user(&user, role)?
        }
    };

    Ok(AuthContext {
        session_id: session.id,
        principal,
    })
}

fn principal_for_user(user: &User, role: Role) -> Result<Principal, AppError> {
    match (role, user.user_type, user.employer_id) {
        (Role::Employer, UserType::EmployerManager, Some(employer_id)) => Ok(Principal::Employer {
            user_id: user.id,
            employer_id,
        }),
        (Role::Employer, _, _) => Err(AppError::Unauthorized),
        _ => Ok(Principal::User {
            user_id: user.id,
            employer_id: user.employer_id,
        }),
    }
}

/// Session role a user receives at login.
pub fn login_role(user: &User) -> Role {
    if user.user_type == UserType::EmployerManager && user.employer_id.is_some() {
        Role::Employer
    } else {
        Role::User
    }
}

pub async fn find_user(pool: &DbPool, user_id: Uuid) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Register a saver, optionally under an employer's invite code.
///
/// The user row, their PLATFORM wallet (and EMPLOYER wallet when joining an
/// employer) and the first session are created in one transaction.
pub async fn signup(
    pool: &DbPool,
    request: SignupRequest,
    ttl_hours: i64,
) -> Result<(User, TokenResponse), AppError> {
    let email = normalize_email(&request.email);

    let employer_id: Option<Uuid> = match request.invite_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Some(
            sqlx::query_scalar(
                "SELECT id FROM employers
                 WHERE invite_code = $1 AND status = 'active' AND deleted_at IS NULL",
            )
            .bind(code.to_uppercase())
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::validation("invite_code", "is not valid"))?,
        ),
        _ => None,
    };

    let password_hash = hash_password(&request.password)?;
    let user_type = if employer_id.is_some() {
        UserType::Employee
    } else {
        UserType::Individual
    };

    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (email, password_hash, first_name, last_name, user_type, employer_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(&email)
    .bind(password_hash)
    .bind(request.first_name.trim())
    .bind(request.last_name.trim())
    .bind(user_type.as_str())
    .bind(employer_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict("Email is already registered".to_string()),
        other => other,
    })?;

    wallet_service::ensure_wallet(&mut tx, user.id, WalletType::Platform).await?;
    if employer_id.is_some() {
        wallet_service::ensure_wallet(&mut tx, user.id, WalletType::Employer).await?;
    }

    let session = issue_session(&mut tx, Role::User, user.id, ttl_hours).await?;

    tx.commit().await?;

    tracing::info!(user_id = %user.id, employer_id = ?employer_id, "user signed up");
    Ok((user, session))
}

/// Password login for savers and employer managers.
pub async fn login_user(
    pool: &DbPool,
    email: &str,
    password: &str,
    ttl_hours: i64,
) -> Result<TokenResponse, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
    ))
    .bind(normalize_email(email))
    .fetch_optional(pool)
    .await?
    .filter(|user| verify_password(password, &user.password_hash))
    .filter(User::can_log_in)
    .ok_or(AppError::InvalidCredentials)?;

    let mut conn = pool.acquire().await?;
    issue_session(&mut conn, login_role(&user), user.id, ttl_hours).await
}

pub async fn login_admin(
    pool: &DbPool,
    email: &str,
    password: &str,
    ttl_hours: i64,
) -> Result<TokenResponse, AppError> {
    let admin = sqlx::query_as::<_, Admin>(
        "SELECT id, email, password_hash, name, created_at, deleted_at
         FROM admins
         WHERE email = $1 AND deleted_at IS NULL",
    )
    .bind(normalize_email(email))
    .fetch_optional(pool)
    .await?
    .filter(|admin| verify_password(password, &admin.password_hash))
    .ok_or(AppError::InvalidCredentials)?;

    let mut conn = pool.acquire().await?;
    issue_session(&mut conn, Role::Admin, admin.id, ttl_hours).await
}

pub async fn revoke_session(pool: &DbPool, session_id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL")
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Change a password and revoke every other session of the subject.
pub async fn change_password(
    pool: &DbPool,
    context: &AuthContext,
    current_password: &str,
    new_password: &str,
) -> Result<(), AppError> {
    let (table, subject_id) = match context.principal {
        Principal::Admin { admin_id } => ("admins", admin_id),
        Principal::User { user_id, .. } | Principal::Employer { user_id, .. } => {
            ("users", user_id)
        }
    };

    let stored: String = sqlx::query_scalar(&format!(
        "SELECT password_hash FROM {table} WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(subject_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound(if table == "admins" {
        Entity::Admin
    } else {
        Entity::User
    }))?;

    if !verify_password(current_password, &stored) {
        return Err(AppError::InvalidCredentials);
    }

    let new_hash = hash_password(new_password)?;
    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        "UPDATE {table} SET password_hash = $1 WHERE id = $2"
    ))
    .bind(new_hash)
    .bind(subject_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE sessions SET revoked_at = NOW()
         WHERE subject_id = $1 AND id <> $2 AND revoked_at IS NULL",
    )
    .bind(subject_id)
    .bind(context.session_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Store a single-use reset token for the user and return the raw token.
pub async fn issue_password_reset(
    conn: &mut PgConnection,
    user_id: Uuid,
    ttl_hours: i64,
) -> Result<String, AppError> {
    let token = generate_token();
    sqlx::query(
        "INSERT INTO password_resets (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(Utc::now() + Duration::hours(ttl_hours))
    .execute(conn)
    .await?;
    Ok(token)
}

/// Start a forgot-password flow.
///
/// Returns the user and a fresh token, or `None` when no active account
/// has that email. Callers answer the same way in both cases.
pub async fn request_password_reset(
    pool: &DbPool,
    email: &str,
) -> Result<Option<(User, String)>, AppError> {
    let Some(user) = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
    ))
    .bind(normalize_email(email))
    .fetch_optional(pool)
    .await?
    .filter(User::can_log_in) else {
        return Ok(None);
    };

    let mut conn = pool.acquire().await?;
    let token = issue_password_reset(&mut conn, user.id, RESET_TOKEN_TTL_HOURS).await?;
    tracing::info!(user_id = %user.id, "password reset requested");
    Ok(Some((user, token)))
}

/// Redeem a reset or claim token: set the password, burn every outstanding
/// token of the user and revoke their sessions.
pub async fn reset_password(
    pool: &DbPool,
    token: &str,
    new_password: &str,
) -> Result<Uuid, AppError> {
    let new_hash = hash_password(new_password)?;
    let mut tx = pool.begin().await?;

    let user_id: Uuid = sqlx::query_scalar(
        "UPDATE password_resets SET used_at = NOW()
         WHERE token_hash = $1 AND used_at IS NULL AND expires_at > NOW()
         RETURNING user_id",
    )
    .bind(hash_token(token))
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::InvalidResetToken)?;

    let updated = sqlx::query(
        "UPDATE users SET password_hash = $1, updated_at = NOW()
         WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(new_hash)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::InvalidResetToken);
    }

    sqlx::query(
        "UPDATE password_resets SET used_at = NOW() WHERE user_id = $1 AND used_at IS NULL",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE sessions SET revoked_at = NOW()
         WHERE subject_id = $1 AND role <> 'admin' AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(%user_id, "password reset completed");
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserStatus;

    fn user(user_type: UserType, employer_id: Option<Uuid>) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "ana@acme.com".to_string(),
            password_hash: String::new(),
            first_name: "Ana".to_string(),
            last_name: "Ruiz".to_string(),
            phone: None,
            user_type,
            status: UserStatus::Active,
            employer_id,
            finch_individual_id: None,
            dwolla_customer_url: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong horse battery", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn tokens_are_random_hex_and_hash_stably() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn managers_log_in_as_employer() {
        let employer_id = Uuid::new_v4();
        assert_eq!(
            login_role(&user(UserType::EmployerManager, Some(employer_id))),
            Role::Employer
        );
        assert_eq!(login_role(&user(UserType::EmployerManager, None)), Role::User);
        assert_eq!(login_role(&user(UserType::Employee, Some(employer_id))), Role::User);
    }

    #[test]
    fn employer_sessions_require_a_manager() {
        let employer_id = Uuid::new_v4();
        let manager = user(UserType::EmployerManager, Some(employer_id));
        assert_eq!(
            principal_for_user(&manager, Role::Employer).unwrap(),
            Principal::Employer {
                user_id: manager.id,
                employer_id
            }
        );

        let employee = user(UserType::Employee, Some(employer_id));
        assert!(principal_for_user(&employee, Role::Employer).is_err());
        assert_eq!(
            principal_for_user(&employee, Role::User).unwrap(),
            Principal::User {
                user_id: employee.id,
                employer_id: Some(employer_id)
            }
        );
    }

    #[tokio::test]
    async fn reset_token_works_once_and_ends_old_sessions() {
        let Some(pool) = crate::db::testing::scratch_pool().await else {
            return;
        };
        let signup_request = SignupRequest {
            email: "Ana@Example.com".to_string(),
            password: "first long password".to_string(),
            first_name: "Ana".to_string(),
            last_name: "Ruiz".to_string(),
            invite_code: None,
        };
        let (user, session) = signup(&pool, signup_request, 1).await.unwrap();

        assert!(request_password_reset(&pool, "nobody@example.com").await.unwrap().is_none());
        let (found, token) = request_password_reset(&pool, "ana@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);

        assert_eq!(reset_password(&pool, &token, "second long password").await.unwrap(), user.id);
        assert!(authenticate(&pool, Role::User, &session.token).await.is_err());
        assert!(login_user(&pool, "ana@example.com", "first long password", 1).await.is_err());
        assert!(login_user(&pool, "ana@example.com", "second long password", 1).await.is_ok());

        let err = reset_password(&pool, &token, "third long password").await.unwrap_err();
        assert_eq!(err.code(), "invalid_reset_token");
    }
}
