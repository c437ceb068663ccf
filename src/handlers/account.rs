//! Account endpoints: signup, logins, logout and the caller's profile.
//!
//! - POST /v1/account/signup - Register a saver (public)
//! - POST /v1/account/login - Saver or employer-manager login (public)
//! - POST /v1/account/admin-login - Admin login (public)
//! - POST /v1/account/logout - Revoke the presented session
//! - GET /v1/account/me - Profile of whoever the session belongs to
//! - POST /v1/account/change-password - Change password, revoking other sessions
//! - POST /v1/account/forgot-password - Email a reset link (public)
//! - POST /v1/account/reset-password - Redeem a reset or invite token (public)

use axum::{Extension, Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::{
    error::{AppError, Entity},
    jobs::Job,
    mailer::{Template, reset_link},
    middleware::auth::{AuthContext, Principal},
    models::{
        account::{
            ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest,
            SignupRequest, SignupResponse, TokenResponse,
        },
        admin::{Admin, AdminResponse},
        employer::{EMPLOYER_COLUMNS, Employer, EmployerResponse},
        user::UserResponse,
    },
    services::auth_service,
    state::AppState,
    validation::ValidJson,
};

/// Register a new saver.
///
/// # Request Body
///
/// ```json
/// {
///   "email": "jane@acme.com",
///   "password": "correct horse",
///   "first_name": "Jane",
///   "last_name": "Doe",
///   "invite_code": "ACME7K2Q"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: session token plus the new user
/// - **400**: validation error, or an unknown invite code
/// - **409**: email already registered
pub async fn signup(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    let (user, session) =
        auth_service::signup(&state.pool, request, state.config.session_ttl_hours).await?;

    let welcome = Template::Welcome {
        first_name: user.first_name.clone(),
    };
    state.jobs.enqueue(Job::SendEmail(
        welcome.render(&state.config.mail_from, &user.email),
    ));

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            session,
            user: user.into(),
        }),
    ))
}

/// Log in a saver or employer manager.
///
/// The returned `header` names the header to send the token in
/// (`jwt-user` or `jwt-employer`).
pub async fn login(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let session = auth_service::login_user(
        &state.pool,
        &request.email,
        &request.password,
        state.config.session_ttl_hours,
    )
    .await?;
    Ok(Json(session))
}

pub async fn admin_login(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let session = auth_service::login_admin(
        &state.pool,
        &request.email,
        &request.password,
        state.config.session_ttl_hours,
    )
    .await?;
    Ok(Json(session))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    auth_service::revoke_session(&state.pool, auth.session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's profile, shaped by role.
#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MeResponse {
    Admin {
        admin: AdminResponse,
    },
    User {
        user: UserResponse,
    },
    Employer {
        user: UserResponse,
        employer: EmployerResponse,
    },
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MeResponse>, AppError> {
    let response = match auth.principal {
        Principal::Admin { admin_id } => {
            let admin = sqlx::query_as::<_, Admin>(
                "SELECT id, email, password_hash, name, created_at, deleted_at
                 FROM admins WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(admin_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Admin))?;
            MeResponse::Admin {
                admin: admin.into(),
            }
        }
        Principal::User { user_id, .. } => {
            let user = auth_service::find_user(&state.pool, user_id)
                .await?
                .ok_or(AppError::NotFound(Entity::User))?;
            MeResponse::User { user: user.into() }
        }
        Principal::Employer {
            user_id,
            employer_id,
        } => {
            let user = auth_service::find_user(&state.pool, user_id)
                .await?
                .ok_or(AppError::NotFound(Entity::User))?;
            let employer = sqlx::query_as::<_, Employer>(&format!(
                "SELECT {EMPLOYER_COLUMNS} FROM employers WHERE id = $1 AND deleted_at IS NULL"
            ))
            .bind(employer_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Employer))?;
            MeResponse::Employer {
                user: user.into(),
                employer: employer.into(),
            }
        }
    };

    Ok(Json(response))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<ChangePasswordRequest>,
) -> Result<StatusCode, AppError> {
    auth_service::change_password(
        &state.pool,
        &auth,
        &request.current_password,
        &request.new_password,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Always 202, whether or not the email belongs to an account.
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<ForgotPasswordRequest>,
) -> Result<StatusCode, AppError> {
    if let Some((user, token)) =
        auth_service::request_password_reset(&state.pool, &request.email).await?
    {
        let template = Template::PasswordReset {
            first_name: user.first_name,
            reset_url: reset_link(&state.config.app_base_url, &token),
        };
        state.jobs.enqueue(Job::SendEmail(
            template.render(&state.config.mail_from, &user.email),
        ));
    }
    Ok(StatusCode::ACCEPTED)
}

/// Set a new password from an emailed token. Roster-created employees claim
/// their account this way. Existing sessions are revoked; log in afterwards.
///
/// - **204 No Content**: password set
/// - **400 `invalid_reset_token`**: unknown, used or expired token
pub async fn reset_password(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<ResetPasswordRequest>,
) -> Result<StatusCode, AppError> {
    auth_service::reset_password(&state.pool, request.token.trim(), &request.new_password).await?;
    Ok(StatusCode::NO_CONTENT)
}
