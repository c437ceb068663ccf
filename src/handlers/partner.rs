//! Partner directory: agents, lenders and closers.
//!
//! Admins maintain the directory; every signed-in principal can browse it.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::{AppError, Entity},
    middleware::auth::AuthContext,
    models::partner::{Partner, PartnerListQuery, PartnerRequest},
    state::AppState,
    validation::{ValidJson, normalize_email},
};

const PARTNER_COLUMNS: &str =
    "id, kind, name, company, email, phone, website, state, created_at, updated_at, deleted_at";

pub async fn create_partner(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<PartnerRequest>,
) -> Result<(StatusCode, Json<Partner>), AppError> {
    auth.principal.require_admin()?;
    let (kind, name) = request.require_complete()?;

    let partner = sqlx::query_as::<_, Partner>(&format!(
        r#"
        INSERT INTO partners (kind, name, company, email, phone, website, state)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {PARTNER_COLUMNS}
        "#
    ))
    .bind(kind.as_str())
    .bind(name.trim())
    .bind(&request.company)
    .bind(request.email.as_deref().map(normalize_email))
    .bind(&request.phone)
    .bind(&request.website)
    .bind(request.state.as_deref().map(str::to_uppercase))
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(partner)))
}

async fn find_partner(state: &AppState, id: Uuid) -> Result<Partner, AppError> {
    sqlx::query_as::<_, Partner>(&format!(
        "SELECT {PARTNER_COLUMNS} FROM partners WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Partner))
}

pub async fn update_partner(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    ValidJson(request): ValidJson<PartnerRequest>,
) -> Result<Json<Partner>, AppError> {
    auth.principal.require_admin()?;
    let current = find_partner(&state, id).await?;

    let partner = sqlx::query_as::<_, Partner>(&format!(
        r#"
        UPDATE partners
        SET kind = $1, name = $2, company = $3, email = $4, phone = $5, website = $6,
            state = $7, updated_at = NOW()
        WHERE id = $8
        RETURNING {PARTNER_COLUMNS}
        "#
    ))
    .bind(request.kind.unwrap_or(current.kind).as_str())
    .bind(request.name.as_deref().map(str::trim).unwrap_or(&current.name))
    .bind(request.company.or(current.company))
    .bind(request.email.as_deref().map(normalize_email).or(current.email))
    .bind(request.phone.or(current.phone))
    .bind(request.website.or(current.website))
    .bind(request.state.as_deref().map(str::to_uppercase).or(current.state))
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(partner))
}

pub async fn delete_partner(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.principal.require_admin()?;

    let result = sqlx::query(
        "UPDATE partners SET deleted_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(Entity::Partner));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/partner/list?kind=lender&state=TX`
pub async fn list_partners(
    State(state): State<AppState>,
    Query(query): Query<PartnerListQuery>,
) -> Result<Json<Vec<Partner>>, AppError> {
    let partners = sqlx::query_as::<_, Partner>(&format!(
        "SELECT {PARTNER_COLUMNS} FROM partners
         WHERE deleted_at IS NULL
           AND ($1::text IS NULL OR kind = $1)
           AND ($2::text IS NULL OR state = $2)
         ORDER BY name"
    ))
    .bind(query.kind.map(|kind| kind.as_str()))
    .bind(query.state.as_deref().map(str::to_uppercase))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(partners))
}

pub async fn get_partner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(find_partner(&state, id).await?))
}
