//! Homebuying questionnaire.

use axum::{
    Extension, Json,
    extract::{Query, State},
};

use crate::{
    error::{AppError, Entity},
    middleware::auth::{AuthContext, Principal},
    models::questionnaire::{Questionnaire, QuestionnaireQuery, SubmitQuestionnaireRequest},
    state::AppState,
    validation::ValidJson,
};

const QUESTIONNAIRE_COLUMNS: &str = "id, user_id, answers, completed, created_at, updated_at";

pub async fn get_questionnaire(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<QuestionnaireQuery>,
) -> Result<Json<Questionnaire>, AppError> {
    let user_id = match auth.principal {
        Principal::User { user_id, .. } => user_id,
        Principal::Admin { .. } => query
            .user_id
            .ok_or_else(|| AppError::validation("user_id", "is required"))?,
        Principal::Employer { .. } => return Err(AppError::Forbidden),
    };

    let questionnaire = sqlx::query_as::<_, Questionnaire>(&format!(
        "SELECT {QUESTIONNAIRE_COLUMNS} FROM questionnaires WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Questionnaire))?;

    Ok(Json(questionnaire))
}

/// Replace the answers. Once `completed`, a later partial save keeps the flag.
pub async fn submit_questionnaire(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<SubmitQuestionnaireRequest>,
) -> Result<Json<Questionnaire>, AppError> {
    let user_id = auth.principal.require_user()?;

    let questionnaire = sqlx::query_as::<_, Questionnaire>(&format!(
        r#"
        INSERT INTO questionnaires (user_id, answers, completed)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE
        SET answers = EXCLUDED.answers,
            completed = questionnaires.completed OR EXCLUDED.completed,
            updated_at = NOW()
        RETURNING {QUESTIONNAIRE_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&request.answers)
    .bind(request.completed)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(questionnaire))
}
