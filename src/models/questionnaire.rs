//! Homebuying readiness questionnaire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, validation::Validate};

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Questionnaire {
    pub id: Uuid,
    pub user_id: Uuid,
    pub answers: serde_json::Value,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Answers are free-form keyed JSON; the client owns the question set.
#[derive(Debug, Deserialize)]
pub struct SubmitQuestionnaireRequest {
    pub answers: serde_json::Value,
    #[serde(default)]
    pub completed: bool,
}

impl Validate for SubmitQuestionnaireRequest {
    fn validate(&self) -> Result<(), AppError> {
        let Some(answers) = self.answers.as_object() else {
            return Err(AppError::validation("answers", "must be an object"));
        };
        if answers.len() > 200 {
            return Err(AppError::validation("answers", "has too many entries"));
        }
        if self.answers.to_string().len() > 64 * 1024 {
            return Err(AppError::validation("answers", "is too large"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct QuestionnaireQuery {
    pub user_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answers_must_be_an_object() {
        let list = SubmitQuestionnaireRequest {
            answers: json!(["yes", "no"]),
            completed: false,
        };
        assert!(list.validate().is_err());

        let map = SubmitQuestionnaireRequest {
            answers: json!({ "first_time_buyer": true, "target_price": 350000 }),
            completed: true,
        };
        assert!(map.validate().is_ok());
    }
}
