//! Row-level visibility rules shared by the controllers.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, Entity},
    middleware::auth::Principal,
};

/// Pick the user whose records a request reads or writes.
///
/// - users act on themselves; naming anyone else is forbidden
/// - admins must name a user
/// - employers must name one of their own employees
pub async fn target_user(
    pool: &DbPool,
    principal: &Principal,
    requested: Option<Uuid>,
) -> Result<Uuid, AppError> {
    match (*principal, requested) {
        (Principal::User { user_id, .. }, None) => Ok(user_id),
        (Principal::User { user_id, .. }, Some(requested)) if requested == user_id => Ok(user_id),
        (Principal::User { .. }, Some(_)) => Err(AppError::Forbidden),
        (Principal::Admin { .. }, Some(requested)) => Ok(requested),
        (Principal::Employer { employer_id, .. }, Some(requested)) => {
            ensure_employee_of(pool, requested, employer_id).await?;
            Ok(requested)
        }
        (_, None) => Err(AppError::validation("user_id", "is required")),
    }
}

/// `NotFound(User)` unless the user belongs to the employer.
pub async fn ensure_employee_of(
    pool: &DbPool,
    user_id: Uuid,
    employer_id: Uuid,
) -> Result<(), AppError> {
    let belongs: bool = sqlx::query_scalar(
        "SELECT EXISTS(
            SELECT 1 FROM users WHERE id = $1 AND employer_id = $2 AND deleted_at IS NULL
        )",
    )
    .bind(user_id)
    .bind(employer_id)
    .fetch_one(pool)
    .await?;

    if belongs {
        Ok(())
    } else {
        Err(AppError::NotFound(Entity::User))
    }
}

/// Employer a request acts on: admins name it, employers use their own.
pub fn target_employer(principal: &Principal, requested: Option<Uuid>) -> Result<Uuid, AppError> {
    match (*principal, requested) {
        (Principal::Admin { .. }, Some(employer_id)) => Ok(employer_id),
        (Principal::Admin { .. }, None) => Err(AppError::validation("employer_id", "is required")),
        (Principal::Employer { employer_id, .. }, None) => Ok(employer_id),
        (Principal::Employer { employer_id, .. }, Some(requested)) if requested == employer_id => {
            Ok(employer_id)
        }
        (Principal::Employer { .. }, Some(_)) | (Principal::User { .. }, _) => {
            Err(AppError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> DbPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/ownerific_test")
            .unwrap()
    }

    #[tokio::test]
    async fn users_act_on_themselves() {
        let pool = lazy_pool();
        let user_id = Uuid::new_v4();
        let principal = Principal::User {
            user_id,
            employer_id: None,
        };

        assert_eq!(target_user(&pool, &principal, None).await.unwrap(), user_id);
        assert_eq!(
            target_user(&pool, &principal, Some(user_id)).await.unwrap(),
            user_id
        );
        let err = target_user(&pool, &principal, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[tokio::test]
    async fn admins_must_name_a_user() {
        let pool = lazy_pool();
        let admin = Principal::Admin {
            admin_id: Uuid::new_v4(),
        };
        let other = Uuid::new_v4();

        assert_eq!(target_user(&pool, &admin, Some(other)).await.unwrap(), other);
        assert_eq!(
            target_user(&pool, &admin, None).await.unwrap_err().code(),
            "validation_error"
        );
    }

    #[test]
    fn employers_are_pinned_to_their_own_company() {
        let employer_id = Uuid::new_v4();
        let employer = Principal::Employer {
            user_id: Uuid::new_v4(),
            employer_id,
        };

        assert_eq!(target_employer(&employer, None).unwrap(), employer_id);
        assert_eq!(target_employer(&employer, Some(employer_id)).unwrap(), employer_id);
        assert!(target_employer(&employer, Some(Uuid::new_v4())).is_err());

        let user = Principal::User {
            user_id: Uuid::new_v4(),
            employer_id: Some(employer_id),
        };
        assert_eq!(target_employer(&user, Some(employer_id)).unwrap_err().code(), "forbidden");
    }
}
