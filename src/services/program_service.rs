//! Monthly program distributions.
//!
//! # Atomicity Guarantees
//!
//! Each employee's distribution row and the EMPLOYER wallet credit commit
//! together. The unique `(program_id, user_id, period)` key makes a rerun of
//! the same period skip everyone already credited.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        credit_wallet::{LedgerEntry, WalletType},
        program::{DistributionSummary, Period, Program},
    },
    services::wallet_service,
};

pub const PROGRAM_COLUMNS: &str = "id, employer_id, name, monthly_amount_cents, match_basis_points, \
     match_cap_cents, status, starts_on, ends_on, created_at, updated_at";

/// Credit every active employee of every program covering `period`.
pub async fn distribute(pool: &DbPool, period: Period) -> Result<DistributionSummary, AppError> {
    let programs = sqlx::query_as::<_, Program>(&format!(
        "SELECT {PROGRAM_COLUMNS} FROM programs
         WHERE status = 'active' AND monthly_amount_cents > 0
           AND starts_on <= $1 AND (ends_on IS NULL OR ends_on >= $2)
         ORDER BY created_at"
    ))
    .bind(period.last_day())
    .bind(period.first_day())
    .fetch_all(pool)
    .await?;

    let mut summary = DistributionSummary {
        period: period.to_string(),
        ..Default::default()
    };

    for program in programs.into_iter().filter(|p| p.covers(period)) {
        summary.programs += 1;

        let employees: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM users
             WHERE employer_id = $1 AND status = 'active' AND deleted_at IS NULL
               AND user_type IN ('employee', 'employer_manager')
             ORDER BY created_at",
        )
        .bind(program.employer_id)
        .fetch_all(pool)
        .await?;

        for user_id in employees {
            if credit_employee(pool, &program, user_id, period).await? {
                summary.credited += 1;
            } else {
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        period = %summary.period,
        programs = summary.programs,
        credited = summary.credited,
        skipped = summary.skipped,
        "program distribution finished"
    );
    Ok(summary)
}

/// Returns `false` when the employee was already credited for the period.
async fn credit_employee(
    pool: &DbPool,
    program: &Program,
    user_id: Uuid,
    period: Period,
) -> Result<bool, AppError> {
    let mut tx = pool.begin().await?;

    let inserted: Option<Uuid> = sqlx::query_scalar(
        "INSERT INTO program_distributions (program_id, user_id, period, amount_cents)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (program_id, user_id, period) DO NOTHING
         RETURNING id",
    )
    .bind(program.id)
    .bind(user_id)
    .bind(period.to_string())
    .bind(program.monthly_amount_cents)
    .fetch_optional(&mut *tx)
    .await?;

    if inserted.is_none() {
        tx.rollback().await?;
        return Ok(false);
    }

    wallet_service::apply_delta(
        &mut tx,
        user_id,
        WalletType::Employer,
        program.monthly_amount_cents,
        LedgerEntry::new(format!("{} ({period})", program.name))
            .with_reference(distribution_reference(program.id, period)),
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}

pub fn distribution_reference(program_id: Uuid, period: Period) -> String {
    format!("program:{program_id}:{period}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_names_program_and_period() {
        let program_id = Uuid::nil();
        let period: Period = "2025-03".parse().unwrap();
        assert_eq!(
            distribution_reference(program_id, period),
            "program:00000000-0000-0000-0000-000000000000:2025-03"
        );
    }

    #[tokio::test]
    async fn rerunning_a_period_credits_nobody_twice() {
        let Some(pool) = crate::db::testing::scratch_pool().await else {
            return;
        };
        let employer_id = crate::db::testing::insert_employer(&pool, None).await;
        let ana = crate::db::testing::insert_user(&pool, Some(employer_id), "ana@acme.com").await;
        crate::db::testing::insert_user(&pool, Some(employer_id), "ben@acme.com").await;
        crate::db::testing::insert_user(&pool, None, "solo@example.com").await;

        sqlx::query(
            "INSERT INTO programs (employer_id, name, monthly_amount_cents, starts_on)
             VALUES ($1, 'Homebuyer boost', 2500, '2025-01-01')",
        )
        .bind(employer_id)
        .execute(&pool)
        .await
        .unwrap();

        let march: Period = "2025-03".parse().unwrap();
        let first = distribute(&pool, march).await.unwrap();
        assert_eq!((first.programs, first.credited, first.skipped), (1, 2, 0));

        let again = distribute(&pool, march).await.unwrap();
        assert_eq!((again.programs, again.credited, again.skipped), (1, 0, 2));

        let balance: i64 = sqlx::query_scalar(
            "SELECT balance_cents FROM credit_wallets WHERE user_id = $1 AND wallet_type = 'EMPLOYER'",
        )
        .bind(ana)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(balance, 2_500);

        let april = distribute(&pool, march.next()).await.unwrap();
        assert_eq!(april.credited, 2);
    }
}
