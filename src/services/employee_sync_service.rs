//! Roster sync between an employer's HRIS (via Finch) and its users.
//!
//! # Process
//!
//! 1. Claim the employer's sync slot (one `running` row per employer),
//!    failing any run that has been `running` longer than [`STALE_SYNC_MINUTES`]
//! 2. Page through the Finch directory, then fetch emails for active people
//! 3. Plan creates, updates and deactivations against existing users
//! 4. Apply the plan in one database transaction
//! 5. Record the counts, or the failure, on the sync row
//!
//! Planning is a pure function of the two rosters so it can be tested
//! without Finch or Postgres.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::{
    clients::FinchApi,
    error::{AppError, Entity},
    jobs::Job,
    mailer::{Template, reset_link},
    models::{
        credit_wallet::WalletType,
        employee_sync::EmployeeSync,
        employer::{EMPLOYER_COLUMNS, Employer},
        user::{USER_COLUMNS, User, UserStatus, UserType},
    },
    services::{auth_service, wallet_service},
    state::AppState,
    validation::normalize_email,
};

const DIRECTORY_PAGE_SIZE: usize = 100;

/// A run still `running` after this long was interrupted and no longer holds the slot.
pub const STALE_SYNC_MINUTES: i32 = 30;

pub const SYNC_COLUMNS: &str = "id, employer_id, status, created_count, updated_count, \
     deactivated_count, error, started_at, finished_at";

/// One person from the HRIS roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEmployee {
    pub finch_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub active: bool,
}

/// Changes to bring an existing user in line with the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterUpdate {
    pub user_id: Uuid,
    pub finch_id: String,
    pub first_name: String,
    pub last_name: String,
    pub status: UserStatus,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RosterPlan {
    pub creates: Vec<IncomingEmployee>,
    pub updates: Vec<RosterUpdate>,
    pub deactivations: Vec<Uuid>,
}

/// Compare the roster with the employer's users.
///
/// Users are matched by Finch id first, then by email. Unmatched active
/// people with an email become new employees; people without an email are
/// skipped. Employees whose Finch id no longer appears are deactivated.
pub fn plan_roster(existing: &[User], incoming: &[IncomingEmployee]) -> RosterPlan {
    let by_finch_id: HashMap<&str, &User> = existing
        .iter()
        .filter_map(|user| user.finch_individual_id.as_deref().map(|id| (id, user)))
        .collect();
    let by_email: HashMap<&str, &User> = existing
        .iter()
        .map(|user| (user.email.as_str(), user))
        .collect();

    let mut plan = RosterPlan::default();
    let mut matched: HashSet<Uuid> = HashSet::new();
    let mut seen_emails: HashSet<&str> = HashSet::new();

    for person in incoming {
        let user = by_finch_id.get(person.finch_id.as_str()).or_else(|| {
            person
                .email
                .as_deref()
                .and_then(|email| by_email.get(email))
        });

        match user {
            Some(user) if matched.insert(user.id) => {
                let status = if person.active {
                    UserStatus::Active
                } else {
                    UserStatus::Inactive
                };
                let changed = user.first_name != person.first_name
                    || user.last_name != person.last_name
                    || user.status != status
                    || user.finch_individual_id.as_deref() != Some(person.finch_id.as_str());
                if changed {
                    plan.updates.push(RosterUpdate {
                        user_id: user.id,
                        finch_id: person.finch_id.clone(),
                        first_name: person.first_name.clone(),
                        last_name: person.last_name.clone(),
                        status,
                    });
                }
            }
            // Two roster entries resolved to the same user
            Some(_) => {}
            None => {
                if let Some(email) = person.email.as_deref() {
                    if person.active && seen_emails.insert(email) {
                        plan.creates.push(person.clone());
                    }
                }
            }
        }
    }

    plan.deactivations = existing
        .iter()
        .filter(|user| {
            user.user_type == UserType::Employee
                && user.status == UserStatus::Active
                && user.finch_individual_id.is_some()
                && !matched.contains(&user.id)
        })
        .map(|user| user.id)
        .collect();

    plan
}

/// Read the whole directory and attach emails to the active people.
pub async fn fetch_roster(
    finch: &dyn FinchApi,
    access_token: &str,
) -> Result<Vec<IncomingEmployee>, AppError> {
    let mut directory = Vec::new();
    let mut offset = 0;
    loop {
        let page = finch
            .directory(access_token, offset, DIRECTORY_PAGE_SIZE)
            .await?;
        let len = page.len();
        directory.extend(page);
        if len < DIRECTORY_PAGE_SIZE {
            break;
        }
        offset += len;
    }

    let active_ids: Vec<String> = directory
        .iter()
        .filter(|person| person.is_active.unwrap_or(true))
        .map(|person| person.id.clone())
        .collect();

    let mut emails: HashMap<String, String> = HashMap::new();
    for chunk in active_ids.chunks(DIRECTORY_PAGE_SIZE) {
        for detail in finch.individuals(access_token, chunk).await? {
            if let Some(email) = detail.email {
                emails.insert(detail.id, normalize_email(&email));
            }
        }
    }

    Ok(directory
        .into_iter()
        .map(|person| IncomingEmployee {
            email: emails.remove(&person.id),
            active: person.is_active.unwrap_or(true),
            first_name: person.first_name.unwrap_or_default().trim().to_string(),
            last_name: person.last_name.unwrap_or_default().trim().to_string(),
            finch_id: person.id,
        })
        .collect())
}

#[derive(Debug, Default)]
struct SyncCounts {
    created: i32,
    updated: i32,
    deactivated: i32,
}

/// A claimed sync slot: the `running` row plus what the run needs.
pub struct SyncClaim {
    pub sync: EmployeeSync,
    employer: Employer,
    access_token: String,
}

/// Claim the employer's sync slot.
///
/// # Errors
///
/// - `NotFound(Employer)`: unknown or deleted employer
/// - `FinchNotConnected`: the employer has no Finch token
/// - `SyncInProgress`: another sync for the employer is running
pub async fn claim_sync(state: &AppState, employer_id: Uuid) -> Result<SyncClaim, AppError> {
    let employer = sqlx::query_as::<_, Employer>(&format!(
        "SELECT {EMPLOYER_COLUMNS} FROM employers WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(employer_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound(Entity::Employer))?;

    let access_token = employer
        .finch_access_token
        .clone()
        .ok_or(AppError::FinchNotConnected)?;

    let abandoned = sqlx::query(
        "UPDATE employee_syncs
         SET status = 'failed', error = 'Interrupted before finishing', finished_at = NOW()
         WHERE employer_id = $1 AND status = 'running'
           AND started_at < NOW() - make_interval(mins => $2)",
    )
    .bind(employer_id)
    .bind(STALE_SYNC_MINUTES)
    .execute(&state.pool)
    .await?;
    if abandoned.rows_affected() > 0 {
        tracing::warn!(%employer_id, "stale employee sync marked failed");
    }

    let sync = sqlx::query_as::<_, EmployeeSync>(&format!(
        "INSERT INTO employee_syncs (employer_id) VALUES ($1) RETURNING {SYNC_COLUMNS}"
    ))
    .bind(employer_id)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::SyncInProgress,
        other => other,
    })?;

    tracing::info!(%employer_id, sync_id = %sync.id, "employee sync started");
    Ok(SyncClaim {
        sync,
        employer,
        access_token,
    })
}

/// Run a roster sync for one employer and return the finished sync row.
///
/// # Errors
///
/// Everything [`claim_sync`] returns, plus anything the sync itself hits
/// after it is recorded as `failed`.
pub async fn run_sync(state: &AppState, employer_id: Uuid) -> Result<EmployeeSync, AppError> {
    let claim = claim_sync(state, employer_id).await?;
    finish_sync(state, claim).await
}

/// Claim the slot, then finish the run on a background task.
///
/// The returned row is still `running`; a dropped request cannot leave it that way.
pub async fn spawn_sync(state: &AppState, employer_id: Uuid) -> Result<EmployeeSync, AppError> {
    let claim = claim_sync(state, employer_id).await?;
    let sync = claim.sync.clone();
    let state = state.clone();
    tokio::spawn(async move {
        // Outcome is recorded on the row and logged by finish_sync
        let _ = finish_sync(&state, claim).await;
    });
    Ok(sync)
}

async fn finish_sync(state: &AppState, claim: SyncClaim) -> Result<EmployeeSync, AppError> {
    let SyncClaim {
        sync,
        employer,
        access_token,
    } = claim;
    let employer_id = employer.id;

    match apply_roster(state, &employer, &access_token).await {
        Ok(counts) => {
            let finished = sqlx::query_as::<_, EmployeeSync>(&format!(
                "UPDATE employee_syncs
                 SET status = 'completed', created_count = $1, updated_count = $2,
                     deactivated_count = $3, finished_at = NOW()
                 WHERE id = $4
                 RETURNING {SYNC_COLUMNS}"
            ))
            .bind(counts.created)
            .bind(counts.updated)
            .bind(counts.deactivated)
            .bind(sync.id)
            .fetch_one(&state.pool)
            .await?;

            tracing::info!(
                %employer_id,
                created = counts.created,
                updated = counts.updated,
                deactivated = counts.deactivated,
                "employee sync completed"
            );
            Ok(finished)
        }
        Err(err) => {
            tracing::error!(%employer_id, error = %err, "employee sync failed");
            let recorded = sqlx::query(
                "UPDATE employee_syncs SET status = 'failed', error = $1, finished_at = NOW()
                 WHERE id = $2",
            )
            .bind(err.to_string())
            .bind(sync.id)
            .execute(&state.pool)
            .await;
            if let Err(record_err) = recorded {
                tracing::error!(
                    sync_id = %sync.id,
                    error = %record_err,
                    "could not record failed sync; it will be failed as stale"
                );
            }
            Err(err)
        }
    }
}

async fn apply_roster(
    state: &AppState,
    employer: &Employer,
    access_token: &str,
) -> Result<SyncCounts, AppError> {
    let incoming = fetch_roster(state.finch.as_ref(), access_token).await?;

    let existing = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE employer_id = $1 AND deleted_at IS NULL"
    ))
    .bind(employer.id)
    .fetch_all(&state.pool)
    .await?;

    let plan = plan_roster(&existing, &incoming);
    let mut counts = SyncCounts::default();
    // (email, first name, claim token)
    let mut invites: Vec<(String, String, String)> = Vec::new();

    let mut tx = state.pool.begin().await?;

    for update in &plan.updates {
        sqlx::query(
            "UPDATE users
             SET first_name = $1, last_name = $2, status = $3, finch_individual_id = $4,
                 updated_at = NOW()
             WHERE id = $5",
        )
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(update.status.as_str())
        .bind(&update.finch_id)
        .bind(update.user_id)
        .execute(&mut *tx)
        .await?;
        counts.updated += 1;
    }

    for user_id in &plan.deactivations {
        sqlx::query("UPDATE users SET status = 'inactive', updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        counts.deactivated += 1;
    }

    for person in &plan.creates {
        let Some(email) = person.email.as_deref() else {
            continue;
        };

        // A saver who signed up on their own joins the employer instead
        let linked: Option<Uuid> = sqlx::query_scalar(
            "UPDATE users
             SET employer_id = $1, user_type = 'employee', finch_individual_id = $2,
                 updated_at = NOW()
             WHERE email = $3 AND employer_id IS NULL AND deleted_at IS NULL
             RETURNING id",
        )
        .bind(employer.id)
        .bind(&person.finch_id)
        .bind(email)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(user_id) = linked {
            wallet_service::ensure_wallet(&mut tx, user_id, WalletType::Employer).await?;
            counts.updated += 1;
            continue;
        }

        let created: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO users (
                email, password_hash, first_name, last_name, user_type, employer_id,
                finch_individual_id
             )
             VALUES ($1, $2, $3, $4, 'employee', $5, $6)
             ON CONFLICT (email) WHERE deleted_at IS NULL DO NOTHING
             RETURNING id",
        )
        .bind(email)
        .bind(auth_service::unusable_password_hash()?)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(employer.id)
        .bind(&person.finch_id)
        .fetch_optional(&mut *tx)
        .await?;

        match created {
            Some(user_id) => {
                wallet_service::ensure_wallet(&mut tx, user_id, WalletType::Platform).await?;
                wallet_service::ensure_wallet(&mut tx, user_id, WalletType::Employer).await?;
                let token = auth_service::issue_password_reset(
                    &mut tx,
                    user_id,
                    auth_service::CLAIM_TOKEN_TTL_HOURS,
                )
                .await?;
                invites.push((email.to_string(), person.first_name.clone(), token));
                counts.created += 1;
            }
            None => {
                tracing::warn!(
                    employer_id = %employer.id,
                    finch_id = %person.finch_id,
                    "roster email belongs to another employer's user, skipped"
                );
            }
        }
    }

    tx.commit().await?;

    for (email, first_name, token) in invites {
        let template = Template::EmployeeInvite {
            first_name,
            employer_name: employer.name.clone(),
            claim_url: reset_link(&state.config.app_base_url, &token),
        };
        state.jobs.enqueue(Job::SendEmail(
            template.render(&state.config.mail_from, &email),
        ));
    }

    Ok(counts)
}

/// Sync every active employer with a Finch connection. One failing employer
/// does not stop the others.
pub async fn sync_all(state: &AppState) -> Result<usize, AppError> {
    let employer_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM employers
         WHERE finch_access_token IS NOT NULL AND status = 'active' AND deleted_at IS NULL
         ORDER BY created_at",
    )
    .fetch_all(&state.pool)
    .await?;

    let mut completed = 0;
    for employer_id in employer_ids {
        match run_sync(state, employer_id).await {
            Ok(_) => completed += 1,
            Err(AppError::SyncInProgress) => {
                tracing::debug!(%employer_id, "sync already running, skipped");
            }
            Err(err) => tracing::warn!(%employer_id, error = %err, "scheduled sync failed"),
        }
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{FinchIndividual, FinchIndividualDetail, fakes::FakeFinch};
    use chrono::Utc;

    fn user(email: &str, finch_id: Option<&str>, status: UserStatus) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: String::new(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone: None,
            user_type: UserType::Employee,
            status,
            employer_id: Some(Uuid::new_v4()),
            finch_individual_id: finch_id.map(str::to_string),
            dwolla_customer_url: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn person(finch_id: &str, email: Option<&str>, active: bool) -> IncomingEmployee {
        IncomingEmployee {
            finch_id: finch_id.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.map(str::to_string),
            active,
        }
    }

    #[test]
    fn unchanged_roster_plans_nothing() {
        let existing = vec![user("ada@acme.com", Some("f-1"), UserStatus::Active)];
        let incoming = vec![person("f-1", Some("ada@acme.com"), true)];
        assert_eq!(plan_roster(&existing, &incoming), RosterPlan::default());
    }

    #[test]
    fn new_people_are_created_only_with_an_email() {
        let incoming = vec![
            person("f-1", Some("ada@acme.com"), true),
            person("f-2", None, true),
            person("f-3", Some("gone@acme.com"), false),
        ];
        let plan = plan_roster(&[], &incoming);
        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0].finch_id, "f-1");
    }

    #[test]
    fn email_match_links_finch_id_and_renames() {
        let existing = vec![user("ada@acme.com", None, UserStatus::Active)];
        let mut incoming = person("f-9", Some("ada@acme.com"), true);
        incoming.last_name = "King".to_string();

        let plan = plan_roster(&existing, &[incoming]);
        assert!(plan.creates.is_empty());
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].finch_id, "f-9");
        assert_eq!(plan.updates[0].last_name, "King");
    }

    #[test]
    fn terminated_and_missing_employees_go_inactive() {
        let terminated = user("ada@acme.com", Some("f-1"), UserStatus::Active);
        let missing = user("bob@acme.com", Some("f-2"), UserStatus::Active);
        let never_synced = user("cy@acme.com", None, UserStatus::Active);
        let existing = vec![terminated.clone(), missing.clone(), never_synced];

        let plan = plan_roster(&existing, &[person("f-1", Some("ada@acme.com"), false)]);

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].user_id, terminated.id);
        assert_eq!(plan.updates[0].status, UserStatus::Inactive);
        assert_eq!(plan.deactivations, vec![missing.id]);
    }

    #[test]
    fn returning_employee_is_reactivated() {
        let existing = vec![user("ada@acme.com", Some("f-1"), UserStatus::Inactive)];
        let plan = plan_roster(&existing, &[person("f-1", Some("ada@acme.com"), true)]);
        assert_eq!(plan.updates[0].status, UserStatus::Active);
        assert!(plan.deactivations.is_empty());
    }

    #[tokio::test]
    async fn roster_is_read_across_pages() {
        let roster: Vec<FinchIndividual> = (0..150)
            .map(|i| FinchIndividual {
                id: format!("f-{i}"),
                first_name: Some(format!(" Person{i} ")),
                last_name: Some("Doe".to_string()),
                is_active: Some(i % 2 == 0),
            })
            .collect();
        let details = vec![
            FinchIndividualDetail {
                id: "f-0".to_string(),
                email: Some("P0@Acme.com".to_string()),
            },
            FinchIndividualDetail {
                id: "f-1".to_string(),
                email: Some("p1@acme.com".to_string()),
            },
        ];
        let finch = FakeFinch { roster, details };

        let incoming = fetch_roster(&finch, "token").await.unwrap();

        assert_eq!(incoming.len(), 150);
        assert_eq!(incoming[0].first_name, "Person0");
        assert_eq!(incoming[0].email.as_deref(), Some("p0@acme.com"));
        // inactive people are not looked up
        assert_eq!(incoming[1].email, None);
        assert!(incoming[149].finch_id == "f-149" && !incoming[149].active);
    }

    mod with_database {
        use std::sync::Arc;

        use super::*;
        use crate::{
            db::testing::insert_employer,
            models::employee_sync::SyncStatus,
            services::auth_service::{login_user, reset_password},
            state::testing::db_harness,
        };

        fn roster_of_one() -> FakeFinch {
            FakeFinch {
                roster: vec![FinchIndividual {
                    id: "finch-lee".to_string(),
                    first_name: Some("Lee".to_string()),
                    last_name: Some("Park".to_string()),
                    is_active: Some(true),
                }],
                details: vec![FinchIndividualDetail {
                    id: "finch-lee".to_string(),
                    email: Some("Lee@Acme.com".to_string()),
                }],
            }
        }

        fn claim_token(body: &str) -> String {
            let (_, rest) = body.split_once("token=").expect("claim link in invite");
            rest.split_whitespace().next().unwrap_or_default().to_string()
        }

        #[tokio::test]
        async fn new_employee_can_claim_the_account_from_the_invite() {
            let Some(mut harness) = db_harness().await else {
                return;
            };
            harness.state.finch = Arc::new(roster_of_one());
            let employer_id = insert_employer(&harness.state.pool, Some("finch-token")).await;

            let sync = run_sync(&harness.state, employer_id).await.unwrap();
            assert_eq!(sync.status, SyncStatus::Completed);
            assert_eq!(sync.created_count, 1);

            let pool = harness.state.pool.clone();
            assert!(login_user(&pool, "lee@acme.com", "correct horse battery", 1).await.is_err());

            let emails = harness.queued_emails();
            assert_eq!(emails.len(), 1);
            assert_eq!(emails[0].to, "lee@acme.com");
            assert!(emails[0].body.contains("https://app.ownerific.com/reset-password?token="));
            let token = claim_token(&emails[0].body);

            reset_password(&pool, &token, "correct horse battery").await.unwrap();
            let session = login_user(&pool, "lee@acme.com", "correct horse battery", 1)
                .await
                .unwrap();
            assert!(!session.token.is_empty());

            let reused = reset_password(&pool, &token, "another long password").await.unwrap_err();
            assert_eq!(reused.code(), "invalid_reset_token");

            // A second run finds the employee already there
            let again = run_sync(&harness.state, employer_id).await.unwrap();
            assert_eq!(again.created_count, 0);
            assert!(harness.queued_emails().is_empty());
        }

        #[tokio::test]
        async fn abandoned_running_sync_does_not_block_the_employer() {
            let Some(harness) = db_harness().await else {
                return;
            };
            let state = &harness.state;
            let employer_id = insert_employer(&state.pool, Some("finch-token")).await;

            let abandoned: Uuid = sqlx::query_scalar(
                "INSERT INTO employee_syncs (employer_id, started_at)
                 VALUES ($1, NOW() - make_interval(mins => $2 + 5))
                 RETURNING id",
            )
            .bind(employer_id)
            .bind(STALE_SYNC_MINUTES)
            .fetch_one(&state.pool)
            .await
            .unwrap();

            let sync = run_sync(state, employer_id).await.unwrap();
            assert_eq!(sync.status, SyncStatus::Completed);

            let (status, error): (String, Option<String>) =
                sqlx::query_as("SELECT status, error FROM employee_syncs WHERE id = $1")
                    .bind(abandoned)
                    .fetch_one(&state.pool)
                    .await
                    .unwrap();
            assert_eq!(status, "failed");
            assert_eq!(error.as_deref(), Some("Interrupted before finishing"));
        }

        #[tokio::test]
        async fn recent_running_sync_still_conflicts() {
            let Some(harness) = db_harness().await else {
                return;
            };
            let state = &harness.state;
            let employer_id = insert_employer(&state.pool, Some("finch-token")).await;

            let claim = claim_sync(state, employer_id).await.unwrap();
            assert_eq!(claim.sync.status, SyncStatus::Running);

            let err = claim_sync(state, employer_id).await.err().unwrap();
            assert_eq!(err.code(), "sync_in_progress");

            let finished = finish_sync(state, claim).await.unwrap();
            assert_eq!(finished.status, SyncStatus::Completed);
            assert!(claim_sync(state, employer_id).await.is_ok());
        }

        #[tokio::test]
        async fn unconnected_employer_cannot_sync() {
            let Some(harness) = db_harness().await else {
                return;
            };
            let employer_id = insert_employer(&harness.state.pool, None).await;
            let err = spawn_sync(&harness.state, employer_id).await.unwrap_err();
            assert_eq!(err.code(), "finch_not_connected");
        }
    }
}
