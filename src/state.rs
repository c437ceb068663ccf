//! Shared application state handed to every handler.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    clients::{DwollaApi, FinchApi, PlaidApi},
    config::Config,
    db::DbPool,
    jobs::JobQueue,
    mailer::Mailer,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub plaid: Arc<dyn PlaidApi>,
    pub dwolla: Arc<dyn DwollaApi>,
    pub finch: Arc<dyn FinchApi>,
    pub mailer: Arc<dyn Mailer>,
    pub jobs: JobQueue,
}

/// Lets handlers and middleware that only touch the database keep taking `State<DbPool>`.
impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

#[cfg(test)]
pub mod testing {
    //! App state wired to in-memory partners and a lazy (never connected) pool.

    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::{
        clients::fakes::{FakeDwolla, FakeFinch, FakePlaid},
        jobs::JobReceiver,
        mailer::RecordingMailer,
    };

    pub struct Harness {
        pub state: AppState,
        pub receiver: JobReceiver,
        pub mailer: Arc<RecordingMailer>,
    }

    pub fn harness() -> Harness {
        let config = Config::from_pairs([
            (
                "DATABASE_URL".to_string(),
                "postgres://localhost/ownerific_test".to_string(),
            ),
            ("DWOLLA_WEBHOOK_SECRET".to_string(), "whsec_test".to_string()),
            (
                "DWOLLA_MASTER_FUNDING_SOURCE".to_string(),
                "https://api-sandbox.dwolla.com/funding-sources/master".to_string(),
            ),
        ])
        .expect("test config");

        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");

        let (jobs, receiver) = JobQueue::new();
        let mailer = Arc::new(RecordingMailer::default());

        let state = AppState {
            pool,
            config: Arc::new(config),
            plaid: Arc::new(FakePlaid),
            dwolla: Arc::new(FakeDwolla::default()),
            finch: Arc::new(FakeFinch::default()),
            mailer: mailer.clone(),
            jobs,
        };

        Harness {
            state,
            receiver,
            mailer,
        }
    }

    /// [`harness`] on a migrated scratch schema; `None` without `DATABASE_URL`.
    pub async fn db_harness() -> Option<Harness> {
        let pool = crate::db::testing::scratch_pool().await?;
        let mut harness = harness();
        harness.state.pool = pool;
        Some(harness)
    }

    impl Harness {
        /// Emails queued so far, in order.
        pub fn queued_emails(&mut self) -> Vec<crate::mailer::Email> {
            let mut emails = Vec::new();
            while let Ok(envelope) = self.receiver.try_recv() {
                if let crate::jobs::Job::SendEmail(email) = envelope.job {
                    emails.push(email);
                }
            }
            emails
        }
    }
}
