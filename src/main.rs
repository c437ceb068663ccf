//! Ownerific API server.
//!
//! Backend for an employer-sponsored homebuying savings program: employers
//! fund credit wallets for their employees, employees link bank accounts and
//! move their own savings through Dwolla.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: opaque session tokens in role headers, stored hashed
//! - **Partners**: Plaid (bank linking), Dwolla (transfers), Finch (payroll rosters)
//! - **Background work**: in-process job queue plus a periodic scheduler
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Build partner clients and shared state
//! 4. Start job workers and the scheduler
//! 5. Serve HTTP

mod clients;
mod config;
mod db;
mod error;
mod handlers;
mod jobs;
mod mailer;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
mod validation;

use std::{sync::Arc, time::Duration};

use tracing_subscriber::EnvFilter;

use crate::{
    clients::{DwollaClient, FinchClient, PlaidClient},
    jobs::JobQueue,
    mailer::LogMailer,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG, defaulting to info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    if config.dwolla_webhook_secret.is_empty() {
        tracing::warn!("DWOLLA_WEBHOOK_SECRET is not set; every webhook will be rejected");
    }

    let (jobs, receiver) = JobQueue::new();
    let state = AppState {
        pool,
        plaid: Arc::new(PlaidClient::new(
            &config.plaid_base_url,
            &config.plaid_client_id,
            &config.plaid_secret,
        )),
        dwolla: Arc::new(DwollaClient::new(
            &config.dwolla_base_url,
            &config.dwolla_key,
            &config.dwolla_secret,
        )),
        finch: Arc::new(FinchClient::new(
            &config.finch_base_url,
            &config.finch_api_version,
        )),
        mailer: Arc::new(LogMailer),
        jobs: jobs.clone(),
        config: Arc::new(config),
    };

    jobs::spawn_workers(
        state.clone(),
        receiver,
        state.config.job_workers,
        state.config.job_max_attempts,
    );
    tracing::info!(workers = state.config.job_workers, "Job workers started");

    if state.config.scheduler_enabled {
        let every = Duration::from_secs(state.config.scheduler_interval_secs.max(60));
        jobs::spawn_scheduler(jobs, every);
        tracing::info!(interval_secs = every.as_secs(), "Scheduler started");
    }

    let addr = format!("0.0.0.0:{}", state.config.server_port);
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
