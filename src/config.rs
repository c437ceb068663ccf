//! Application configuration management.
//!
//! Configuration comes from environment variables (optionally seeded from a
//! `.env` file) and is deserialized with `envy` into a type-safe struct.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `SESSION_TTL_HOURS` (optional): session lifetime, defaults to 72
/// - `PLAID_*`, `DWOLLA_*`, `FINCH_*`: partner API credentials and base URLs
/// - `JOB_WORKERS`, `JOB_MAX_ATTEMPTS`: background queue sizing
/// - `SCHEDULER_ENABLED`, `SCHEDULER_INTERVAL_SECS`: periodic jobs
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    #[serde(default = "default_plaid_base_url")]
    pub plaid_base_url: String,
    #[serde(default)]
    pub plaid_client_id: String,
    #[serde(default)]
    pub plaid_secret: String,

    #[serde(default = "default_dwolla_base_url")]
    pub dwolla_base_url: String,
    #[serde(default)]
    pub dwolla_key: String,
    #[serde(default)]
    pub dwolla_secret: String,
    /// Shared secret Dwolla signs webhook bodies with.
    #[serde(default)]
    pub dwolla_webhook_secret: String,
    /// Funding source that holds pooled savings; deposits land here.
    #[serde(default)]
    pub dwolla_master_funding_source: String,

    #[serde(default = "default_finch_base_url")]
    pub finch_base_url: String,
    #[serde(default = "default_finch_api_version")]
    pub finch_api_version: String,

    #[serde(default = "default_mail_from")]
    pub mail_from: String,
    /// Web app origin used in emailed links.
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,

    #[serde(default = "default_job_workers")]
    pub job_workers: usize,
    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: u32,

    #[serde(default = "default_scheduler_enabled")]
    pub scheduler_enabled: bool,
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_session_ttl_hours() -> i64 {
    72
}

fn default_plaid_base_url() -> String {
    "https://sandbox.plaid.com".to_string()
}

fn default_dwolla_base_url() -> String {
    "https://api-sandbox.dwolla.com".to_string()
}

fn default_finch_base_url() -> String {
    "https://api.tryfinch.com".to_string()
}

fn default_finch_api_version() -> String {
    "2020-09-17".to_string()
}

fn default_mail_from() -> String {
    "Ownerific <hello@ownerific.com>".to_string()
}

fn default_app_base_url() -> String {
    "https://app.ownerific.com".to_string()
}

fn default_job_workers() -> usize {
    2
}

fn default_job_max_attempts() -> u32 {
    3
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` first when present, then reads the process environment.
    /// Field names map to upper-case variables: `database_url` -> `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value cannot be
    /// parsed into its field type.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>()
    }

    /// Build a config from explicit key/value pairs, bypassing the process environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_settings() {
        let config = Config::from_pairs([(
            "DATABASE_URL".to_string(),
            "postgres://localhost/ownerific".to_string(),
        )])
        .unwrap();

        assert_eq!(config.server_port, 3000);
        assert_eq!(config.session_ttl_hours, 72);
        assert_eq!(config.job_max_attempts, 3);
        assert!(config.scheduler_enabled);
        assert_eq!(config.finch_api_version, "2020-09-17");
    }

    #[test]
    fn database_url_is_required() {
        let result = Config::from_pairs([("SERVER_PORT".to_string(), "8080".to_string())]);
        assert!(result.is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_pairs([
            ("DATABASE_URL".to_string(), "postgres://db/app".to_string()),
            ("SERVER_PORT".to_string(), "8080".to_string()),
            ("SCHEDULER_ENABLED".to_string(), "false".to_string()),
            ("JOB_WORKERS".to_string(), "4".to_string()),
        ])
        .unwrap();

        assert_eq!(config.server_port, 8080);
        assert!(!config.scheduler_enabled);
        assert_eq!(config.job_workers, 4);
    }
}
