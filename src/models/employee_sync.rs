//! HRIS roster sync runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, validation::Validate};

super::text_enum! {
    SyncStatus {
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

/// Represents a row of the `employee_syncs` table. At most one row per
/// employer is `running` (partial unique index).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EmployeeSync {
    pub id: Uuid,
    pub employer_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: SyncStatus,
    pub created_count: i32,
    pub updated_count: i32,
    pub deactivated_count: i32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunSyncRequest {
    /// Required for admins; employers always sync themselves
    pub employer_id: Option<Uuid>,
}

impl Validate for RunSyncRequest {
    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncListQuery {
    pub employer_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
