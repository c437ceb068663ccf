//! Employer programs: monthly credit grants and deposit matching.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    validation::{Validate, optional_non_empty, require_non_empty, require_range},
};

super::text_enum! {
    ProgramStatus {
        Active => "active",
        Paused => "paused",
        Ended => "ended",
    }
}

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn current() -> Self {
        Self::containing(Utc::now().date_naive())
    }

    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(self) -> NaiveDate {
        self.next().first_day().pred_opt().unwrap_or(NaiveDate::MAX)
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::validation("period", "must look like YYYY-MM");
        let (year, month) = value.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Period::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Represents a row of the `programs` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Program {
    pub id: Uuid,
    pub employer_id: Uuid,
    pub name: String,
    /// Credited to every active employee's EMPLOYER wallet each month
    pub monthly_amount_cents: i64,
    /// Share of each processed deposit matched, in 1/100 of a percent
    pub match_basis_points: i32,
    /// Most matching credit one employee can earn per calendar month
    pub match_cap_cents: i64,
    #[sqlx(try_from = "String")]
    pub status: ProgramStatus,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Program {
    /// Whether the program is running at any point during `period`.
    pub fn covers(&self, period: Period) -> bool {
        self.status == ProgramStatus::Active
            && self.starts_on <= period.last_day()
            && self.ends_on.is_none_or(|end| end >= period.first_day())
    }

    /// Matching credit earned by a deposit, given what was already matched this month.
    pub fn match_for(&self, deposit_cents: i64, matched_this_month_cents: i64) -> i64 {
        if self.status != ProgramStatus::Active || self.match_basis_points <= 0 {
            return 0;
        }
        let raw = deposit_cents * i64::from(self.match_basis_points) / 10_000;
        let remaining = (self.match_cap_cents - matched_this_month_cents).max(0);
        raw.min(remaining)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProgramRequest {
    pub employer_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub monthly_amount_cents: i64,
    #[serde(default)]
    pub match_basis_points: i32,
    #[serde(default)]
    pub match_cap_cents: i64,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
}

fn validate_terms(
    monthly_amount_cents: Option<i64>,
    match_basis_points: Option<i32>,
    match_cap_cents: Option<i64>,
    starts_on: Option<NaiveDate>,
    ends_on: Option<NaiveDate>,
) -> Result<(), AppError> {
    if let Some(amount) = monthly_amount_cents {
        require_range("monthly_amount_cents", amount, 0, 1_000_000)?;
    }
    if let Some(bps) = match_basis_points {
        require_range("match_basis_points", i64::from(bps), 0, 10_000)?;
    }
    if let Some(cap) = match_cap_cents {
        require_range("match_cap_cents", cap, 0, 10_000_000)?;
    }
    if let (Some(start), Some(end)) = (starts_on, ends_on) {
        if end < start {
            return Err(AppError::validation("ends_on", "must not be before starts_on"));
        }
    }
    Ok(())
}

impl Validate for CreateProgramRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("name", &self.name, 200)?;
        validate_terms(
            Some(self.monthly_amount_cents),
            Some(self.match_basis_points),
            Some(self.match_cap_cents),
            Some(self.starts_on),
            self.ends_on,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProgramRequest {
    pub name: Option<String>,
    pub monthly_amount_cents: Option<i64>,
    pub match_basis_points: Option<i32>,
    pub match_cap_cents: Option<i64>,
    pub status: Option<ProgramStatus>,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
}

impl UpdateProgramRequest {
    /// The date range the program will have once this patch is applied.
    pub fn dates_over(&self, current: &Program) -> Result<(NaiveDate, Option<NaiveDate>), AppError> {
        let starts_on = self.starts_on.unwrap_or(current.starts_on);
        let ends_on = self.ends_on.or(current.ends_on);
        if ends_on.is_some_and(|end| end < starts_on) {
            return Err(AppError::validation("ends_on", "must not be before starts_on"));
        }
        Ok((starts_on, ends_on))
    }
}

impl Validate for UpdateProgramRequest {
    fn validate(&self) -> Result<(), AppError> {
        optional_non_empty("name", self.name.as_deref(), 200)?;
        validate_terms(
            self.monthly_amount_cents,
            self.match_basis_points,
            self.match_cap_cents,
            self.starts_on,
            self.ends_on,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProgramListQuery {
    pub employer_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DistributeRequest {
    /// Defaults to the current month
    pub period: Option<Period>,
}

/// Malformed periods are already rejected while parsing.
impl Validate for DistributeRequest {
    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Outcome of a distribution run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionSummary {
    pub period: String,
    pub programs: usize,
    /// Employees credited in this run
    pub credited: usize,
    /// Employees already credited for the period by an earlier run
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(status: ProgramStatus, starts_on: &str, ends_on: Option<&str>) -> Program {
        let now = Utc::now();
        Program {
            id: Uuid::new_v4(),
            employer_id: Uuid::new_v4(),
            name: "Homebuyer boost".to_string(),
            monthly_amount_cents: 5_000,
            match_basis_points: 5_000,
            match_cap_cents: 10_000,
            status,
            starts_on: starts_on.parse().unwrap(),
            ends_on: ends_on.map(|d| d.parse().unwrap()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn period_parses_and_prints() {
        let period: Period = "2025-02".parse().unwrap();
        assert_eq!(period.to_string(), "2025-02");
        assert_eq!(period.last_day(), NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
        assert_eq!("2024-12".parse::<Period>().unwrap().next().to_string(), "2025-01");
    }

    #[test]
    fn period_rejects_garbage() {
        for bad in ["2025-13", "2025-1", "25-01", "2025/01", "", "abcd-ef"] {
            assert!(bad.parse::<Period>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn coverage_uses_whole_month() {
        let march: Period = "2025-03".parse().unwrap();
        assert!(program(ProgramStatus::Active, "2025-03-31", None).covers(march));
        assert!(program(ProgramStatus::Active, "2025-01-01", Some("2025-03-01")).covers(march));
        assert!(!program(ProgramStatus::Active, "2025-04-01", None).covers(march));
        assert!(!program(ProgramStatus::Active, "2024-01-01", Some("2025-02-28")).covers(march));
        assert!(!program(ProgramStatus::Paused, "2024-01-01", None).covers(march));
    }

    #[test]
    fn match_respects_monthly_cap() {
        let p = program(ProgramStatus::Active, "2025-01-01", None);
        // 50% of $100 with nothing matched yet
        assert_eq!(p.match_for(10_000, 0), 5_000);
        // only $20 of cap left
        assert_eq!(p.match_for(10_000, 8_000), 2_000);
        assert_eq!(p.match_for(10_000, 12_000), 0);
        assert_eq!(program(ProgramStatus::Ended, "2025-01-01", None).match_for(10_000, 0), 0);
    }

    #[test]
    fn end_before_start_is_rejected() {
        let request = CreateProgramRequest {
            employer_id: Uuid::new_v4(),
            name: "Boost".to_string(),
            monthly_amount_cents: 1_000,
            match_basis_points: 0,
            match_cap_cents: 0,
            starts_on: "2025-05-01".parse().unwrap(),
            ends_on: Some("2025-04-30".parse().unwrap()),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn patching_one_date_is_checked_against_the_stored_other() {
        let current = program(ProgramStatus::Active, "2025-05-01", Some("2025-12-31"));

        let early_end = UpdateProgramRequest {
            ends_on: Some("2025-04-30".parse().unwrap()),
            ..Default::default()
        };
        assert!(early_end.validate().is_ok());
        assert!(early_end.dates_over(&current).is_err());

        let late_start = UpdateProgramRequest {
            starts_on: Some("2026-01-01".parse().unwrap()),
            ..Default::default()
        };
        assert!(late_start.dates_over(&current).is_err());

        let (starts_on, ends_on) = UpdateProgramRequest::default().dates_over(&current).unwrap();
        assert_eq!(starts_on, current.starts_on);
        assert_eq!(ends_on, current.ends_on);
    }
}
