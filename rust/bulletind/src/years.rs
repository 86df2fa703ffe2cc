//! School-year calendar: which year "now" falls in, how any other year
//! relates to it, and what the front-end may do with it.

use crate::error::{EngineError, EngineResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recurring academic-year boundary. Months are 0-indexed (0 = January).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolYearConfig {
    pub start_month: u32,
    pub start_day: u32,
    pub end_month: u32,
    pub end_day: u32,
}

impl Default for SchoolYearConfig {
    fn default() -> Self {
        Self {
            start_month: 8,
            start_day: 1,
            end_month: 6,
            end_day: 31,
        }
    }
}

fn max_day(month0: u32) -> u32 {
    match month0 {
        1 => 29,
        3 | 5 | 8 | 10 => 30,
        _ => 31,
    }
}

impl SchoolYearConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (label, month, day) in [
            ("start", self.start_month, self.start_day),
            ("end", self.end_month, self.end_day),
        ] {
            if month > 11 {
                errors.push(format!("{label}Month must be between 0 and 11 (got {month})"));
                continue;
            }
            if day == 0 || day > max_day(month) {
                errors.push(format!(
                    "{label}Day must be between 1 and {} for month {month} (got {day})",
                    max_day(month)
                ));
            }
        }
        errors
    }
}

/// A school year written `"2024-2025"`, identified by its starting year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearKey {
    pub start: i32,
}

impl YearKey {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let bad = || {
            EngineError::validation(format!(
                "school year must look like 2024-2025 (got '{}')",
                raw
            ))
        };
        let (a, b) = raw.trim().split_once('-').ok_or_else(bad)?;
        let start: i32 = a.trim().parse().map_err(|_| bad())?;
        let end: i32 = b.trim().parse().map_err(|_| bad())?;
        if start.checked_add(1) != Some(end) {
            return Err(bad());
        }
        Ok(Self { start })
    }

    pub fn containing(today: NaiveDate, config: &SchoolYearConfig) -> Self {
        let y = today.year();
        let m = today.month0();
        let d = today.day();
        if m > config.start_month || (m == config.start_month && d >= config.start_day) {
            Self { start: y }
        } else {
            Self { start: y - 1 }
        }
    }
}

impl fmt::Display for YearKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, i64::from(self.start) + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum YearClass {
    Past,
    Current,
    Future,
}

/// Only the start date decides the boundary; the configured end date is
/// informational.
pub fn classify(
    year: &str,
    today: NaiveDate,
    config: &SchoolYearConfig,
) -> EngineResult<YearClass> {
    let candidate = YearKey::parse(year)?;
    let current = YearKey::containing(today, config);
    Ok(match candidate.start.cmp(&current.start) {
        std::cmp::Ordering::Less => YearClass::Past,
        std::cmp::Ordering::Equal => YearClass::Current,
        std::cmp::Ordering::Greater => YearClass::Future,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Connectivity {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessMode {
    Edit,
    Consult,
    Prepare,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessMode::Edit => "edit",
            AccessMode::Consult => "consult",
            AccessMode::Prepare => "prepare",
        })
    }
}

/// Current year while offline is read-only, same as a past year.
pub fn mode(class: YearClass, connectivity: Connectivity) -> AccessMode {
    match (class, connectivity) {
        (YearClass::Future, _) => AccessMode::Prepare,
        (YearClass::Current, Connectivity::Connected) => AccessMode::Edit,
        (YearClass::Current, Connectivity::Disconnected) | (YearClass::Past, _) => {
            AccessMode::Consult
        }
    }
}

pub fn ensure_editable(action: &str, year: &str, mode: AccessMode) -> EngineResult<()> {
    if mode == AccessMode::Edit {
        Ok(())
    } else {
        Err(EngineError::policy(action, year, mode))
    }
}
