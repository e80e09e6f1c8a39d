//! Monthly attendance reports built from committed mirror data.

mod xlsx;

pub use xlsx::{export_file_name, write_workbook};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::editing::resolver::effective_allowance;
use crate::errors::AppError;
use crate::models::{AttendanceData, AttendanceStatus, Employee};
use crate::sync::MirrorSnapshot;

/// A calendar month, written `yyyy-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|next| next.pred_opt())
            .unwrap_or_default()
    }

    /// Every day of the month, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        self.first_day()
            .iter_days()
            .take_while(|d| *d <= self.last_day())
            .collect()
    }

    /// e.g. "March 2024"
    pub fn label(&self) -> String {
        self.first_day().format("%B %Y").to_string()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::Validation(format!("Invalid month '{}', expected yyyy-MM", s));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

/// How one day renders in the report grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DayMark {
    #[serde(rename = "P")]
    Present,
    #[serde(rename = "HD")]
    HalfDay,
    #[serde(rename = "A")]
    Absent,
    #[serde(rename = "-")]
    Unmarked,
    /// Unmarked Sunday, only when Sundays are marked as off days
    #[serde(rename = "SUN")]
    Sunday,
}

impl DayMark {
    pub fn code(&self) -> &'static str {
        match self {
            DayMark::Present => "P",
            DayMark::HalfDay => "HD",
            DayMark::Absent => "A",
            DayMark::Unmarked => "-",
            DayMark::Sunday => "SUN",
        }
    }

    fn classify(status: Option<AttendanceStatus>, day: NaiveDate, mark_sundays: bool) -> Self {
        match status {
            Some(AttendanceStatus::Present) => DayMark::Present,
            Some(AttendanceStatus::HalfDay) => DayMark::HalfDay,
            Some(AttendanceStatus::Absent) => DayMark::Absent,
            None if mark_sundays && day.weekday() == Weekday::Sun => DayMark::Sunday,
            None => DayMark::Unmarked,
        }
    }
}

/// One employee's month.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeMonthSummary {
    pub employee_id: String,
    pub name: String,
    /// Half days count 0.5
    pub present: f64,
    pub half_days: u32,
    pub absent: u32,
    pub allowance: i64,
    /// One mark per day of the month
    pub marks: Vec<DayMark>,
    pub present_dates: Vec<String>,
    pub half_day_dates: Vec<String>,
    pub absent_dates: Vec<String>,
}

/// Attendance grid and totals for a month.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReport {
    pub month: String,
    pub label: String,
    /// `yyyy-MM-dd`, one per day of the month
    pub days: Vec<String>,
    pub employees: Vec<EmployeeMonthSummary>,
    pub total_allowance: i64,
}

pub fn build_monthly_report(
    month: MonthKey,
    snapshot: &MirrorSnapshot,
    mark_sundays: bool,
) -> MonthlyReport {
    let days = month.days();
    let employees: Vec<_> = snapshot
        .employees
        .iter()
        .map(|e| summarize(snapshot, e, &days, mark_sundays))
        .collect();

    MonthlyReport {
        month: month.to_string(),
        label: month.label(),
        days: days
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect(),
        total_allowance: employees.iter().map(|e| e.allowance).sum(),
        employees,
    }
}

/// Month summary for a single employee.
pub fn employee_summary(
    month: MonthKey,
    snapshot: &MirrorSnapshot,
    employee_id: &str,
    mark_sundays: bool,
) -> Result<EmployeeMonthSummary, AppError> {
    let employee = snapshot
        .employee(employee_id)
        .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", employee_id)))?;
    Ok(summarize(snapshot, employee, &month.days(), mark_sundays))
}

fn summarize(
    snapshot: &MirrorSnapshot,
    employee: &Employee,
    days: &[NaiveDate],
    mark_sundays: bool,
) -> EmployeeMonthSummary {
    let mut summary = EmployeeMonthSummary {
        employee_id: employee.id.clone(),
        name: employee.name.clone(),
        present: 0.0,
        half_days: 0,
        absent: 0,
        allowance: 0,
        marks: Vec::with_capacity(days.len()),
        present_dates: Vec::new(),
        half_day_dates: Vec::new(),
        absent_dates: Vec::new(),
    };

    for day in days {
        let key = day.format("%Y-%m-%d").to_string();
        let saved = snapshot.record(&key, &employee.id);
        let status = saved.map(|r| r.status);

        match status {
            Some(AttendanceStatus::Present) => {
                summary.present += 1.0;
                summary.present_dates.push(key.clone());
            }
            Some(AttendanceStatus::HalfDay) => {
                summary.present += 0.5;
                summary.half_days += 1;
                summary.half_day_dates.push(key.clone());
            }
            Some(AttendanceStatus::Absent) => {
                summary.absent += 1;
                summary.absent_dates.push(key.clone());
            }
            None => {}
        }
        if status.is_some_and(|s| s.is_paid()) {
            summary.allowance += effective_allowance(None, saved, Some(employee));
        }
        summary
            .marks
            .push(DayMark::classify(status, *day, mark_sundays));
    }

    summary
}

/// A month that holds attendance, for the report picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthOption {
    pub value: String,
    pub label: String,
}

/// Months with at least one record, newest first.
///
/// Date keys that do not parse are ignored.
pub fn get_months_with_data(attendance: &AttendanceData) -> Vec<MonthOption> {
    let months: BTreeSet<MonthKey> = attendance
        .iter()
        .filter(|(_, records)| !records.is_empty())
        .filter_map(|(date, _)| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        .map(MonthKey::of)
        .collect();

    months
        .into_iter()
        .rev()
        .map(|m| MonthOption {
            value: m.to_string(),
            label: m.label(),
        })
        .collect()
}
