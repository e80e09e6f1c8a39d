//! Attendance records and the writes that change them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attendance mark for one employee on one day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceStatus {
    Present,
    HalfDay,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::HalfDay => "half-day",
            AttendanceStatus::Absent => "absent",
        }
    }

    /// Parse a stored status. Unknown strings mean "unmarked".
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "half-day" => Some(AttendanceStatus::HalfDay),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    /// Whether an allowance is paid for this mark.
    pub fn is_paid(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::HalfDay)
    }

    /// Human-readable label, as shown in the tracker.
    pub fn label(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::HalfDay => "Half Day",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed attendance entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub status: AttendanceStatus,
    #[serde(default)]
    pub allowance: Option<i64>,
}

/// One row of the attendance table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub date: String,
    pub employee_id: String,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub allowance: Option<i64>,
}

/// `date (yyyy-MM-dd) -> employee id -> record`.
pub type AttendanceData = BTreeMap<String, BTreeMap<String, AttendanceRecord>>;

/// Group flat attendance rows into the date-keyed map.
pub fn group_by_date(rows: impl IntoIterator<Item = AttendanceRow>) -> AttendanceData {
    let mut data = AttendanceData::new();
    for row in rows {
        data.entry(row.date).or_default().insert(
            row.employee_id,
            AttendanceRecord {
                status: row.status,
                allowance: row.allowance,
            },
        );
    }
    data
}

/// A single change to apply to the attendance table, keyed by `(date, employee_id)`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceWrite {
    Upsert {
        date: String,
        employee_id: String,
        status: AttendanceStatus,
        allowance: i64,
    },
    Delete {
        date: String,
        employee_id: String,
    },
}
