//! Effective attendance: the overlay merged field by field over the mirror.

use serde::Serialize;

use super::overlay::{PendingChange, PendingOverlay, StatusChange};
use crate::models::{AttendanceRecord, AttendanceStatus, Employee, DEFAULT_DAILY_ALLOWANCE};
use crate::sync::MirrorSnapshot;

/// What the tracker shows for one employee on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveRecord {
    /// `None` means unmarked
    pub status: Option<AttendanceStatus>,
    pub allowance: i64,
}

/// Overlay status if it sets or clears one, else the mirror's.
pub fn effective_status(
    pending: Option<&PendingChange>,
    saved: Option<&AttendanceRecord>,
) -> Option<AttendanceStatus> {
    match pending.map(|p| p.status) {
        Some(StatusChange::Set(status)) => Some(status),
        Some(StatusChange::Cleared) => None,
        Some(StatusChange::Unchanged) | None => saved.map(|r| r.status),
    }
}

/// Overlay allowance, then mirror, then employee default, then 1000.
pub fn effective_allowance(
    pending: Option<&PendingChange>,
    saved: Option<&AttendanceRecord>,
    employee: Option<&Employee>,
) -> i64 {
    pending
        .and_then(|p| p.allowance)
        .or_else(|| saved.and_then(|r| r.allowance))
        .unwrap_or_else(|| employee.map_or(DEFAULT_DAILY_ALLOWANCE, Employee::default_allowance))
}

pub fn resolve(
    snapshot: &MirrorSnapshot,
    overlay: &PendingOverlay,
    date: &str,
    employee_id: &str,
) -> EffectiveRecord {
    let pending = overlay.get(date, employee_id);
    let saved = snapshot.record(date, employee_id);
    EffectiveRecord {
        status: effective_status(pending, saved),
        allowance: effective_allowance(pending, saved, snapshot.employee(employee_id)),
    }
}

/// Radio-toggle `requested`: marking the active status again unmarks the day.
pub fn toggle_status(
    snapshot: &MirrorSnapshot,
    overlay: &mut PendingOverlay,
    date: &str,
    employee_id: &str,
    requested: AttendanceStatus,
) -> EffectiveRecord {
    let current = resolve(snapshot, overlay, date, employee_id);

    if current.status == Some(requested) {
        if snapshot.record(date, employee_id).is_some() {
            // Dropping the entry would bring the committed status back.
            let allowance = overlay.get(date, employee_id).and_then(|p| p.allowance);
            overlay.set_pending(date, employee_id, StatusChange::Cleared, allowance);
        } else {
            overlay.remove(date, employee_id);
        }
    } else {
        overlay.set_pending(
            date,
            employee_id,
            StatusChange::Set(requested),
            Some(current.allowance),
        );
    }

    resolve(snapshot, overlay, date, employee_id)
}

/// Override the allowance only; `None` reverts to the fallback chain.
pub fn set_allowance(
    snapshot: &MirrorSnapshot,
    overlay: &mut PendingOverlay,
    date: &str,
    employee_id: &str,
    allowance: Option<i64>,
) -> EffectiveRecord {
    let status = overlay
        .get(date, employee_id)
        .map(|p| p.status)
        .unwrap_or_default();
    overlay.set_pending(date, employee_id, status, allowance);
    resolve(snapshot, overlay, date, employee_id)
}

/// Sum of effective allowances of everyone present or on a half day.
///
/// Half days are paid the full daily figure.
pub fn daily_total_allowance(snapshot: &MirrorSnapshot, overlay: &PendingOverlay, date: &str) -> i64 {
    snapshot
        .employees
        .iter()
        .map(|e| resolve(snapshot, overlay, date, &e.id))
        .filter(|r| r.status.is_some_and(|s| s.is_paid()))
        .map(|r| r.allowance)
        .sum()
}

/// One employee row of a day view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayEntry {
    pub employee_id: String,
    pub name: String,
    pub status: Option<AttendanceStatus>,
    pub allowance: i64,
    /// Allowance input is only live for paid days
    pub allowance_editable: bool,
    pub pending: bool,
}

/// Attendance for one date, as the tracker renders it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayView {
    pub date: String,
    pub entries: Vec<DayEntry>,
    pub total_allowance: i64,
    pub pending_changes: usize,
}

pub fn day_view(snapshot: &MirrorSnapshot, overlay: &PendingOverlay, date: &str) -> DayView {
    let entries = snapshot
        .employees
        .iter()
        .map(|employee| {
            let effective = resolve(snapshot, overlay, date, &employee.id);
            DayEntry {
                employee_id: employee.id.clone(),
                name: employee.name.clone(),
                status: effective.status,
                allowance: effective.allowance,
                allowance_editable: effective.status.is_some_and(|s| s.is_paid()),
                pending: overlay.get(date, &employee.id).is_some(),
            }
        })
        .collect();

    DayView {
        date: date.to_string(),
        entries,
        total_allowance: daily_total_allowance(snapshot, overlay, date),
        pending_changes: overlay.len(),
    }
}
