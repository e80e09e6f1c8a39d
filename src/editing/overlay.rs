//! Uncommitted attendance edits layered over the mirror.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::AttendanceStatus;

/// How a pending entry treats the committed status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusChange {
    /// Keep whatever the mirror holds
    #[default]
    Unchanged,
    Set(AttendanceStatus),
    /// Unmark a status the mirror holds; committed as a delete
    Cleared,
}

/// One pending edit for `(date, employee_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub date: String,
    pub employee_id: String,
    pub status: StatusChange,
    /// `None` falls back to the mirror's allowance
    pub allowance: Option<i64>,
}

/// Overlay key, `${date}-${employee_id}`.
pub fn pending_key(date: &str, employee_id: &str) -> String {
    format!("{}-{}", date, employee_id)
}

/// Pending edits of one editing session.
#[derive(Debug, Clone, Default)]
pub struct PendingOverlay {
    entries: BTreeMap<String, PendingChange>,
}

impl PendingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `(date, employee_id)`.
    ///
    /// An entry that overrides nothing is removed instead of stored.
    pub fn set_pending(
        &mut self,
        date: &str,
        employee_id: &str,
        status: StatusChange,
        allowance: Option<i64>,
    ) {
        let key = pending_key(date, employee_id);
        if status == StatusChange::Unchanged && allowance.is_none() {
            self.entries.remove(&key);
            return;
        }
        self.entries.insert(
            key,
            PendingChange {
                date: date.to_string(),
                employee_id: employee_id.to_string(),
                status,
                allowance,
            },
        );
    }

    pub fn get(&self, date: &str, employee_id: &str) -> Option<&PendingChange> {
        self.entries.get(&pending_key(date, employee_id))
    }

    pub fn remove(&mut self, date: &str, employee_id: &str) -> Option<PendingChange> {
        self.entries.remove(&pending_key(date, employee_id))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(pending_key("2024-03-02", "emp-1"), "2024-03-02-emp-1");
    }

    #[test]
    fn test_set_overwrites_entry() {
        let mut overlay = PendingOverlay::new();
        overlay.set_pending(
            "2024-03-02",
            "a",
            StatusChange::Set(AttendanceStatus::Present),
            Some(1000),
        );
        overlay.set_pending(
            "2024-03-02",
            "a",
            StatusChange::Set(AttendanceStatus::Absent),
            None,
        );

        assert_eq!(overlay.len(), 1);
        let entry = overlay.get("2024-03-02", "a").unwrap();
        assert_eq!(entry.status, StatusChange::Set(AttendanceStatus::Absent));
        assert_eq!(entry.allowance, None);
    }

    #[test]
    fn test_empty_override_is_removed() {
        let mut overlay = PendingOverlay::new();
        overlay.set_pending("2024-03-02", "a", StatusChange::Unchanged, Some(800));
        assert_eq!(overlay.len(), 1);

        overlay.set_pending("2024-03-02", "a", StatusChange::Unchanged, None);
        assert!(overlay.is_empty());
        assert!(overlay.get("2024-03-02", "a").is_none());
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut overlay = PendingOverlay::new();
        overlay.set_pending("2024-03-02", "a", StatusChange::Cleared, None);
        overlay.set_pending("2024-03-02", "b", StatusChange::Unchanged, Some(1));
        overlay.clear();
        assert!(overlay.is_empty());
    }
}
