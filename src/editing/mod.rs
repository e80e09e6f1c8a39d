//! Attendance editing sessions.
//!
//! An [`EditSession`] owns a [`PendingOverlay`] for one selected date. Edits
//! land in the overlay immediately and are only written to the store by
//! [`EditSession::commit`], which drains the whole overlay in one batch.

mod debounce;
mod overlay;
pub mod resolver;

pub use debounce::Debouncer;
pub use overlay::{pending_key, PendingChange, PendingOverlay};
pub use resolver::{DayView, EffectiveRecord};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::errors::AppError;
use crate::models::{AttendanceStatus, AttendanceWrite};
use crate::sync::{AttendanceStore, MirrorSnapshot};

/// Calendar date format used for attendance keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `yyyy-MM-dd` date.
pub fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| AppError::Validation(format!("Invalid date '{}', expected yyyy-MM-dd", value)))
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub revision_id: i64,
    pub upserted: usize,
    pub deleted: usize,
}

/// Editing state for one attendance day.
#[derive(Debug)]
pub struct EditSession {
    id: String,
    date: NaiveDate,
    overlay: PendingOverlay,
}

impl EditSession {
    pub fn new(id: impl Into<String>, date: NaiveDate) -> Result<Self, AppError> {
        ensure_not_future(date)?;
        Ok(Self {
            id: id.into(),
            date,
            overlay: PendingOverlay::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn date_key(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn overlay(&self) -> &PendingOverlay {
        &self.overlay
    }

    /// Switch to another day. Pending edits of the old day are discarded.
    pub fn select_date(&mut self, date: NaiveDate) -> Result<(), AppError> {
        ensure_not_future(date)?;
        if date != self.date {
            if !self.overlay.is_empty() {
                tracing::info!(
                    session = %self.id,
                    discarded = self.overlay.len(),
                    "Date changed, discarding pending attendance edits"
                );
            }
            self.overlay.clear();
            self.date = date;
        }
        Ok(())
    }

    /// Discard every pending edit.
    pub fn discard(&mut self) {
        self.overlay.clear();
    }

    pub fn toggle_status(
        &mut self,
        snapshot: &MirrorSnapshot,
        employee_id: &str,
        status: AttendanceStatus,
    ) -> Result<EffectiveRecord, AppError> {
        ensure_employee(snapshot, employee_id)?;
        let date = self.date_key();
        Ok(resolver::toggle_status(
            snapshot,
            &mut self.overlay,
            &date,
            employee_id,
            status,
        ))
    }

    pub fn set_allowance(
        &mut self,
        snapshot: &MirrorSnapshot,
        employee_id: &str,
        allowance: Option<i64>,
    ) -> Result<EffectiveRecord, AppError> {
        ensure_employee(snapshot, employee_id)?;
        if matches!(allowance, Some(amount) if amount < 0) {
            return Err(AppError::Validation(
                "Allowance cannot be negative".to_string(),
            ));
        }
        let date = self.date_key();
        Ok(resolver::set_allowance(
            snapshot,
            &mut self.overlay,
            &date,
            employee_id,
            allowance,
        ))
    }

    pub fn view(&self, snapshot: &MirrorSnapshot) -> DayView {
        resolver::day_view(snapshot, &self.overlay, &self.date_key())
    }

    /// Write-through for a pending allowance edit on `date`, built from the
    /// session as it stands now.
    ///
    /// Only a day that is already committed with an unchanged paid status
    /// qualifies. `None` once the entry was discarded, committed, moved to
    /// another date or had its status changed.
    pub fn allowance_write(
        &self,
        snapshot: &MirrorSnapshot,
        date: &str,
        employee_id: &str,
    ) -> Option<AttendanceWrite> {
        if date != self.date_key() {
            return None;
        }
        let edited = self.overlay.get(date, employee_id)?;
        edited.allowance?;
        let saved = snapshot.record(date, employee_id)?;
        let effective = resolver::resolve(snapshot, &self.overlay, date, employee_id);
        match effective.status {
            Some(status) if status == saved.status && status.is_paid() => {
                Some(AttendanceWrite::Upsert {
                    date: date.to_string(),
                    employee_id: employee_id.to_string(),
                    status,
                    allowance: effective.allowance,
                })
            }
            _ => None,
        }
    }

    /// Translate the overlay into store writes.
    ///
    /// Entries resolving to a status become upserts carrying the effective
    /// allowance; cleared entries become deletes; an allowance-only entry
    /// on an unmarked day writes nothing.
    ///
    /// Entries for employees missing from `snapshot` were deleted after the
    /// edit and are skipped.
    pub fn pending_writes(&self, snapshot: &MirrorSnapshot) -> Vec<AttendanceWrite> {
        self.overlay
            .iter()
            .filter(|change| {
                let known = snapshot.employee(&change.employee_id).is_some();
                if !known {
                    tracing::warn!(
                        session = %self.id,
                        date = %change.date,
                        employee_id = %change.employee_id,
                        "Dropping pending edit for deleted employee"
                    );
                }
                known
            })
            .filter_map(|change| {
                let saved = snapshot.record(&change.date, &change.employee_id);
                let effective =
                    resolver::resolve(snapshot, &self.overlay, &change.date, &change.employee_id);
                match effective.status {
                    Some(status) => Some(AttendanceWrite::Upsert {
                        date: change.date.clone(),
                        employee_id: change.employee_id.clone(),
                        status,
                        allowance: effective.allowance,
                    }),
                    None if saved.is_some() => Some(AttendanceWrite::Delete {
                        date: change.date.clone(),
                        employee_id: change.employee_id.clone(),
                    }),
                    None => None,
                }
            })
            .collect()
    }

    /// Write every pending edit in one batch.
    ///
    /// On failure nothing is cleared so the caller can retry.
    pub async fn commit(
        &mut self,
        snapshot: &MirrorSnapshot,
        store: &dyn AttendanceStore,
    ) -> Result<CommitOutcome, AppError> {
        if self.overlay.is_empty() {
            return Ok(CommitOutcome {
                revision_id: snapshot.revision_id,
                upserted: 0,
                deleted: 0,
            });
        }

        let writes = self.pending_writes(snapshot);
        let deleted = writes
            .iter()
            .filter(|w| matches!(w, AttendanceWrite::Delete { .. }))
            .count();
        let upserted = writes.len() - deleted;

        let revision_id = match store.apply_attendance(&writes).await {
            Ok(revision_id) => revision_id,
            Err(err) => {
                tracing::error!(
                    session = %self.id,
                    pending = self.overlay.len(),
                    error = %err,
                    "Attendance commit failed, keeping pending edits"
                );
                return Err(err);
            }
        };

        tracing::info!(
            session = %self.id,
            date = %self.date_key(),
            upserted,
            deleted,
            revision_id,
            "Attendance committed"
        );
        self.overlay.clear();

        Ok(CommitOutcome {
            revision_id,
            upserted,
            deleted,
        })
    }
}

fn ensure_not_future(date: NaiveDate) -> Result<(), AppError> {
    if date > Local::now().date_naive() {
        return Err(AppError::Validation(
            "Attendance cannot be marked for a future date".to_string(),
        ));
    }
    Ok(())
}

fn ensure_employee(snapshot: &MirrorSnapshot, employee_id: &str) -> Result<(), AppError> {
    snapshot
        .employee(employee_id)
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", employee_id)))
}

struct SessionSlot {
    session: Arc<Mutex<EditSession>>,
    last_used: Instant,
}

/// Open editing sessions, one per client.
///
/// Sessions untouched for longer than the idle timeout are evicted along
/// with their pending edits.
pub struct SessionRegistry {
    idle_timeout: Duration,
    sessions: RwLock<HashMap<String, SessionSlot>>,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn open(&self, date: NaiveDate) -> Result<Arc<Mutex<EditSession>>, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(EditSession::new(id.clone(), date)?));
        self.evict_idle().await;
        self.sessions.write().await.insert(
            id,
            SessionSlot {
                session: session.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(session)
    }

    /// Look up a session and mark it as used.
    pub async fn get(&self, id: &str) -> Result<Arc<Mutex<EditSession>>, AppError> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(id)
            .filter(|slot| slot.last_used.elapsed() <= self.idle_timeout)
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))?;
        slot.last_used = Instant::now();
        Ok(slot.session.clone())
    }

    /// Close a session, dropping its pending edits.
    pub async fn close(&self, id: &str) -> Result<Arc<Mutex<EditSession>>, AppError> {
        self.sessions
            .write()
            .await
            .remove(id)
            .map(|slot| slot.session)
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))
    }

    /// Drop sessions idle for longer than the timeout. Returns how many went.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| slot.last_used.elapsed() <= self.idle_timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, open = sessions.len(), "Evicted idle editing sessions");
        }
        evicted
    }
}
