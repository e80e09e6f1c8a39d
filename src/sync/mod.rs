//! Store-facing side of the attendance core.
//!
//! [`AttendanceStore`] is the seam between the core and whatever persists
//! employees and attendance; [`LocalMirror`] keeps a read-only copy of it
//! current by listening to the store's change feed.

mod mirror;

pub use mirror::*;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::models::{AttendanceWrite, Datastore};

/// Which collection a store write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Employees,
    Attendance,
}

/// Notification pushed by the store after every committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub kind: ChangeKind,
    pub revision_id: i64,
}

/// Durable record of employees and attendance, with change notification.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Fetch both collections in one consistent read.
    async fn fetch_datastore(&self) -> Result<Datastore, AppError>;

    /// Subscribe to change notifications. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;

    /// Apply all writes atomically and return the new revision id.
    ///
    /// Upserts are keyed by `(date, employee_id)`, so applying the same
    /// writes again leaves the store unchanged.
    async fn apply_attendance(&self, writes: &[AttendanceWrite]) -> Result<i64, AppError>;
}
