//! In-process read-through copy of the attendance store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::{AttendanceStore, StoreChange};
use crate::errors::AppError;
use crate::models::{AttendanceData, AttendanceRecord, Employee};

/// Immutable view of the store as of `revision_id`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSnapshot {
    /// False until the first full load succeeds
    pub initialized: bool,
    pub revision_id: i64,
    pub generated_at: String,
    pub employees: Vec<Employee>,
    pub attendance: AttendanceData,
    /// Last load failure, cleared by the next successful load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

impl MirrorSnapshot {
    pub fn record(&self, date: &str, employee_id: &str) -> Option<&AttendanceRecord> {
        self.attendance.get(date)?.get(employee_id)
    }

    pub fn employee(&self, employee_id: &str) -> Option<&Employee> {
        self.employees.iter().find(|e| e.id == employee_id)
    }

    /// Fail with `Unavailable` while the mirror has nothing trustworthy to serve.
    pub fn ensure_loaded(&self) -> Result<(), AppError> {
        match (&self.load_error, self.initialized) {
            (_, true) => Ok(()),
            (Some(err), false) => Err(AppError::Unavailable(format!(
                "Failed to load attendance data: {}",
                err
            ))),
            (None, false) => Err(AppError::Unavailable(
                "Attendance data is still loading".to_string(),
            )),
        }
    }

    /// Records on dates inside `[from, to]`, both inclusive.
    pub fn attendance_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Iterator<Item = (&String, &BTreeMap<String, AttendanceRecord>)> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.attendance.range(from..=to)
    }
}

/// Local mirror of employees and attendance.
///
/// The snapshot is replaced wholesale after every store notification.
pub struct LocalMirror {
    snapshot: watch::Sender<Arc<MirrorSnapshot>>,
}

/// Keeps the mirror's change listener alive; dropping it unsubscribes.
pub struct MirrorSubscription {
    task: JoinHandle<()>,
}

impl Drop for MirrorSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl LocalMirror {
    /// Subscribe to `store`, perform the initial load and keep refreshing.
    pub fn start(store: Arc<dyn AttendanceStore>) -> (Arc<Self>, MirrorSubscription) {
        let (snapshot, _) = watch::channel(Arc::new(MirrorSnapshot::default()));
        let mirror = Arc::new(Self { snapshot });

        // Subscribe before the first fetch so no write slips between them.
        let changes = store.subscribe();
        let task = tokio::spawn(Self::listen(mirror.clone(), store, changes));

        (mirror, MirrorSubscription { task })
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<MirrorSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Wait until the mirror reflects at least `revision_id`.
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for_revision(&self, revision_id: i64, timeout: Duration) -> bool {
        let mut rx = self.snapshot.subscribe();
        let caught_up = async move {
            loop {
                {
                    let current = rx.borrow_and_update();
                    if current.initialized && current.revision_id >= revision_id {
                        return true;
                    }
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        match tokio::time::timeout(timeout, caught_up).await {
            Ok(reached) => reached,
            Err(_) => {
                tracing::warn!(revision_id, "Mirror did not catch up in time");
                false
            }
        }
    }

    async fn listen(
        mirror: Arc<Self>,
        store: Arc<dyn AttendanceStore>,
        mut changes: broadcast::Receiver<StoreChange>,
    ) {
        mirror.refresh(store.as_ref()).await;

        loop {
            match changes.recv().await {
                Ok(change) => {
                    if change.revision_id <= mirror.snapshot().revision_id {
                        continue;
                    }
                    tracing::debug!(kind = ?change.kind, revision_id = change.revision_id, "Store changed");
                    mirror.refresh(store.as_ref()).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Mirror lagged behind the change feed");
                    mirror.refresh(store.as_ref()).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Store change feed closed, mirror stops refreshing");
                    break;
                }
            }
        }
    }

    /// Re-fetch everything and swap the snapshot in.
    async fn refresh(&self, store: &dyn AttendanceStore) {
        match store.fetch_datastore().await {
            Ok(datastore) => {
                tracing::debug!(
                    revision_id = datastore.revision_id,
                    employees = datastore.employees.len(),
                    days = datastore.attendance.len(),
                    "Mirror refreshed"
                );
                self.snapshot.send_replace(Arc::new(MirrorSnapshot {
                    initialized: true,
                    revision_id: datastore.revision_id,
                    generated_at: datastore.generated_at,
                    employees: datastore.employees,
                    attendance: datastore.attendance,
                    load_error: None,
                }));
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to load attendance store");
                // Keep serving the last good data if there is any.
                self.snapshot.send_modify(|current| {
                    let mut next = (**current).clone();
                    next.load_error = Some(err.message());
                    *current = Arc::new(next);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database, Repository};
    use crate::models::{AttendanceStatus, AttendanceWrite, CreateEmployeeRequest, Datastore};
    use async_trait::async_trait;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    async fn repo() -> (Arc<Repository>, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        (Arc::new(Repository::new(pool)), dir)
    }

    #[tokio::test]
    async fn test_mirror_initializes_and_follows_writes() {
        let (repo, _dir) = repo().await;
        let (mirror, _subscription) = LocalMirror::start(repo.clone());

        assert!(mirror.wait_for_revision(0, WAIT).await);
        assert!(mirror.snapshot().initialized);
        assert!(mirror.snapshot().employees.is_empty());

        let (amara, _) = repo
            .create_employee(&CreateEmployeeRequest {
                name: "Amara".to_string(),
                phone: None,
                age: None,
                address: None,
                daily_allowance: None,
            })
            .await
            .unwrap();
        let revision = repo
            .apply_attendance_writes(&[AttendanceWrite::Upsert {
                date: "2024-03-02".to_string(),
                employee_id: amara.id.clone(),
                status: AttendanceStatus::Present,
                allowance: 1000,
            }])
            .await
            .unwrap();

        assert!(mirror.wait_for_revision(revision, WAIT).await);
        let snapshot = mirror.snapshot();
        assert_eq!(snapshot.employees.len(), 1);
        assert_eq!(
            snapshot.record("2024-03-02", &amara.id).map(|r| r.status),
            Some(AttendanceStatus::Present)
        );
    }

    struct BrokenStore {
        changes: broadcast::Sender<StoreChange>,
    }

    #[async_trait]
    impl AttendanceStore for BrokenStore {
        async fn fetch_datastore(&self) -> Result<Datastore, AppError> {
            Err(AppError::Database("connection refused".to_string()))
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
            self.changes.subscribe()
        }

        async fn apply_attendance(&self, _writes: &[AttendanceWrite]) -> Result<i64, AppError> {
            Err(AppError::Database("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_load_is_reported_not_empty() {
        let (changes, _) = broadcast::channel(4);
        let (mirror, _subscription) = LocalMirror::start(Arc::new(BrokenStore { changes }));

        let mut rx = mirror.snapshot.subscribe();
        rx.wait_for(|s| s.load_error.is_some()).await.unwrap();

        let snapshot = mirror.snapshot();
        assert!(!snapshot.initialized);
        assert!(matches!(
            snapshot.ensure_loaded(),
            Err(AppError::Unavailable(_))
        ));
    }

    #[test]
    fn test_uninitialized_snapshot_is_loading() {
        let snapshot = MirrorSnapshot::default();
        let err = snapshot.ensure_loaded().unwrap_err();
        assert!(err.message().contains("loading"));
    }
}
