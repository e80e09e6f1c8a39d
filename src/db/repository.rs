//! Database repository for CRUD operations.
//!
//! Every write runs in a transaction that also bumps the datastore revision,
//! and is announced on the change feed once committed.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::models::{
    group_by_date, AttendanceRow, AttendanceStatus, AttendanceWrite, CreateEmployeeRequest,
    Datastore, Employee, RevisionInfo, UpdateEmployeeRequest,
};
use crate::sync::{AttendanceStore, ChangeKind, StoreChange};

/// Buffered notifications before a slow subscriber starts lagging.
const CHANGE_FEED_CAPACITY: usize = 64;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    fn publish(&self, kind: ChangeKind, revision_id: i64) {
        // No receivers is fine: nobody is mirroring yet.
        let _ = self.changes.send(StoreChange { kind, revision_id });
        tracing::debug!(?kind, revision_id, "Published store change");
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Get the full datastore from a single read transaction.
    pub async fn get_datastore(&self) -> Result<Datastore, AppError> {
        let mut tx = self.pool.begin().await?;

        let meta =
            sqlx::query("SELECT schema_version, revision_id, generated_at FROM meta WHERE id = 1")
                .fetch_one(&mut *tx)
                .await?;

        let employees = sqlx::query(
            "SELECT id, name, phone, age, address, daily_allowance, created_at FROM employees ORDER BY name COLLATE NOCASE",
        )
        .fetch_all(&mut *tx)
        .await?;

        let attendance = sqlx::query(
            "SELECT date, employee_id, status, allowance FROM attendance ORDER BY date, employee_id",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Datastore {
            schema_version: meta.get("schema_version"),
            revision_id: meta.get("revision_id"),
            generated_at: meta.get("generated_at"),
            employees: employees.iter().map(employee_from_row).collect(),
            attendance: group_by_date(attendance.iter().filter_map(attendance_from_row)),
        })
    }

    // ==================== EMPLOYEE OPERATIONS ====================

    /// List employees, optionally filtered by a case-insensitive name fragment.
    pub async fn list_employees(&self, search: Option<&str>) -> Result<Vec<Employee>, AppError> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());

        let rows = match search {
            Some(term) => {
                sqlx::query(
                    "SELECT id, name, phone, age, address, daily_allowance, created_at FROM employees WHERE instr(lower(name), lower(?)) > 0 ORDER BY name COLLATE NOCASE",
                )
                .bind(term)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, name, phone, age, address, daily_allowance, created_at FROM employees ORDER BY name COLLATE NOCASE",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(employee_from_row).collect())
    }

    /// Get an employee by ID.
    pub async fn get_employee(&self, id: &str) -> Result<Option<Employee>, AppError> {
        let row = sqlx::query(
            "SELECT id, name, phone, age, address, daily_allowance, created_at FROM employees WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(employee_from_row))
    }

    /// Create a new employee.
    pub async fn create_employee(
        &self,
        request: &CreateEmployeeRequest,
    ) -> Result<(Employee, i64), AppError> {
        let employee = Employee {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            phone: non_empty(request.phone.clone()),
            age: request.age,
            address: non_empty(request.address.clone()),
            daily_allowance: request.daily_allowance,
            created_at: Utc::now().to_rfc3339(),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO employees (id, name, phone, age, address, daily_allowance, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&employee.id)
        .bind(&employee.name)
        .bind(&employee.phone)
        .bind(employee.age)
        .bind(&employee.address)
        .bind(employee.daily_allowance)
        .bind(&employee.created_at)
        .execute(&mut *tx)
        .await?;

        let revision_id = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.publish(ChangeKind::Employees, revision_id);
        Ok((employee, revision_id))
    }

    /// Update an employee. Last writer wins; absent fields keep their value
    /// and an explicit `null` clears an optional one.
    pub async fn update_employee(
        &self,
        id: &str,
        request: &UpdateEmployeeRequest,
    ) -> Result<(Employee, i64), AppError> {
        let existing = self
            .get_employee(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", id)))?;

        let employee = Employee {
            id: existing.id,
            name: request
                .name
                .as_deref()
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.name),
            phone: request.phone.clone().map_or(existing.phone, non_empty),
            age: request.age.unwrap_or(existing.age),
            address: request.address.clone().map_or(existing.address, non_empty),
            daily_allowance: request.daily_allowance.unwrap_or(existing.daily_allowance),
            created_at: existing.created_at,
        };

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE employees SET name = ?, phone = ?, age = ?, address = ?, daily_allowance = ? WHERE id = ?",
        )
        .bind(&employee.name)
        .bind(&employee.phone)
        .bind(employee.age)
        .bind(&employee.address)
        .bind(employee.daily_allowance)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Employee {} not found", id)));
        }

        let revision_id = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.publish(ChangeKind::Employees, revision_id);
        Ok((employee, revision_id))
    }

    /// Delete an employee together with their attendance rows.
    pub async fn delete_employee(&self, id: &str) -> Result<i64, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM attendance WHERE employee_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Employee {} not found", id)));
        }

        let revision_id = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.publish(ChangeKind::Employees, revision_id);
        Ok(revision_id)
    }

    // ==================== ATTENDANCE OPERATIONS ====================

    /// List all attendance rows.
    #[cfg(test)]
    pub async fn list_attendance(&self) -> Result<Vec<AttendanceRow>, AppError> {
        let rows = sqlx::query(
            "SELECT date, employee_id, status, allowance FROM attendance ORDER BY date, employee_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(attendance_from_row).collect())
    }

    /// Apply a batch of attendance writes in one transaction.
    pub async fn apply_attendance_writes(
        &self,
        writes: &[AttendanceWrite],
    ) -> Result<i64, AppError> {
        if writes.is_empty() {
            return self.get_revision_id().await;
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for write in writes {
            match write {
                AttendanceWrite::Upsert {
                    date,
                    employee_id,
                    status,
                    allowance,
                } => {
                    sqlx::query(
                        r#"INSERT INTO attendance (date, employee_id, status, allowance, updated_at)
                           VALUES (?, ?, ?, ?, ?)
                           ON CONFLICT(date, employee_id) DO UPDATE SET
                               status = excluded.status,
                               allowance = excluded.allowance,
                               updated_at = excluded.updated_at"#,
                    )
                    .bind(date)
                    .bind(employee_id)
                    .bind(status.as_str())
                    .bind(allowance)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;
                }
                AttendanceWrite::Delete { date, employee_id } => {
                    sqlx::query("DELETE FROM attendance WHERE date = ? AND employee_id = ?")
                        .bind(date)
                        .bind(employee_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        // Increment revision once for the entire batch
        let revision_id = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.publish(ChangeKind::Attendance, revision_id);
        Ok(revision_id)
    }
}

#[async_trait]
impl AttendanceStore for Repository {
    async fn fetch_datastore(&self) -> Result<Datastore, AppError> {
        self.get_datastore().await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    async fn apply_attendance(&self, writes: &[AttendanceWrite]) -> Result<i64, AppError> {
        self.apply_attendance_writes(writes).await
    }
}

async fn bump_revision(conn: &mut SqliteConnection) -> Result<i64, AppError> {
    let now = Utc::now().to_rfc3339();
    let row = sqlx::query(
        "UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1 RETURNING revision_id",
    )
    .bind(&now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.get("revision_id"))
}

// Helper functions for row conversion

fn employee_from_row(row: &sqlx::sqlite::SqliteRow) -> Employee {
    Employee {
        id: row.get("id"),
        name: row.get("name"),
        phone: row.get("phone"),
        age: row.get("age"),
        address: row.get("address"),
        daily_allowance: row.get("daily_allowance"),
        created_at: row.get("created_at"),
    }
}

fn attendance_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<AttendanceRow> {
    let status: String = row.get("status");
    let Some(status) = AttendanceStatus::parse(&status) else {
        tracing::warn!(status = %status, "Skipping attendance row with unknown status");
        return None;
    };
    Some(AttendanceRow {
        date: row.get("date"),
        employee_id: row.get("employee_id"),
        status,
        allowance: row.get("allowance"),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
