//! Employee API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{catch_up, error, loaded_snapshot, success, with_revision, ApiResult};
use crate::errors::AppError;
use crate::models::{validate_employee_fields, CreateEmployeeRequest, Employee, UpdateEmployeeRequest};
use crate::report::{employee_summary, EmployeeMonthSummary, MonthKey};
use crate::AppState;

/// Employee list query parameters.
#[derive(Debug, Deserialize)]
pub struct EmployeeQuery {
    /// Case-insensitive name fragment.
    #[serde(default)]
    pub search: Option<String>,
}

/// GET /api/employees - List employees, optionally filtered by name.
pub async fn list_employees(
    State(state): State<AppState>,
    Query(params): Query<EmployeeQuery>,
) -> ApiResult<Vec<Employee>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_employees(params.search.as_deref()).await {
        Ok(employees) => success(employees, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/employees/:id - Get a single employee.
pub async fn get_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Employee> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_employee(&id).await {
        Ok(Some(employee)) => success(employee, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Employee {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/employees - Add an employee.
pub async fn create_employee(
    State(state): State<AppState>,
    Json(request): Json<CreateEmployeeRequest>,
) -> ApiResult<Employee> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Err(msg) =
        validate_employee_fields(Some(&request.name), request.age, request.daily_allowance)
    {
        return error(AppError::Validation(msg), revision_id);
    }

    match state.repo.create_employee(&request).await {
        Ok((employee, new_revision)) => {
            tracing::info!(employee = %employee.id, "Employee added");
            catch_up(&state, new_revision).await;
            success(employee, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/employees/:id - Update an employee.
pub async fn update_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateEmployeeRequest>,
) -> ApiResult<Employee> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Err(msg) = validate_employee_fields(
        request.name.as_deref(),
        request.age.flatten(),
        request.daily_allowance.flatten(),
    ) {
        return error(AppError::Validation(msg), revision_id);
    }

    match state.repo.update_employee(&id, &request).await {
        Ok((employee, new_revision)) => {
            catch_up(&state, new_revision).await;
            success(employee, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/employees/:id - Remove an employee and their attendance.
pub async fn delete_employee(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_employee(&id).await {
        Ok(new_revision) => {
            tracing::info!(employee = %id, "Employee removed");
            catch_up(&state, new_revision).await;
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/employees/:id/summary/:month - One employee's month.
pub async fn get_employee_summary(
    State(state): State<AppState>,
    Path((id, month)): Path<(String, String)>,
) -> ApiResult<EmployeeMonthSummary> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let month: MonthKey = month.parse().map_err(with_revision(revision_id))?;
    let summary = employee_summary(month, &snapshot, &id, state.config.mark_sundays)
        .map_err(with_revision(revision_id))?;

    success(summary, revision_id)
}
