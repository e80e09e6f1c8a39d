//! Monthly report endpoints.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use super::{loaded_snapshot, success, with_revision, ApiResult};
use crate::errors::AppErrorWithRevision;
use crate::report::{
    build_monthly_report, export_file_name, get_months_with_data, write_workbook, MonthKey,
    MonthOption, MonthlyReport,
};
use crate::AppState;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// GET /api/reports/months - Months holding attendance, newest first.
pub async fn list_report_months(State(state): State<AppState>) -> ApiResult<Vec<MonthOption>> {
    let snapshot = loaded_snapshot(&state)?;
    success(get_months_with_data(&snapshot.attendance), snapshot.revision_id)
}

/// GET /api/reports/:month - Attendance grid and totals for a month.
pub async fn get_monthly_report(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> ApiResult<MonthlyReport> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let month: MonthKey = month.parse().map_err(with_revision(revision_id))?;
    success(
        build_monthly_report(month, &snapshot, state.config.mark_sundays),
        revision_id,
    )
}

/// GET /api/reports/:month/export - The month as an xlsx download.
pub async fn export_monthly_report(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<Response, AppErrorWithRevision> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let month: MonthKey = month.parse().map_err(with_revision(revision_id))?;
    let report = build_monthly_report(month, &snapshot, state.config.mark_sundays);
    let bytes = write_workbook(&report).map_err(with_revision(revision_id))?;

    tracing::info!(month = %month, employees = report.employees.len(), "Monthly report exported");

    let disposition = format!("attachment; filename=\"{}\"", export_file_name(month));
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
