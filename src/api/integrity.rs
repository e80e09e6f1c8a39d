//! Data-integrity check endpoint.

use axum::extract::{Path, State};

use super::{loaded_snapshot, success, with_revision, ApiResult};
use crate::advisor::{check_data_integrity, render_month_text, IntegrityAssessment};
use crate::report::MonthKey;
use crate::AppState;

/// POST /api/integrity/:month - Ask the advisor about a month's attendance.
///
/// Advisor failures still answer 200 with a negative assessment.
pub async fn check_month_integrity(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> ApiResult<IntegrityAssessment> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let month: MonthKey = month.parse().map_err(with_revision(revision_id))?;
    let text = render_month_text(&snapshot, month);
    tracing::info!(month = %month, lines = text.lines().count(), "Checking data integrity");

    let assessment = check_data_integrity(state.advisor.as_ref(), &text).await;
    success(assessment, revision_id)
}
