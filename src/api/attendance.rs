//! Committed attendance, read-only.

use axum::extract::{Path, State};

use super::{loaded_snapshot, success, with_revision, ApiResult};
use crate::editing::{parse_date, resolver, DayView, PendingOverlay, DATE_FORMAT};
use crate::AppState;

/// GET /api/attendance/:date - Committed day view with its total allowance.
pub async fn get_attendance_day(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<DayView> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let date = parse_date(&date).map_err(with_revision(revision_id))?;
    let key = date.format(DATE_FORMAT).to_string();
    let view = resolver::day_view(&snapshot, &PendingOverlay::new(), &key);

    success(view, revision_id)
}
