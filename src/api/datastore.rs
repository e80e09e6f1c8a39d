//! Datastore API endpoints.

use axum::extract::State;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::RevisionInfo;
use crate::sync::MirrorSnapshot;
use crate::AppState;

/// GET /api/datastore - The mirrored employees and attendance.
///
/// Answers with `initialized: false` while the first load is in flight.
pub async fn get_datastore(State(state): State<AppState>) -> ApiResult<MirrorSnapshot> {
    let snapshot = state.mirror.snapshot();

    if snapshot.load_error.is_some() {
        if let Err(e) = snapshot.ensure_loaded() {
            return error(e, snapshot.revision_id);
        }
    }

    success((*snapshot).clone(), snapshot.revision_id)
}

/// GET /api/datastore/revision - Get the current revision info.
pub async fn get_revision(State(state): State<AppState>) -> ApiResult<RevisionInfo> {
    match state.repo.get_revision_info().await {
        Ok(info) => {
            let revision_id = info.revision_id;
            success(info, revision_id)
        }
        Err(e) => error(
            AppError::Unavailable(format!("Store unreachable: {}", e.message())),
            0,
        ),
    }
}
