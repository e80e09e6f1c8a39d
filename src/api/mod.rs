//! REST API module.
//!
//! Contains all API routes and handlers of the attendance tracker.

mod attendance;
mod datastore;
mod employees;
mod integrity;
mod reports;
mod sessions;

pub use attendance::*;
pub use datastore::*;
pub use employees::*;
pub use integrity::*;
pub use reports::*;
pub use sessions::*;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{AppError, AppErrorWithRevision};
use crate::sync::MirrorSnapshot;
use crate::AppState;

/// How long a write handler waits for the mirror to show its own write.
const MIRROR_CATCH_UP: Duration = Duration::from_secs(2);

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub revision_id: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision_id: i64) -> Self {
        Self {
            success: true,
            data,
            revision_id,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithRevision>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, revision_id: i64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, revision_id))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, revision_id: i64) -> ApiResult<T> {
    Err(AppErrorWithRevision {
        error: err,
        revision_id,
    })
}

/// Attach `revision_id` to an error, for use with `map_err`.
fn with_revision(revision_id: i64) -> impl FnOnce(AppError) -> AppErrorWithRevision {
    move |error| AppErrorWithRevision { error, revision_id }
}

/// Current mirror snapshot, or `STORE_UNAVAILABLE` if it never loaded.
fn loaded_snapshot(state: &AppState) -> Result<Arc<MirrorSnapshot>, AppErrorWithRevision> {
    let snapshot = state.mirror.snapshot();
    snapshot
        .ensure_loaded()
        .map_err(with_revision(snapshot.revision_id))?;
    Ok(snapshot)
}

/// Let the mirror reflect `revision_id` before answering a write.
async fn catch_up(state: &AppState, revision_id: i64) {
    state
        .mirror
        .wait_for_revision(revision_id, MIRROR_CATCH_UP)
        .await;
}
