//! Editing session endpoints.
//!
//! A session holds the pending edits for one selected day. Nothing reaches
//! the store until the session is committed, except allowance edits on an
//! already committed paid day, which are written through after a quiet period.
//! Any later edit, discard, date change, commit or close of that entry
//! cancels a write-through still waiting.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Local;
use serde::{Deserialize, Serialize};

use super::{catch_up, error, loaded_snapshot, success, with_revision, ApiResult};
use crate::editing::{
    parse_date, pending_key, CommitOutcome, DATE_FORMAT, DayView, EditSession, EffectiveRecord, PendingChange,
};
use crate::models::AttendanceStatus;
use crate::sync::MirrorSnapshot;
use crate::AppState;

/// Session state as returned by every session endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    #[serde(flatten)]
    pub view: DayView,
    pub pending: Vec<PendingChange>,
}

impl SessionState {
    fn of(session: &EditSession, snapshot: &MirrorSnapshot) -> Self {
        Self {
            session_id: session.id().to_string(),
            view: session.view(snapshot),
            pending: session.overlay().iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    /// `yyyy-MM-dd`; today when absent
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectDateRequest {
    pub date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleStatusRequest {
    pub employee_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAllowanceRequest {
    pub employee_id: String,
    /// `null` reverts to the default allowance
    #[serde(default)]
    pub allowance: Option<i64>,
}

/// Effective record of the edited employee plus the whole session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResponse {
    pub record: EffectiveRecord,
    pub session: SessionState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(flatten)]
    pub outcome: CommitOutcome,
    pub session: SessionState,
}

/// POST /api/sessions - Start editing a day.
pub async fn open_session(
    State(state): State<AppState>,
    Json(request): Json<OpenSessionRequest>,
) -> ApiResult<SessionState> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let date = match request.date.as_deref() {
        Some(date) => parse_date(date).map_err(with_revision(revision_id))?,
        None => Local::now().date_naive(),
    };

    let session = state
        .sessions
        .open(date)
        .await
        .map_err(with_revision(revision_id))?;
    let session = session.lock().await;
    tracing::info!(session = %session.id(), date = %session.date_key(), "Editing session opened");

    success(SessionState::of(&session, &snapshot), revision_id)
}

/// GET /api/sessions/:id - Current day view with pending edits applied.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SessionState> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let session = state
        .sessions
        .get(&id)
        .await
        .map_err(with_revision(revision_id))?;
    let session = session.lock().await;

    success(SessionState::of(&session, &snapshot), revision_id)
}

/// DELETE /api/sessions/:id - Close a session, dropping its pending edits.
pub async fn close_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    let revision_id = state.mirror.snapshot().revision_id;

    match state.sessions.close(&id).await {
        Ok(session) => {
            cancel_allowance_writes(&state, &*session.lock().await);
            success((), revision_id)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/sessions/:id/date - Switch day; pending edits are discarded.
pub async fn select_session_date(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SelectDateRequest>,
) -> ApiResult<SessionState> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let date = parse_date(&request.date).map_err(with_revision(revision_id))?;
    let session = state
        .sessions
        .get(&id)
        .await
        .map_err(with_revision(revision_id))?;
    let mut session = session.lock().await;
    if date.format(DATE_FORMAT).to_string() != session.date_key() {
        cancel_allowance_writes(&state, &session);
    }
    session
        .select_date(date)
        .map_err(with_revision(revision_id))?;

    success(SessionState::of(&session, &snapshot), revision_id)
}

/// POST /api/sessions/:id/status - Radio-toggle one employee's status.
pub async fn toggle_session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ToggleStatusRequest>,
) -> ApiResult<EditResponse> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let session = state
        .sessions
        .get(&id)
        .await
        .map_err(with_revision(revision_id))?;
    let mut session = session.lock().await;
    let record = session
        .toggle_status(&snapshot, &request.employee_id, request.status)
        .map_err(with_revision(revision_id))?;
    state
        .allowance_debouncer
        .cancel(&pending_key(&session.date_key(), &request.employee_id));

    success(
        EditResponse {
            record,
            session: SessionState::of(&session, &snapshot),
        },
        revision_id,
    )
}

/// PUT /api/sessions/:id/allowance - Override one employee's allowance.
pub async fn set_session_allowance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetAllowanceRequest>,
) -> ApiResult<EditResponse> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let session = state
        .sessions
        .get(&id)
        .await
        .map_err(with_revision(revision_id))?;
    let mut session = session.lock().await;
    let record = session
        .set_allowance(&snapshot, &request.employee_id, request.allowance)
        .map_err(with_revision(revision_id))?;

    let date = session.date_key();
    if session
        .allowance_write(&snapshot, &date, &request.employee_id)
        .is_some()
    {
        schedule_allowance_write(&state, &id, &date, &request.employee_id);
    } else {
        state
            .allowance_debouncer
            .cancel(&pending_key(&date, &request.employee_id));
    }

    success(
        EditResponse {
            record,
            session: SessionState::of(&session, &snapshot),
        },
        revision_id,
    )
}

/// DELETE /api/sessions/:id/pending - Discard every pending edit.
pub async fn discard_session_changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SessionState> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let session = state
        .sessions
        .get(&id)
        .await
        .map_err(with_revision(revision_id))?;
    let mut session = session.lock().await;
    cancel_allowance_writes(&state, &session);
    session.discard();

    success(SessionState::of(&session, &snapshot), revision_id)
}

/// POST /api/sessions/:id/commit - Write all pending edits in one batch.
///
/// The session stays locked until the store answers, so edits made
/// meanwhile queue behind the commit instead of being lost by it.
pub async fn commit_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CommitResponse> {
    let snapshot = loaded_snapshot(&state)?;
    let revision_id = snapshot.revision_id;

    let session = state
        .sessions
        .get(&id)
        .await
        .map_err(with_revision(revision_id))?;
    let mut session = session.lock().await;
    cancel_allowance_writes(&state, &session);

    let outcome = session
        .commit(&snapshot, state.repo.as_ref())
        .await
        .map_err(with_revision(revision_id))?;

    catch_up(&state, outcome.revision_id).await;
    let snapshot = state.mirror.snapshot();

    success(
        CommitResponse {
            outcome,
            session: SessionState::of(&session, &snapshot),
        },
        outcome.revision_id,
    )
}

/// Debounced write-through of an allowance edit, keyed by `(date, employee)`.
///
/// The write is rebuilt from the session when the quiet period ends, so an
/// entry changed or dropped in the meantime writes nothing.
fn schedule_allowance_write(state: &AppState, session_id: &str, date: &str, employee_id: &str) {
    let key = pending_key(date, employee_id);
    let sessions = state.sessions.clone();
    let mirror = state.mirror.clone();
    let repo = state.repo.clone();
    let session_id = session_id.to_string();
    let date = date.to_string();
    let employee_id = employee_id.to_string();

    state.allowance_debouncer.schedule(key.clone(), async move {
        let Ok(session) = sessions.get(&session_id).await else {
            tracing::debug!(key = %key, "Session gone, allowance write-through dropped");
            return;
        };
        // Held across the write so a commit cannot interleave with it.
        let session = session.lock().await;
        let Some(write) = session.allowance_write(&mirror.snapshot(), &date, &employee_id) else {
            tracing::debug!(key = %key, "Allowance edit superseded, nothing written through");
            return;
        };
        match repo.apply_attendance_writes(&[write]).await {
            Ok(revision_id) => {
                tracing::debug!(key = %key, revision_id, "Allowance written through")
            }
            Err(e) => tracing::error!(key = %key, error = %e, "Allowance write-through failed"),
        }
    });
}

/// Cancel the write-through of every entry `session` still holds.
fn cancel_allowance_writes(state: &AppState, session: &EditSession) {
    for change in session.overlay().iter() {
        state
            .allowance_debouncer
            .cancel(&pending_key(&change.date, &change.employee_id));
    }
}
