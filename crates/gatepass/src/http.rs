//! Axum HTTP handlers for the gatepass server.
//!
//! Two surfaces share one router: the directory bridge used by remote
//! terminals (`/api/...`) and the gate terminal driven by a local UI
//! (`/session/...`).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gatepass_core::{CardId, IdentityId, IdentityRecord};
use gatepass_directory::wire::{
    RegisterRequest, RegisterResponse, VerifyCardRequest, VerifyCardResponse,
};
use gatepass_directory::DirectoryError;
use gatepass_policy::Verdict;
use gatepass_session::{SessionError, SessionResult, SessionState};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::{escort_requested, GateState, RootError};

/// How long `/session/escort` waits for the answered cycle to settle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared application state for Axum handlers.
pub type AppState = GateState;

/// Build the Axum router with all endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/verify-card", post(handle_verify_card))
        .route("/api/register", post(handle_register))
        .route("/api/identities", post(handle_create_identity))
        .route("/api/identities/pending", get(handle_pending))
        .route("/api/identities/{id}/bind", post(handle_bind))
        .route("/session", get(handle_session))
        .route("/session/scan", post(handle_scan))
        .route("/session/manual", post(handle_manual))
        .route("/session/escort", post(handle_escort))
        .route("/session/reset", post(handle_reset))
        .route("/session/log", get(handle_log))
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn root_error_response(err: RootError) -> Response {
    match err {
        RootError::Unsupported(msg) => error_body(StatusCode::NOT_IMPLEMENTED, msg),
        RootError::Directory(e) => directory_error_response(e),
        RootError::Session(e) => session_error_response(e),
        other => {
            error!(error = %other, "request failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn directory_error_response(err: DirectoryError) -> Response {
    let status = match &err {
        DirectoryError::IdentityNotFound(_) => StatusCode::NOT_FOUND,
        DirectoryError::CardAlreadyBound { .. } | DirectoryError::AlreadyBound { .. } => {
            StatusCode::CONFLICT
        }
        DirectoryError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
        DirectoryError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, err.to_string())
}

fn session_error_response(err: SessionError) -> Response {
    let status = match &err {
        SessionError::Busy | SessionError::Cancelled | SessionError::NoPendingQuestion => {
            StatusCode::CONFLICT
        }
        SessionError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, err.to_string())
}

fn verdict_body(verdict: &Verdict) -> serde_json::Value {
    json!({
        "state": SessionState::Resolved,
        "status": verdict.status_label(),
        "verdict": verdict,
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// GET /health -- server info
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "directory": state.mode(),
        "session": state.session.state(),
    }))
}

// ---------------------------------------------------------------------------
// Directory bridge
// ---------------------------------------------------------------------------

/// POST /api/verify-card -- resolve a card for a remote terminal
async fn handle_verify_card(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyCardRequest>,
) -> Response {
    let store = match state.local_store() {
        Ok(store) => store,
        Err(e) => return root_error_response(e),
    };
    match store.find_by_card(&req.card_id) {
        Ok(Some(identity)) => Json(VerifyCardResponse::found(identity)).into_response(),
        Ok(None) => Json(VerifyCardResponse::not_found()).into_response(),
        Err(e) => {
            error!(error = %e, "card lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "directory lookup failed" })),
            )
                .into_response()
        }
    }
}

/// POST /api/register -- persist a decision reported by a remote terminal
async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let store = match state.local_store() {
        Ok(store) => store,
        Err(e) => return root_error_response(e),
    };
    match store.record_registration(&req.into()) {
        Ok(()) => Json(RegisterResponse {
            success: true,
            message: None,
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "registration failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RegisterResponse {
                    success: false,
                    message: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct CreateIdentityRequest {
    #[serde(flatten)]
    identity: IdentityRecord,
    #[serde(default)]
    email: Option<String>,
}

/// POST /api/identities -- enroll a person
async fn handle_create_identity(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateIdentityRequest>,
) -> Response {
    let result = state.local_store().and_then(|store| {
        store
            .insert_identity(&req.identity, req.email.as_deref())
            .map_err(RootError::from)
    });
    match result {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "identity_id": id }))).into_response(),
        Err(e) => root_error_response(e),
    }
}

/// GET /api/identities/pending -- people still waiting for a card
async fn handle_pending(State(state): State<Arc<AppState>>) -> Response {
    let result = state
        .local_store()
        .and_then(|store| store.pending_binding().map_err(RootError::from));
    match result {
        Ok(pending) => Json(json!({ "total": pending.len(), "identities": pending })).into_response(),
        Err(e) => root_error_response(e),
    }
}

#[derive(Deserialize)]
struct BindRequest {
    card_id: CardId,
}

/// POST /api/identities/{id}/bind -- assign a card
async fn handle_bind(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<BindRequest>,
) -> Response {
    let result = state.local_store().and_then(|store| {
        store
            .bind_card(&IdentityId::new(id), &req.card_id)
            .map_err(RootError::from)
    });
    match result {
        Ok(identity) => Json(identity).into_response(),
        Err(e) => root_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Gate terminal
// ---------------------------------------------------------------------------

/// GET /session -- current state, verdict and pending question
async fn handle_session(State(state): State<Arc<AppState>>) -> Response {
    match state.session.snapshot() {
        Ok(snapshot) => {
            let status = snapshot.verdict.as_ref().map(|v| v.status_label());
            Json(json!({
                "state": snapshot.state,
                "status": status,
                "verdict": snapshot.verdict,
                "awaiting": snapshot.awaiting,
            }))
            .into_response()
        }
        Err(e) => session_error_response(e),
    }
}

/// Run a cycle in the background and reply as soon as it either finishes or
/// suspends for an escort answer. A suspended cycle keeps running and is
/// completed by `/session/escort` or dropped by `/session/reset`.
async fn run_cycle<F>(state: Arc<AppState>, cycle: F) -> Response
where
    F: Future<Output = SessionResult<Verdict>> + Send + 'static,
{
    let mut status = state.session.subscribe();
    let after = status.borrow_and_update().cycle;
    let mut handle = tokio::spawn(cycle);

    tokio::select! {
        joined = &mut handle => match joined {
            Ok(Ok(verdict)) => Json(verdict_body(&verdict)).into_response(),
            Ok(Err(e)) => session_error_response(e),
            Err(e) => {
                error!(error = %e, "session task failed");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "session task failed")
            }
        },
        _ = escort_requested(&mut status, after) => {
            let awaiting = state.session.snapshot().ok().and_then(|s| s.awaiting);
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "state": SessionState::AwaitingEscort,
                    "awaiting": awaiting,
                    "question": "Is the minor accompanied by an adult?",
                })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct ScanRequest {
    card_id: CardId,
}

/// POST /session/scan -- a card was presented
async fn handle_scan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> Response {
    let session = state.session.clone();
    run_cycle(state, async move { session.scan(req.card_id).await }).await
}

#[derive(Deserialize)]
struct ManualRequest {
    identity_id: IdentityId,
}

/// POST /session/manual -- the operator picked a person from the list
async fn handle_manual(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManualRequest>,
) -> Response {
    let identity = match state.find_identity(&req.identity_id) {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return error_body(
                StatusCode::NOT_FOUND,
                format!("identity not found: {}", req.identity_id),
            )
        }
        Err(e) => return root_error_response(e),
    };
    let session = state.session.clone();
    run_cycle(state, async move { session.evaluate_manual(identity).await }).await
}

#[derive(Deserialize)]
struct EscortRequest {
    accompanied: bool,
}

/// POST /session/escort -- answer the pending escort question
async fn handle_escort(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EscortRequest>,
) -> Response {
    if state.session.state() == SessionState::AwaitingEscort {
        // The question is parked a moment after the state flips
        let _ = tokio::time::timeout(SETTLE_TIMEOUT, state.prompt.question_parked()).await;
    }

    let mut status = state.session.subscribe();
    if let Err(e) = state.prompt.answer(req.accompanied) {
        return session_error_response(e);
    }

    let _ = tokio::time::timeout(SETTLE_TIMEOUT, async {
        while status.borrow_and_update().state == SessionState::AwaitingEscort {
            if status.changed().await.is_err() {
                break;
            }
        }
    })
    .await;

    match state.session.verdict() {
        Some(verdict) => Json(verdict_body(&verdict)).into_response(),
        None => handle_session(State(state)).await,
    }
}

/// POST /session/reset -- discard the verdict and any pending question
async fn handle_reset(State(state): State<Arc<AppState>>) -> Response {
    match state.session.reset() {
        Ok(()) => Json(json!({ "state": state.session.state() })).into_response(),
        Err(e) => session_error_response(e),
    }
}

#[derive(Deserialize)]
struct LogQuery {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    20
}

/// GET /session/log -- decisions taken by this terminal since start-up
async fn handle_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Response {
    let entries = match state.audit_log.recent(query.limit) {
        Ok(entries) => entries,
        Err(e) => return session_error_response(e),
    };
    let chain_valid = state.audit_log.verify_chain().unwrap_or(false);
    Json(json!({
        "total": state.audit_log.len(),
        "appended": state.audit_log.appended(),
        "chain_valid": chain_valid,
        "entries": entries,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_status_codes() {
        assert_eq!(
            session_error_response(SessionError::Busy).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            session_error_response(SessionError::Unreachable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            session_error_response(SessionError::Prompt("closed".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_directory_error_status_codes() {
        assert_eq!(
            directory_error_response(DirectoryError::IdentityNotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            directory_error_response(DirectoryError::CardAlreadyBound {
                card_id: "c".into()
            })
            .status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_unsupported_is_not_implemented() {
        let resp = root_error_response(RootError::Unsupported("remote".into()));
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
