use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::ErrorResponse,
    Json,
};
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{ApprovalDecision, ApprovalRequest},
    startup::AppState,
};

/// Gates currently waiting on the approval UI
pub async fn approval_list(State(state): State<Arc<AppState>>) -> Json<Vec<ApprovalRequest>> {
    let mut pending = state.approvals.pending().await;
    pending.sort_by_key(|request| request.id);
    Json(pending)
}

pub async fn approval_resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(decision): Json<ApprovalDecision>,
) -> Result<StatusCode, ErrorResponse> {
    let action = decision.action();
    if state.approvals.resolve(id, action).await {
        Ok(StatusCode::OK)
    } else {
        debug!("Approval {} not pending, ignoring {:?}", id, action);
        Err(ErrorResponse::from((
            StatusCode::NOT_FOUND,
            "Approval not found",
        )))
    }
}
