use axum::{extract::State, http::StatusCode, response::ErrorResponse};
use log::error;
use std::sync::Arc;

use crate::startup::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<StatusCode, ErrorResponse> {
    if state.cancel_token.is_cancelled() {
        error!("Health check during shutdown");
        return Err(ErrorResponse::from((
            StatusCode::SERVICE_UNAVAILABLE,
            "Shutting down",
        )));
    }
    Ok(StatusCode::OK)
}
