use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::errors::AppError;
use crate::state::AppState;

pub async fn get_honeypot_logs(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let logs = state.controller.get_honeypot_logs().await?;
    Ok(Json(logs))
}
