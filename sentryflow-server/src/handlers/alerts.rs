use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::errors::AppError;
use crate::state::AppState;

pub async fn get_alerts(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let alerts = state.controller.get_alerts().await?;
    Ok(Json(alerts))
}
