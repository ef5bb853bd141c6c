use axum::extract::State;
use axum::Json;

use sentryflow_core::controller_client::Topology;

use crate::errors::AppError;
use crate::state::AppState;

pub async fn get_topology(State(state): State<AppState>) -> Result<Json<Topology>, AppError> {
    let topology = state.controller.get_topology().await?;
    Ok(Json(topology))
}
