use axum::extract::State;
use axum::Json;

use sentryflow_core::inference::ModelMeta;

use crate::state::AppState;

pub async fn get_model_meta(State(state): State<AppState>) -> Json<ModelMeta> {
    Json(state.inference.meta())
}
