//! RBAC/audit/preferences surface, explicitly out of scope for this
//! overlay. Each handler returns 501 so clients get an honest "not built"
//! rather than a 404 that looks like a routing mistake.

use axum::extract::Path;
use axum::Json;
use serde_json::Value;

use crate::errors::AppError;

pub async fn login_stub(Json(_body): Json<Value>) -> Result<Json<Value>, AppError> {
    Err(AppError::not_implemented("authentication is out of scope for this overlay"))
}

pub async fn me_stub() -> Result<Json<Value>, AppError> {
    Err(AppError::not_implemented("authentication is out of scope for this overlay"))
}

pub async fn audit_list_stub() -> Result<Json<Value>, AppError> {
    Err(AppError::not_implemented("audit logging is out of scope for this overlay"))
}

pub async fn audit_export_stub() -> Result<Json<Value>, AppError> {
    Err(AppError::not_implemented("audit export is out of scope for this overlay"))
}

pub async fn get_preference_stub(Path(_key): Path<String>) -> Result<Json<Value>, AppError> {
    Err(AppError::not_implemented("user preferences are out of scope for this overlay"))
}

pub async fn put_preference_stub(
    Path(_key): Path<String>,
    Json(_body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    Err(AppError::not_implemented("user preferences are out of scope for this overlay"))
}
