//! Admin endpoints: policy reload and unban.

use crate::error::ApiError;
use crate::settings::load_policy;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use llm_guardrail_core::GuardrailError;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// `POST /admin/reload`
///
/// Re-reads the policy file and swaps it in. Cached snapshots are dropped;
/// requests already in flight keep the snapshot they resolved.
pub async fn reload(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let policy = state
        .policy
        .clone()
        .ok_or_else(|| GuardrailError::Config("policy store is not reloadable".to_string()))?;
    let path = policy
        .path
        .clone()
        .ok_or_else(|| GuardrailError::InvalidRequest("no policy file configured".to_string()))?;

    let document = tokio::task::spawn_blocking(move || load_policy(&path))
        .await
        .map_err(|e| GuardrailError::Config(format!("policy load task failed: {e}")))?
        .map_err(|e| GuardrailError::InvalidRequest(format!("policy rejected: {e}")))?;
    let version = policy.store.replace(document)?;
    state.core.invalidate_snapshots();

    info!(version, "Policy reloaded");
    Ok(Json(json!({ "status": "reloaded", "version": version })))
}

#[derive(Debug, Deserialize)]
pub struct UnbanQuery {
    pub tenant_id: Option<String>,
}

/// `DELETE /admin/bans/:end_user_id?tenant_id=...`
pub async fn unban(
    State(state): State<AppState>,
    Path(end_user_id): Path<String>,
    Query(query): Query<UnbanQuery>,
) -> Result<Json<Value>, ApiError> {
    let tenant_id = query
        .tenant_id
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GuardrailError::InvalidRequest("'tenant_id' is required".to_string()))?;

    let removed = state.core.unban(&tenant_id, &end_user_id).await?;
    info!(%tenant_id, %end_user_id, removed, "Administrative unban");
    Ok(Json(json!({
        "tenant_id": tenant_id,
        "end_user_id": end_user_id,
        "unbanned": removed,
    })))
}
