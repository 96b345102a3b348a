//! Out-of-band call status webhook and session introspection.

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use switchboard_bridge::CloseReason;
use switchboard_types::{CallId, CallStatus};

use crate::AppState;

/// Provider status callback payload (form-encoded).
#[derive(Debug, Deserialize)]
pub struct StatusCallback {
    #[serde(rename = "CallSid")]
    pub call_sid: String,

    #[serde(rename = "CallStatus")]
    pub call_status: CallStatus,
}

/// Handles the provider's status webhook. A terminal status for a call
/// with a live session shuts that session down; everything else is
/// logged for visibility. Always answers 204 so the provider does not
/// retry.
pub async fn call_status(
    State(state): State<AppState>,
    Form(callback): Form<StatusCallback>,
) -> StatusCode {
    let call_id = CallId::from(callback.call_sid);
    tracing::info!(call_id = %call_id, status = ?callback.call_status, "call status update");

    if callback.call_status.is_terminal() {
        if let Some(handle) = state.registry.get(&call_id).await {
            if !handle.shutdown(CloseReason::ProviderStop).await {
                tracing::debug!(call_id = %call_id, "session already closing");
            }
        }
    }
    StatusCode::NO_CONTENT
}

/// Lists live sessions. Operational endpoint, not part of the provider
/// contract.
pub async fn sessions(State(state): State<AppState>) -> Json<Value> {
    let calls = state.registry.snapshot().await;
    let calls: Vec<Value> = calls
        .into_iter()
        .map(|(call_id, started_at)| {
            json!({
                "call_id": call_id,
                "started_at": started_at.to_rfc3339(),
            })
        })
        .collect();
    Json(json!({
        "count": calls.len(),
        "calls": calls,
    }))
}
