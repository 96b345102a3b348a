//! HTTP client for the backend conversation service.
//!
//! Two calls: fetch the conversation context before a session starts
//! (fatal on failure, the call is refused) and push transcript deltas
//! during the call (best effort, logged and dropped on failure so a
//! transcript hiccup never touches the audio path).

use std::time::Duration;

use switchboard_types::{CallId, ConversationContext, TranscriptDelta};

use crate::error::BridgeError;

#[derive(Debug, Clone)]
pub struct ContextClient {
    http: reqwest::Client,
    base_url: String,
}

impl ContextClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("http client construction only fails on broken TLS backends");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Fetches the context for a call. The bridge refuses the call when
    /// this fails; a session never starts with empty instructions.
    pub async fn fetch_context(
        &self,
        call_id: &CallId,
    ) -> Result<ConversationContext, BridgeError> {
        let url = format!("{}/api/calls/context", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "call_id": call_id }))
            .send()
            .await
            .map_err(|e| BridgeError::Context(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::Context(format!(
                "conversation service returned {}",
                response.status()
            )));
        }
        response
            .json::<ConversationContext>()
            .await
            .map_err(|e| BridgeError::Context(format!("bad context payload: {e}")))
    }

    /// Pushes one finalized transcript delta. Failures are logged and
    /// dropped; persistence is best effort mid-call.
    pub async fn push_transcript(&self, call_id: &CallId, delta: &TranscriptDelta) {
        let url = format!("{}/api/calls/{}/transcript", self.base_url, call_id);
        match self.http.post(&url).json(delta).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(
                    call_id = %call_id,
                    status = %response.status(),
                    "transcript push rejected, dropping delta"
                );
            }
            Err(err) => {
                tracing::warn!(call_id = %call_id, error = %err, "transcript push failed, dropping delta");
            }
        }
    }
}
