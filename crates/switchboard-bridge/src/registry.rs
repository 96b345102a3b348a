//! Registry of live bridge sessions, keyed by call id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use switchboard_types::CallId;

use crate::error::BridgeError;
use crate::machine::CloseReason;

/// Control messages a registered session accepts from outside its own
/// loop (status webhooks, admin shutdown).
#[derive(Debug, Clone, Copy)]
pub enum SessionControl {
    Shutdown(CloseReason),
}

/// Handle kept in the registry for each live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    control: mpsc::Sender<SessionControl>,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl SessionHandle {
    pub fn new(control: mpsc::Sender<SessionControl>) -> Self {
        Self {
            control,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }

    /// Requests shutdown. Returns false if the session loop is already
    /// gone, which callers treat as "already closed".
    pub async fn shutdown(&self, reason: CloseReason) -> bool {
        self.control
            .send(SessionControl::Shutdown(reason))
            .await
            .is_ok()
    }
}

/// Shared map of call id to session handle.
///
/// Insertion is first-wins: a second media stream claiming an already
/// registered call id is rejected and the existing session is untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<CallId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session. Fails with [`BridgeError::RegistryConflict`]
    /// if the call id is already present.
    pub async fn insert(
        &self,
        call_id: CallId,
        handle: SessionHandle,
    ) -> Result<(), BridgeError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&call_id) {
            return Err(BridgeError::RegistryConflict(call_id));
        }
        sessions.insert(call_id, handle);
        Ok(())
    }

    /// Removes a session, returning its handle if it was registered.
    /// Removing an unknown id is a no-op.
    pub async fn remove(&self, call_id: &CallId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(call_id)
    }

    pub async fn get(&self, call_id: &CallId) -> Option<SessionHandle> {
        self.sessions.read().await.get(call_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn active_calls(&self) -> Vec<CallId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Call ids with their session start times, for introspection.
    pub async fn snapshot(&self) -> Vec<(CallId, chrono::DateTime<chrono::Utc>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.started_at()))
            .collect()
    }
}
