//! Shared types for the switchboard platform.
//!
//! This crate provides the foundational types used across all switchboard
//! crates: call identifiers, the conversation context handed to a bridge
//! session at creation, provider call statuses, and transcript deltas.
//!
//! No crate in the workspace depends on anything *except*
//! `switchboard-types` for cross-cutting type definitions. This keeps the
//! dependency graph clean and prevents circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-assigned call identifier, unique per call and stable for its
/// lifetime. Wrapped so a call id cannot be confused with a stream SID or
/// any other opaque string in function signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque conversation payload supplied once by the backend conversation
/// service before the bridge session starts. Immutable for the session's
/// lifetime; the bridge never interprets it beyond forwarding the
/// instructions in the realtime handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Originating user identity in the backend's namespace.
    pub user_id: String,

    /// Display name of the user, if known.
    #[serde(default)]
    pub username: Option<String>,

    /// Instruction text for the voice-AI backend (system prompt).
    pub instructions: String,

    /// Summary of prior conversations, assembled by the backend from its
    /// memory store. Empty when the user is new or memory is unavailable.
    #[serde(default)]
    pub memory_summary: String,
}

/// Call status values carried by the telephony provider's out-of-band
/// status webhook. Only `Completed` has an effect on the bridge (registry
/// cleanup); the rest are logged for visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
}

impl CallStatus {
    /// Whether this status means the call has ended and the session (if
    /// any) should be torn down.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Busy | Self::Failed | Self::NoAnswer | Self::Canceled
        )
    }
}

/// Speaker role attached to a transcript delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A finalized, role-tagged piece of transcript pushed to the backend
/// conversation service for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptDelta {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptDelta {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
