//! Core of the switchboard media bridge.
//!
//! A bridge session joins two websocket legs: the telephony provider's
//! media stream (upstream) and a voice-AI realtime backend (downstream).
//! Caller audio arrives as 20 ms μ-law frames, is transcoded to PCM16
//! and streamed to the backend; backend responses flow back the other
//! way. Barge-in, turn tracking and lifecycle live in a pure state
//! machine so the interesting logic is testable without sockets.

pub mod config;
pub mod context;
pub mod downstream;
pub mod error;
pub mod machine;
pub mod registry;
pub mod session;
pub mod upstream;

pub use config::{BridgeConfig, RealtimeConfig};
pub use context::ContextClient;
pub use error::{BridgeError, Leg};
pub use machine::{Action, BridgeEvent, CloseReason, Machine, SessionState};
pub use registry::{SessionControl, SessionHandle, SessionRegistry};
pub use session::{BridgeSession, SessionParts};
