//! Async driver for one bridge session.
//!
//! Owns both websocket legs for the lifetime of a call, feeds normalized
//! events into the pure [`Machine`](crate::machine::Machine), and
//! executes the actions it returns. All timing concerns live here: the
//! idle clock, the single downstream reconnect attempt, and the bounded
//! teardown grace.

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use switchboard_types::{CallId, ConversationContext, Role, TranscriptDelta};

use crate::config::BridgeConfig;
use crate::context::ContextClient;
use crate::downstream::{self, DownstreamEvent, DownstreamHandle, END_CALL_FUNCTION};
use crate::machine::{Action, BridgeEvent, CloseReason, Machine};
use crate::registry::SessionControl;
use crate::upstream::{UpstreamEvent, UpstreamHandle};

/// Accumulates assistant transcript deltas for the current response turn.
/// Flushed on turn completion and on barge-in, so a cancelled response
/// still persists the words that were actually spoken.
#[derive(Debug, Default)]
struct TranscriptBuffer {
    response_id: Option<String>,
    text: String,
}

impl TranscriptBuffer {
    fn begin(&mut self, response_id: String) {
        self.response_id = Some(response_id);
        self.text.clear();
    }

    fn push(&mut self, response_id: &str, text: &str) {
        if self.response_id.as_deref() == Some(response_id) {
            self.text.push_str(text);
        }
    }

    fn flush(&mut self) -> Option<TranscriptDelta> {
        self.response_id = None;
        let text = std::mem::take(&mut self.text);
        if text.trim().is_empty() {
            None
        } else {
            Some(TranscriptDelta::new(Role::Assistant, text))
        }
    }
}

/// Everything a session needs at start; produced by the server's media
/// handler after the provider accept, context fetch, registry insert and
/// realtime handshake have all succeeded.
pub struct SessionParts {
    pub call_id: CallId,
    pub config: BridgeConfig,
    pub context: ConversationContext,
    pub context_client: ContextClient,
    pub upstream: UpstreamHandle,
    pub upstream_rx: mpsc::Receiver<UpstreamEvent>,
    pub downstream: DownstreamHandle,
    pub downstream_rx: mpsc::Receiver<DownstreamEvent>,
    pub control_rx: mpsc::Receiver<SessionControl>,
}

pub struct BridgeSession {
    call_id: CallId,
    machine: Machine,
    config: BridgeConfig,
    context: ConversationContext,
    context_client: ContextClient,
    upstream: UpstreamHandle,
    upstream_rx: mpsc::Receiver<UpstreamEvent>,
    downstream: DownstreamHandle,
    downstream_rx: mpsc::Receiver<DownstreamEvent>,
    control_rx: mpsc::Receiver<SessionControl>,
    transcript: TranscriptBuffer,
    reconnected: bool,
    last_activity: Instant,
    started_at: Instant,
}

impl BridgeSession {
    pub fn new(parts: SessionParts) -> Self {
        let now = Instant::now();
        Self {
            machine: Machine::new(parts.call_id.clone()),
            call_id: parts.call_id,
            config: parts.config,
            context: parts.context,
            context_client: parts.context_client,
            upstream: parts.upstream,
            upstream_rx: parts.upstream_rx,
            downstream: parts.downstream,
            downstream_rx: parts.downstream_rx,
            control_rx: parts.control_rx,
            transcript: TranscriptBuffer::default(),
            reconnected: false,
            last_activity: now,
            started_at: now,
        }
    }

    /// Runs the session to completion and returns why it closed. The
    /// caller is responsible for removing the session from the registry
    /// afterwards.
    pub async fn run(mut self) -> CloseReason {
        // Both legs are already connected and acknowledged.
        self.apply(BridgeEvent::HandshakeCompleted).await;
        tracing::info!(call_id = %self.call_id, user_id = %self.context.user_id, "bridge session active");

        let reason = loop {
            let idle_deadline = self.last_activity + self.config.idle_timeout;
            tokio::select! {
                event = self.upstream_rx.recv() => {
                    let outcome = match event {
                        Some(event) => self.on_upstream(event).await,
                        None => self.apply(BridgeEvent::CallEnded(CloseReason::ProviderStop)).await,
                    };
                    if let Some(reason) = outcome {
                        break reason;
                    }
                }
                event = self.downstream_rx.recv() => {
                    let outcome = match event {
                        Some(DownstreamEvent::Closed) | None => self.reconnect_downstream().await,
                        Some(event) => {
                            // The replaced leg is delivering traffic, so a
                            // later loss counts as a fresh first failure.
                            self.reconnected = false;
                            self.on_downstream(event).await
                        }
                    };
                    if let Some(reason) = outcome {
                        break reason;
                    }
                }
                control = self.control_rx.recv() => {
                    let reason = match control {
                        Some(SessionControl::Shutdown(reason)) => reason,
                        None => CloseReason::Error,
                    };
                    if let Some(reason) = self.apply(BridgeEvent::CallEnded(reason)).await {
                        break reason;
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    tracing::info!(call_id = %self.call_id, "no audio in either direction, closing idle session");
                    if let Some(reason) = self.apply(BridgeEvent::CallEnded(CloseReason::IdleTimeout)).await {
                        break reason;
                    }
                }
            }
        };

        self.teardown(reason).await;
        reason
    }

    async fn on_upstream(&mut self, event: UpstreamEvent) -> Option<CloseReason> {
        match event {
            UpstreamEvent::Audio(mulaw) => {
                self.last_activity = Instant::now();
                match switchboard_codec::decode(&mulaw) {
                    Ok(pcm) => self.apply(BridgeEvent::CallerAudio(pcm)).await,
                    Err(err) => {
                        // Skip the frame, keep the call alive.
                        tracing::warn!(call_id = %self.call_id, error = %err, "dropping malformed caller frame");
                        None
                    }
                }
            }
            UpstreamEvent::Mark(name) => {
                // Playback progress on the provider side counts as
                // liveness even while nobody is speaking.
                self.last_activity = Instant::now();
                tracing::trace!(call_id = %self.call_id, mark = %name, "playback mark echoed");
                None
            }
            UpstreamEvent::Stopped => {
                self.apply(BridgeEvent::CallEnded(CloseReason::ProviderStop))
                    .await
            }
        }
    }

    async fn on_downstream(&mut self, event: DownstreamEvent) -> Option<CloseReason> {
        match event {
            DownstreamEvent::SpeechStarted => self.apply(BridgeEvent::SpeechStarted).await,
            DownstreamEvent::SpeechStopped => self.apply(BridgeEvent::SpeechStopped).await,
            DownstreamEvent::TurnStarted { response_id } => {
                self.transcript.begin(response_id.clone());
                self.apply(BridgeEvent::TurnStarted { response_id }).await
            }
            DownstreamEvent::AudioDelta { response_id, audio } => {
                self.last_activity = Instant::now();
                let pcm = downstream::pcm_bytes_to_samples(&audio);
                self.apply(BridgeEvent::AudioDelta { response_id, pcm }).await
            }
            DownstreamEvent::TranscriptDelta { response_id, text } => {
                self.transcript.push(&response_id, &text);
                None
            }
            DownstreamEvent::UserTranscript { text } => {
                self.push_transcript(TranscriptDelta::new(Role::User, text));
                None
            }
            DownstreamEvent::TurnCompleted { response_id } => {
                if let Some(delta) = self.transcript.flush() {
                    self.push_transcript(delta);
                }
                self.apply(BridgeEvent::TurnCompleted { response_id }).await
            }
            DownstreamEvent::FunctionCall {
                name,
                call_id,
                arguments,
            } => {
                if name == END_CALL_FUNCTION {
                    tracing::info!(call_id = %self.call_id, %arguments, "backend requested call end");
                    self.apply(BridgeEvent::CallEnded(CloseReason::BackendEnded))
                        .await
                } else {
                    // Tool execution belongs to the conversation service;
                    // the bridge only keeps the model unblocked.
                    tracing::info!(call_id = %self.call_id, function = %name, "acknowledging tool call");
                    if let Err(err) = self
                        .downstream
                        .send_function_result(&call_id, r#"{"status":"acknowledged"}"#)
                        .await
                    {
                        tracing::debug!(call_id = %self.call_id, error = %err, "tool ack not delivered");
                    }
                    None
                }
            }
            DownstreamEvent::BackendError { message } => {
                tracing::warn!(call_id = %self.call_id, %message, "realtime backend error event");
                None
            }
            DownstreamEvent::Closed => self.reconnect_downstream().await,
        }
    }

    /// One reconnect attempt per outage. A second consecutive downstream
    /// loss is fatal and ends the call; once the replacement leg delivers
    /// an event the session is eligible to reconnect again.
    async fn reconnect_downstream(&mut self) -> Option<CloseReason> {
        if self.reconnected {
            tracing::error!(call_id = %self.call_id, "realtime leg lost again, ending call");
            return self
                .apply(BridgeEvent::CallEnded(CloseReason::BackendEnded))
                .await
                .or(Some(CloseReason::BackendEnded));
        }
        self.reconnected = true;
        tracing::warn!(call_id = %self.call_id, "realtime leg dropped, reconnecting");
        match downstream::connect(
            &self.config.realtime,
            &self.context,
            self.config.handshake_timeout,
            self.config.audio_buffer_frames,
        )
        .await
        {
            Ok((handle, rx)) => {
                self.downstream = handle;
                self.downstream_rx = rx;
                // Whatever turn was in flight died with the old socket;
                // persist the words already spoken and start clean.
                if let Some(delta) = self.transcript.flush() {
                    self.push_transcript(delta);
                }
                self.machine.reset_downstream();
                tracing::info!(call_id = %self.call_id, "realtime leg re-established");
                None
            }
            Err(err) => {
                tracing::error!(call_id = %self.call_id, error = %err, "reconnect failed, ending call");
                self.apply(BridgeEvent::CallEnded(CloseReason::BackendEnded))
                    .await
                    .or(Some(CloseReason::BackendEnded))
            }
        }
    }

    /// Runs one machine transition and executes its actions. Returns the
    /// close reason once a shutdown action is seen.
    async fn apply(&mut self, event: BridgeEvent) -> Option<CloseReason> {
        let transition = self.machine.apply(event);
        let mut shutdown = None;
        for action in transition.actions {
            match action {
                Action::ForwardToBackend(pcm) => {
                    if let Err(err) = self.downstream.send_audio(&pcm).await {
                        // The reader side surfaces the disconnect; the
                        // reconnect path handles it.
                        tracing::debug!(call_id = %self.call_id, error = %err, "caller frame not delivered");
                    }
                }
                Action::ForwardToCaller(pcm) => {
                    let mulaw = switchboard_codec::encode_unframed(&pcm);
                    if let Err(err) = self.upstream.send_audio(&mulaw).await {
                        tracing::warn!(call_id = %self.call_id, error = %err, "provider leg gone, ending call");
                        let t = self.machine.apply(BridgeEvent::CallEnded(CloseReason::Error));
                        for action in t.actions {
                            if let Action::Shutdown(reason) = action {
                                shutdown = Some(reason);
                            }
                        }
                    }
                }
                Action::CancelResponse => {
                    if let Some(delta) = self.transcript.flush() {
                        self.push_transcript(delta);
                    }
                    if let Err(err) = self.downstream.cancel_response().await {
                        tracing::debug!(call_id = %self.call_id, error = %err, "cancel not delivered");
                    }
                }
                Action::ClearCallerBuffer => {
                    if let Err(err) = self.upstream.send_clear().await {
                        tracing::debug!(call_id = %self.call_id, error = %err, "clear not delivered");
                    }
                }
                Action::SendPlaybackMark => {
                    let name = format!("turn-{}", uuid::Uuid::new_v4());
                    if let Err(err) = self.upstream.send_mark(&name).await {
                        tracing::debug!(call_id = %self.call_id, error = %err, "mark not delivered");
                    }
                }
                Action::Shutdown(reason) => shutdown = Some(reason),
            }
        }
        shutdown
    }

    /// Best-effort transcript persistence off the audio path.
    fn push_transcript(&self, delta: TranscriptDelta) {
        let client = self.context_client.clone();
        let call_id = self.call_id.clone();
        tokio::spawn(async move {
            client.push_transcript(&call_id, &delta).await;
        });
    }

    async fn teardown(&mut self, reason: CloseReason) {
        let grace = self.config.close_grace;
        let result = timeout(grace, async {
            if let Some(delta) = self.transcript.flush() {
                self.context_client.push_transcript(&self.call_id, &delta).await;
            }
            self.downstream.close().await;
            self.upstream.close().await;
        })
        .await;
        if result.is_err() {
            tracing::warn!(call_id = %self.call_id, "teardown exceeded grace period, abandoning legs");
        }
        self.machine.mark_closed();
        tracing::info!(
            call_id = %self.call_id,
            reason = reason.as_str(),
            duration_secs = self.started_at.elapsed().as_secs(),
            "bridge session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_buffer_accumulates_per_turn() {
        let mut buf = TranscriptBuffer::default();
        buf.begin("resp_1".into());
        buf.push("resp_1", "Hello ");
        buf.push("resp_1", "there.");
        // Deltas from other responses are ignored.
        buf.push("resp_0", "stale");

        let delta = buf.flush().unwrap();
        assert_eq!(delta.role, Role::Assistant);
        assert_eq!(delta.text, "Hello there.");
    }

    #[test]
    fn transcript_buffer_flush_is_empty_after_flush() {
        let mut buf = TranscriptBuffer::default();
        buf.begin("resp_1".into());
        buf.push("resp_1", "words");
        assert!(buf.flush().is_some());
        assert!(buf.flush().is_none());
    }

    #[test]
    fn whitespace_only_transcript_is_dropped() {
        let mut buf = TranscriptBuffer::default();
        buf.begin("resp_1".into());
        buf.push("resp_1", "   \n");
        assert!(buf.flush().is_none());
    }
}
