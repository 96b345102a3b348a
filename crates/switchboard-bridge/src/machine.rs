//! Pure bridge-session state machine.
//!
//! All conversational logic lives here as a synchronous transition
//! function over normalized events, so barge-in and turn handling can be
//! unit tested without sockets. The async session loop in
//! [`crate::session`] feeds events in and executes the returned actions.

use switchboard_types::CallId;

/// Lifecycle state of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Legs connecting, realtime handshake outstanding. No audio flows.
    Connecting,
    /// Both legs up, neither party speaking.
    Active,
    /// The backend is producing an audio response.
    AiSpeaking,
    /// The caller is speaking.
    UserSpeaking,
    /// Transient: caller spoke over the backend; cancel and flush are in
    /// flight. Settles to `UserSpeaking` within the same transition.
    Interrupted,
    /// Teardown started; no new audio is accepted.
    Closing,
    /// Terminal.
    Closed,
}

/// Why a session is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The provider ended the stream (stop event or socket close).
    ProviderStop,
    /// The backend ended the call (end_call function or socket failure
    /// after the reconnect attempt).
    BackendEnded,
    /// Idle timeout expired with no audio in either direction.
    IdleTimeout,
    /// Unrecoverable error on either leg.
    Error,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProviderStop => "provider-stop",
            Self::BackendEnded => "backend-ended",
            Self::IdleTimeout => "idle-timeout",
            Self::Error => "error",
        }
    }
}

/// Normalized input to the state machine, produced by the session loop
/// from both websocket legs.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Realtime session configuration acknowledged.
    HandshakeCompleted,
    /// One decoded 20 ms frame of caller audio.
    CallerAudio(Vec<i16>),
    /// Backend voice-activity detection: caller started speaking.
    SpeechStarted,
    /// Backend voice-activity detection: caller stopped speaking.
    SpeechStopped,
    /// The backend opened a response turn.
    TurnStarted { response_id: String },
    /// A chunk of backend response audio, already decoded to PCM16.
    AudioDelta { response_id: String, pcm: Vec<i16> },
    /// The backend finished (or abandoned) a response turn.
    TurnCompleted { response_id: String },
    /// The call is over; tear the session down.
    CallEnded(CloseReason),
}

/// Side effect the session loop must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send caller audio to the realtime backend.
    ForwardToBackend(Vec<i16>),
    /// Send backend audio to the telephony provider.
    ForwardToCaller(Vec<i16>),
    /// Cancel the in-flight backend response.
    CancelResponse,
    /// Tell the provider to flush its queued playback buffer.
    ClearCallerBuffer,
    /// Drop a playback checkpoint after a completed response; the
    /// provider echoes it once the audio has actually played out.
    SendPlaybackMark,
    /// Close both legs and finish the session.
    Shutdown(CloseReason),
}

/// The result of applying one event: every state passed through (in
/// order) and the actions to execute.
#[derive(Debug, Default, PartialEq)]
pub struct Transition {
    pub path: Vec<SessionState>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone)]
struct Turn {
    response_id: String,
    sequence: u64,
}

/// Deterministic state machine for one call.
#[derive(Debug)]
pub struct Machine {
    call_id: CallId,
    state: SessionState,
    /// Monotonic turn counter. Incremented on every barge-in so audio
    /// from a cancelled response can be recognized as stale and dropped.
    turn_sequence: u64,
    current_turn: Option<Turn>,
}

impl Machine {
    pub fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            state: SessionState::Connecting,
            turn_sequence: 0,
            current_turn: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn turn_sequence(&self) -> u64 {
        self.turn_sequence
    }

    /// Called by the session loop once teardown has actually finished.
    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Called when the backend leg has been replaced after a disconnect.
    /// Any in-flight turn died with the old socket, so it is abandoned
    /// and the session settles back to `Active`; the sequence bump keeps
    /// leftover audio from the dead turn unforwardable.
    pub fn reset_downstream(&mut self) {
        use SessionState::*;
        if matches!(self.state, Active | AiSpeaking | UserSpeaking) {
            self.turn_sequence += 1;
            self.current_turn = None;
            if self.state != Active {
                tracing::debug!(call_id = %self.call_id, from = ?self.state, "abandoning turn state with replaced backend leg");
                self.state = Active;
            }
        }
    }

    /// Applies one event, returning the states passed through and the
    /// actions to execute. Events arriving in `Closing`/`Closed` are
    /// ignored except for their log value.
    pub fn apply(&mut self, event: BridgeEvent) -> Transition {
        use SessionState::*;

        let mut t = Transition::default();
        if matches!(self.state, Closing | Closed) {
            tracing::trace!(call_id = %self.call_id, state = ?self.state, ?event, "event after close, ignored");
            return t;
        }

        match event {
            BridgeEvent::HandshakeCompleted => {
                if self.state == Connecting {
                    self.go(Active, &mut t);
                }
            }

            BridgeEvent::CallerAudio(pcm) => {
                // Audio streams continuously while the session is live so
                // the backend's VAD sees silence as well as speech.
                if matches!(self.state, Active | AiSpeaking | UserSpeaking) {
                    t.actions.push(Action::ForwardToBackend(pcm));
                }
            }

            BridgeEvent::SpeechStarted => match self.state {
                Active => self.go(UserSpeaking, &mut t),
                AiSpeaking => {
                    // Barge-in: cancel the response, flush queued playback,
                    // and advance the sequence so late deltas are stale.
                    self.go(Interrupted, &mut t);
                    self.turn_sequence += 1;
                    t.actions.push(Action::CancelResponse);
                    t.actions.push(Action::ClearCallerBuffer);
                    self.go(UserSpeaking, &mut t);
                }
                _ => {}
            },

            BridgeEvent::SpeechStopped => {
                if self.state == UserSpeaking {
                    self.go(Active, &mut t);
                }
            }

            BridgeEvent::TurnStarted { response_id } => {
                if matches!(self.state, Active | UserSpeaking) {
                    self.current_turn = Some(Turn {
                        response_id,
                        sequence: self.turn_sequence,
                    });
                    self.go(AiSpeaking, &mut t);
                }
            }

            BridgeEvent::AudioDelta { response_id, pcm } => {
                let live = self.current_turn.as_ref().is_some_and(|turn| {
                    turn.response_id == response_id && turn.sequence == self.turn_sequence
                });
                if live && self.state == AiSpeaking {
                    t.actions.push(Action::ForwardToCaller(pcm));
                } else {
                    tracing::debug!(call_id = %self.call_id, %response_id, "dropping stale audio delta");
                }
            }

            BridgeEvent::TurnCompleted { response_id } => {
                if let Some(turn) = self.current_turn.as_ref() {
                    if turn.response_id == response_id {
                        let live = turn.sequence == self.turn_sequence;
                        self.current_turn = None;
                        if live && self.state == AiSpeaking {
                            self.go(Active, &mut t);
                            t.actions.push(Action::SendPlaybackMark);
                        }
                    }
                }
            }

            BridgeEvent::CallEnded(reason) => {
                self.go(Closing, &mut t);
                t.actions.push(Action::Shutdown(reason));
            }
        }

        t
    }

    fn go(&mut self, next: SessionState, t: &mut Transition) {
        tracing::debug!(call_id = %self.call_id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
        t.path.push(next);
    }
}
