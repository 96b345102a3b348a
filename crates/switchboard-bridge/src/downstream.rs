//! Voice-AI realtime backend adapter (downstream leg).
//!
//! We dial out to the backend's realtime websocket, send a session
//! configuration built from the conversation context, and wait for the
//! backend to acknowledge it before any audio flows. After the handshake
//! the socket splits into a writer task fed by a bounded channel and a
//! reader task that normalizes the backend's event stream.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

use switchboard_types::ConversationContext;

use crate::config::RealtimeConfig;
use crate::error::{BridgeError, Leg};

/// Name of the one function the bridge interprets itself. The backend
/// calls it when the conversation should end; everything else the model
/// asks for is acknowledged and left to the conversation service.
pub const END_CALL_FUNCTION: &str = "end_call";

/// Events surfaced to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum DownstreamEvent {
    /// Backend VAD detected the caller speaking.
    SpeechStarted,
    /// Backend VAD detected the caller going quiet.
    SpeechStopped,
    /// The backend opened a response turn.
    TurnStarted { response_id: String },
    /// Response audio chunk, base64 removed, still raw PCM16-LE bytes.
    AudioDelta { response_id: String, audio: Vec<u8> },
    /// Incremental transcript of the assistant's speech.
    TranscriptDelta { response_id: String, text: String },
    /// Finalized transcript of what the caller said.
    UserTranscript { text: String },
    /// The backend finished or abandoned a response turn.
    TurnCompleted { response_id: String },
    /// The model invoked a tool.
    FunctionCall {
        name: String,
        call_id: String,
        arguments: String,
    },
    /// Backend-reported error event.
    BackendError { message: String },
    /// The socket closed.
    Closed,
}

/// Write half of the downstream leg.
#[derive(Debug, Clone)]
pub struct DownstreamHandle {
    out_tx: mpsc::Sender<Message>,
}

impl DownstreamHandle {
    /// Appends caller audio to the backend's input buffer.
    pub async fn send_audio(&self, pcm: &[i16]) -> Result<(), BridgeError> {
        let payload = json!({
            "type": "input_audio_buffer.append",
            "audio": BASE64.encode(samples_to_pcm_bytes(pcm)),
        });
        self.send_json(payload).await
    }

    /// Commits the input buffer, forcing a turn boundary. Not needed
    /// while the session runs with server VAD, which commits on its own;
    /// exposed for deployments that turn VAD off.
    pub async fn commit_turn(&self) -> Result<(), BridgeError> {
        self.send_json(json!({ "type": "input_audio_buffer.commit" }))
            .await
    }

    /// Cancels the in-flight response (barge-in).
    pub async fn cancel_response(&self) -> Result<(), BridgeError> {
        self.send_json(json!({ "type": "response.cancel" })).await
    }

    /// Reports a tool invocation's result back to the model and asks it
    /// to continue the conversation.
    pub async fn send_function_result(
        &self,
        call_id: &str,
        output: &str,
    ) -> Result<(), BridgeError> {
        self.send_json(json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            },
        }))
        .await?;
        self.send_json(json!({ "type": "response.create" })).await
    }

    /// Starts a websocket close. Errors are ignored; the writer may
    /// already be gone.
    pub async fn close(&self) {
        let _ = self.out_tx.send(Message::Close(None)).await;
    }

    async fn send_json(&self, payload: Value) -> Result<(), BridgeError> {
        self.out_tx
            .send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|_| BridgeError::ConnectionClosed {
                leg: Leg::Downstream,
            })
    }
}

/// Dials the realtime backend and completes the session-configuration
/// handshake before returning. No audio may be sent until this resolves.
pub async fn connect(
    config: &RealtimeConfig,
    context: &ConversationContext,
    handshake_timeout: Duration,
    buffer_frames: usize,
) -> Result<(DownstreamHandle, mpsc::Receiver<DownstreamEvent>), BridgeError> {
    // A base URL without a path would serialize to an invalid request
    // target ("GET ?model=... HTTP/1.1"); make the root path explicit.
    let after_scheme = config
        .url
        .split_once("://")
        .map_or(config.url.as_str(), |(_, rest)| rest);
    let path = if after_scheme.contains('/') { "" } else { "/" };
    let url = format!("{}{}?model={}", config.url, path, config.model);
    let mut request = url
        .into_client_request()
        .map_err(|e| BridgeError::Handshake(format!("bad realtime url: {e}")))?;
    let headers = request.headers_mut();
    headers.insert(
        "Authorization",
        format!("Bearer {}", config.api_key)
            .parse()
            .map_err(|_| BridgeError::Handshake("api key is not a valid header value".into()))?,
    );
    headers.insert(
        "OpenAI-Beta",
        "realtime=v1"
            .parse()
            .map_err(|_| BridgeError::Handshake("bad beta header".into()))?,
    );

    let mut ws = timeout(handshake_timeout, connect_async(request))
        .await
        .map_err(|_| BridgeError::Handshake("realtime connect timed out".into()))?
        .map_err(|e| BridgeError::Handshake(format!("realtime connect failed: {e}")))?
        .0;

    let session_update = session_config(config, context);
    timeout(handshake_timeout, async {
        ws.send(Message::Text(session_update.to_string().into()))
            .await
            .map_err(|e| BridgeError::Handshake(format!("session config send failed: {e}")))?;
        await_session_ack(&mut ws).await
    })
    .await
    .map_err(|_| BridgeError::Handshake("session config not acknowledged in time".into()))??;

    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(buffer_frames);
    let (event_tx, event_rx) = mpsc::channel::<DownstreamEvent>(buffer_frames);

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::debug!(error = %err, "realtime socket error");
                    break;
                }
            };
            match msg {
                Message::Text(text) => {
                    if let Some(event) = parse_event(text.as_str()) {
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        let _ = event_tx.send(DownstreamEvent::Closed).await;
    });

    Ok((DownstreamHandle { out_tx }, event_rx))
}

async fn await_session_ack(
    ws: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Result<(), BridgeError> {
    while let Some(result) = ws.next().await {
        let msg = result.map_err(|e| BridgeError::Handshake(format!("handshake read: {e}")))?;
        let Message::Text(text) = msg else { continue };
        let value: Value = match serde_json::from_str(text.as_str()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        match value["type"].as_str() {
            Some("session.updated") => return Ok(()),
            Some("session.created") => continue,
            Some("error") => {
                let message = value["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown")
                    .to_string();
                return Err(BridgeError::Handshake(message));
            }
            _ => continue,
        }
    }
    Err(BridgeError::Handshake(
        "socket closed before session ack".into(),
    ))
}

/// Builds the session configuration sent as the first message after
/// connect. Audio stays at 8 kHz PCM16 in both directions; the caller's
/// side of the companding is handled by the bridge codec.
fn session_config(config: &RealtimeConfig, context: &ConversationContext) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "modalities": ["audio", "text"],
            "voice": config.voice,
            "instructions": build_instructions(context),
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": { "model": "whisper-1" },
            "turn_detection": { "type": "server_vad" },
            "tools": [
                {
                    "type": "function",
                    "name": END_CALL_FUNCTION,
                    "description": "End the phone call once the conversation has wrapped up.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "reason": { "type": "string" }
                        },
                        "required": []
                    }
                }
            ],
        },
    })
}

fn build_instructions(context: &ConversationContext) -> String {
    if context.memory_summary.is_empty() {
        context.instructions.clone()
    } else {
        format!(
            "{}\n\nWhat you remember about this caller:\n{}",
            context.instructions, context.memory_summary
        )
    }
}

/// Normalizes one backend event. Unknown event types return `None` and
/// are skipped so new backend events cannot break live calls.
fn parse_event(text: &str) -> Option<DownstreamEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let event_type = value["type"].as_str()?;
    match event_type {
        "input_audio_buffer.speech_started" => Some(DownstreamEvent::SpeechStarted),
        "input_audio_buffer.speech_stopped" => Some(DownstreamEvent::SpeechStopped),
        "response.created" => Some(DownstreamEvent::TurnStarted {
            response_id: value["response"]["id"].as_str()?.to_string(),
        }),
        "response.audio.delta" | "response.output_audio.delta" => {
            let audio = BASE64.decode(value["delta"].as_str()?.as_bytes()).ok()?;
            Some(DownstreamEvent::AudioDelta {
                response_id: value["response_id"].as_str()?.to_string(),
                audio,
            })
        }
        "response.audio_transcript.delta" => Some(DownstreamEvent::TranscriptDelta {
            response_id: value["response_id"].as_str()?.to_string(),
            text: value["delta"].as_str()?.to_string(),
        }),
        "conversation.item.input_audio_transcription.completed" => {
            Some(DownstreamEvent::UserTranscript {
                text: value["transcript"].as_str()?.to_string(),
            })
        }
        "response.done" => Some(DownstreamEvent::TurnCompleted {
            response_id: value["response"]["id"].as_str()?.to_string(),
        }),
        "response.function_call_arguments.done" => Some(DownstreamEvent::FunctionCall {
            name: value["name"].as_str()?.to_string(),
            call_id: value["call_id"].as_str()?.to_string(),
            arguments: value["arguments"].as_str().unwrap_or("{}").to_string(),
        }),
        "error" => Some(DownstreamEvent::BackendError {
            message: value["error"]["message"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        }),
        _ => None,
    }
}

/// PCM16 little-endian byte order on the wire.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn samples_to_pcm_bytes(pcm: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for sample in pcm {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_events_parse() {
        assert_eq!(
            parse_event(r#"{"type":"input_audio_buffer.speech_started"}"#),
            Some(DownstreamEvent::SpeechStarted)
        );
        assert_eq!(
            parse_event(r#"{"type":"input_audio_buffer.speech_stopped"}"#),
            Some(DownstreamEvent::SpeechStopped)
        );
    }

    #[test]
    fn turn_lifecycle_events_parse() {
        let started = parse_event(r#"{"type":"response.created","response":{"id":"resp_1"}}"#);
        assert_eq!(
            started,
            Some(DownstreamEvent::TurnStarted {
                response_id: "resp_1".into()
            })
        );

        let done = parse_event(r#"{"type":"response.done","response":{"id":"resp_1"}}"#);
        assert_eq!(
            done,
            Some(DownstreamEvent::TurnCompleted {
                response_id: "resp_1".into()
            })
        );
    }

    #[test]
    fn audio_delta_decodes_base64() {
        let pcm = vec![100i16, -100, 0, 32000];
        let delta = BASE64.encode(samples_to_pcm_bytes(&pcm));
        let json = format!(
            r#"{{"type":"response.audio.delta","response_id":"resp_1","delta":"{delta}"}}"#
        );
        let Some(DownstreamEvent::AudioDelta { response_id, audio }) = parse_event(&json) else {
            panic!("expected audio delta");
        };
        assert_eq!(response_id, "resp_1");
        assert_eq!(pcm_bytes_to_samples(&audio), pcm);
    }

    #[test]
    fn corrupt_delta_is_skipped() {
        let json = r#"{"type":"response.audio.delta","response_id":"r","delta":"***"}"#;
        assert!(parse_event(json).is_none());
    }

    #[test]
    fn function_call_parses() {
        let json = r#"{"type":"response.function_call_arguments.done","name":"end_call","call_id":"fc_1","arguments":"{\"reason\":\"done\"}"}"#;
        let Some(DownstreamEvent::FunctionCall {
            name,
            call_id,
            arguments,
        }) = parse_event(json)
        else {
            panic!("expected function call");
        };
        assert_eq!(name, END_CALL_FUNCTION);
        assert_eq!(call_id, "fc_1");
        assert!(arguments.contains("done"));
    }

    #[test]
    fn transcription_events_parse() {
        let user = parse_event(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hi there"}"#,
        );
        assert_eq!(
            user,
            Some(DownstreamEvent::UserTranscript {
                text: "hi there".into()
            })
        );

        let assistant = parse_event(
            r#"{"type":"response.audio_transcript.delta","response_id":"resp_1","delta":"Hello"}"#,
        );
        assert_eq!(
            assistant,
            Some(DownstreamEvent::TranscriptDelta {
                response_id: "resp_1".into(),
                text: "Hello".into()
            })
        );
    }

    #[test]
    fn unknown_events_are_skipped() {
        assert!(parse_event(r#"{"type":"rate_limits.updated"}"#).is_none());
        assert!(parse_event("not json at all").is_none());
    }

    #[test]
    fn pcm_byte_round_trip() {
        let pcm = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        assert_eq!(pcm_bytes_to_samples(&samples_to_pcm_bytes(&pcm)), pcm);
    }

    #[tokio::test]
    async fn commit_turn_sends_a_commit_frame() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let handle = DownstreamHandle { out_tx };

        handle.commit_turn().await.unwrap();

        let Some(Message::Text(text)) = out_rx.recv().await else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.commit");
    }

    #[tokio::test]
    async fn commit_turn_reports_a_closed_leg() {
        let (out_tx, out_rx) = mpsc::channel(1);
        drop(out_rx);
        let handle = DownstreamHandle { out_tx };
        assert!(matches!(
            handle.commit_turn().await,
            Err(BridgeError::ConnectionClosed {
                leg: Leg::Downstream
            })
        ));
    }

    #[test]
    fn session_config_carries_context() {
        let config = RealtimeConfig::default();
        let context = ConversationContext {
            user_id: "u1".into(),
            username: Some("Ada".into()),
            instructions: "Be brief.".into(),
            memory_summary: "Prefers morning calls.".into(),
        };
        let payload = session_config(&config, &context);
        assert_eq!(payload["type"], "session.update");
        let session = &payload["session"];
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        let instructions = session["instructions"].as_str().unwrap();
        assert!(instructions.starts_with("Be brief."));
        assert!(instructions.contains("Prefers morning calls."));
        assert_eq!(session["tools"][0]["name"], END_CALL_FUNCTION);
    }
}
