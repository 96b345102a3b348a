//! Telephony-provider media stream adapter (upstream leg).
//!
//! The provider connects to us over websocket and speaks a small JSON
//! protocol: a `start` envelope with call metadata, then a stream of
//! `media` events carrying base64 μ-law frames, and finally `stop`.
//! Outbound we send `media` (synthesized audio), `mark` (playback
//! checkpoints) and `clear` (flush queued playback on barge-in).

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use switchboard_types::CallId;

use crate::error::{BridgeError, Leg};

/// Media metadata from the provider's `start` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMeta {
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkMeta {
    pub name: String,
}

/// Inbound provider protocol messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ProviderMessage {
    Connected {},
    Start {
        start: StartMeta,
    },
    Media {
        media: MediaMeta,
    },
    Mark {
        mark: MarkMeta,
    },
    Stop {},
}

/// Outbound provider protocol messages.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundMessage<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: OutboundMark<'a>,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct OutboundMedia {
    payload: String,
}

#[derive(Debug, Serialize)]
struct OutboundMark<'a> {
    name: &'a str,
}

/// Events surfaced to the session loop.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// One raw μ-law frame from the caller, base64 already removed.
    Audio(Vec<u8>),
    /// Provider confirmed playback reached a mark we sent.
    Mark(String),
    /// The provider ended the stream or the socket dropped.
    Stopped,
}

/// Call identity extracted from the `start` envelope.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub call_id: CallId,
    pub stream_sid: String,
    pub custom_parameters: HashMap<String, String>,
}

/// Write half of the upstream leg, shared with the session loop.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    stream_sid: String,
    out_tx: mpsc::Sender<Message>,
}

impl UpstreamHandle {
    /// Sends one μ-law payload to the provider for playback.
    pub async fn send_audio(&self, mulaw: &[u8]) -> Result<(), BridgeError> {
        let msg = OutboundMessage::Media {
            stream_sid: &self.stream_sid,
            media: OutboundMedia {
                payload: BASE64.encode(mulaw),
            },
        };
        self.send_json(&msg).await
    }

    /// Asks the provider to flush any queued, not-yet-played audio.
    pub async fn send_clear(&self) -> Result<(), BridgeError> {
        let msg = OutboundMessage::Clear {
            stream_sid: &self.stream_sid,
        };
        self.send_json(&msg).await
    }

    /// Sends a playback checkpoint; the provider echoes it back as a
    /// `mark` event once audio up to this point has been played.
    pub async fn send_mark(&self, name: &str) -> Result<(), BridgeError> {
        let msg = OutboundMessage::Mark {
            stream_sid: &self.stream_sid,
            mark: OutboundMark { name },
        };
        self.send_json(&msg).await
    }

    /// Starts a websocket close. Idempotent; errors are ignored because
    /// the writer may already be gone.
    pub async fn close(&self) {
        let _ = self.out_tx.send(Message::Close(None)).await;
    }

    /// Close with an explicit code, used when refusing a stream (for
    /// example a duplicate call id).
    pub async fn close_with(&self, code: u16, reason: &str) {
        let frame = axum::extract::ws::CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        let _ = self.out_tx.send(Message::Close(Some(frame))).await;
    }

    async fn send_json(&self, msg: &OutboundMessage<'_>) -> Result<(), BridgeError> {
        // Serialization of these string-only payloads cannot fail.
        let text = serde_json::to_string(msg).unwrap_or_default();
        self.out_tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| BridgeError::ConnectionClosed { leg: Leg::Upstream })
    }
}

/// Reads the provider's opening envelope, then splits the socket into a
/// writer task and a reader task feeding a bounded event channel.
///
/// The `start` envelope must arrive within `accept_timeout`; anything
/// else first (besides `connected`) fails the accept.
pub async fn accept(
    mut socket: WebSocket,
    accept_timeout: Duration,
    buffer_frames: usize,
) -> Result<(StreamInfo, UpstreamHandle, mpsc::Receiver<UpstreamEvent>), BridgeError> {
    let start = timeout(accept_timeout, read_start(&mut socket))
        .await
        .map_err(|_| BridgeError::Handshake("timed out waiting for start envelope".into()))??;

    let info = StreamInfo {
        call_id: CallId::from(start.call_sid.clone()),
        stream_sid: start.stream_sid.clone(),
        custom_parameters: start.custom_parameters,
    };

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(buffer_frames);
    let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(buffer_frames);

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let call_id = info.call_id.clone();
    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::debug!(call_id = %call_id, error = %err, "upstream socket error");
                    break;
                }
            };
            match msg {
                Message::Text(text) => {
                    let Some(event) = parse_inbound(&call_id, text.as_str()) else {
                        continue;
                    };
                    let stopping = matches!(event, UpstreamEvent::Stopped);
                    // Bounded send: when the session falls behind we stop
                    // pulling from the socket instead of buffering.
                    if event_tx.send(event).await.is_err() || stopping {
                        return;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        let _ = event_tx.send(UpstreamEvent::Stopped).await;
    });

    let handle = UpstreamHandle {
        stream_sid: info.stream_sid.clone(),
        out_tx,
    };
    Ok((info, handle, event_rx))
}

async fn read_start(socket: &mut WebSocket) -> Result<StartMeta, BridgeError> {
    while let Some(result) = socket.recv().await {
        let msg =
            result.map_err(|_| BridgeError::ConnectionClosed { leg: Leg::Upstream })?;
        let Message::Text(text) = msg else {
            continue;
        };
        match serde_json::from_str::<ProviderMessage>(text.as_str()) {
            Ok(ProviderMessage::Connected {}) => continue,
            Ok(ProviderMessage::Start { start }) => return Ok(start),
            Ok(other) => {
                return Err(BridgeError::Handshake(format!(
                    "expected start envelope, got {:?}",
                    other
                )));
            }
            Err(err) => {
                tracing::warn!(error = %err, "unparseable pre-start message, skipping");
            }
        }
    }
    Err(BridgeError::ConnectionClosed { leg: Leg::Upstream })
}

fn parse_inbound(call_id: &CallId, text: &str) -> Option<UpstreamEvent> {
    let msg = match serde_json::from_str::<ProviderMessage>(text) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!(call_id = %call_id, error = %err, "unknown provider message, skipping");
            return None;
        }
    };
    match msg {
        ProviderMessage::Media { media } => match BASE64.decode(media.payload.as_bytes()) {
            Ok(bytes) => Some(UpstreamEvent::Audio(bytes)),
            Err(err) => {
                tracing::warn!(call_id = %call_id, error = %err, "bad media payload, skipping frame");
                None
            }
        },
        ProviderMessage::Mark { mark } => Some(UpstreamEvent::Mark(mark.name)),
        ProviderMessage::Stop {} => Some(UpstreamEvent::Stopped),
        ProviderMessage::Connected {} | ProviderMessage::Start { .. } => {
            tracing::debug!(call_id = %call_id, "duplicate handshake message ignored");
            None
        }
    }
}
