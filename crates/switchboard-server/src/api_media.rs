//! Websocket endpoint for the telephony provider's media stream.
//!
//! Session setup is fail-closed and strictly ordered: accept the
//! provider's start envelope, fetch the conversation context, claim the
//! call id in the registry, complete the realtime handshake, and only
//! then start bridging audio. Any failure along the way tears down what
//! exists and refuses the call.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::mpsc;

use switchboard_bridge::session::{BridgeSession, SessionParts};
use switchboard_bridge::{downstream, upstream, SessionHandle};

use crate::AppState;

/// Close code sent to a second media stream claiming a live call id.
const POLICY_VIOLATION: u16 = 1008;

pub async fn media_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_media_stream(state, socket))
}

async fn handle_media_stream(state: AppState, socket: WebSocket) {
    let config = state.bridge.clone();

    let (info, upstream_handle, upstream_rx) = match upstream::accept(
        socket,
        config.handshake_timeout,
        config.audio_buffer_frames,
    )
    .await
    {
        Ok(accepted) => accepted,
        Err(err) => {
            tracing::warn!(error = %err, "media stream rejected before start envelope");
            return;
        }
    };
    let call_id = info.call_id.clone();
    tracing::info!(call_id = %call_id, stream_sid = %info.stream_sid, "media stream started");

    let context = match state.context_client.fetch_context(&call_id).await {
        Ok(context) => context,
        Err(err) => {
            tracing::error!(call_id = %call_id, error = %err, "refusing call without context");
            upstream_handle.close().await;
            return;
        }
    };

    let (control_tx, control_rx) = mpsc::channel(8);
    if let Err(err) = state
        .registry
        .insert(call_id.clone(), SessionHandle::new(control_tx))
        .await
    {
        tracing::warn!(call_id = %call_id, error = %err, "duplicate media stream refused");
        upstream_handle
            .close_with(POLICY_VIOLATION, "call already has a live session")
            .await;
        return;
    }

    let (downstream_handle, downstream_rx) = match downstream::connect(
        &config.realtime,
        &context,
        config.handshake_timeout,
        config.audio_buffer_frames,
    )
    .await
    {
        Ok(connected) => connected,
        Err(err) => {
            tracing::error!(call_id = %call_id, error = %err, "realtime handshake failed, refusing call");
            state.registry.remove(&call_id).await;
            upstream_handle.close().await;
            return;
        }
    };

    let session = BridgeSession::new(SessionParts {
        call_id: call_id.clone(),
        config,
        context,
        context_client: state.context_client.clone(),
        upstream: upstream_handle,
        upstream_rx,
        downstream: downstream_handle,
        downstream_rx,
        control_rx,
    });

    let reason = session.run().await;
    state.registry.remove(&call_id).await;
    tracing::debug!(call_id = %call_id, reason = reason.as_str(), "session removed from registry");
}
