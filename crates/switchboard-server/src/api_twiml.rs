//! Provider answer webhook.
//!
//! When a call connects, the telephony provider POSTs here and expects a
//! TwiML document telling it what to do with the call. We answer with a
//! `<Connect><Stream>` pointing at this server's media websocket, which
//! is what turns an answered call into a bridge session.

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};

use crate::AppState;

pub async fn twiml(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let media_url = match &state.public_url {
        Some(base) => format!("{}/media", base.trim_end_matches('/')),
        None => {
            // Behind a tunnel or proxy the Host header is the only thing
            // that knows our public name.
            let host = headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("localhost");
            format!("wss://{host}/media")
        }
    };
    tracing::info!(%media_url, "answering call with media stream");

    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Response>\n\
           <Connect>\n\
             <Stream url=\"{media_url}\" />\n\
           </Connect>\n\
         </Response>\n"
    );
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}
