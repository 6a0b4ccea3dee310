//! Telephony signaling endpoints.
//!
//! The telephony provider posts a call notification and receives an XML
//! document telling it to connect the call's audio to our streaming endpoint.

use crate::AppState;
use axum::{
    extract::{Extension, Form, Query},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use quick_xml::escape::escape;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

/// Form fields of a call notification. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct CallNotification {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "Direction")]
    pub direction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceQuery {
    pub vertical: Option<String>,
}

fn xml_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Document that speaks `phrase` and hangs up.
pub fn apology_document(phrase: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Say>{}</Say>\n  <Hangup/>\n</Response>\n",
        escape(phrase)
    )
}

/// Document that connects the call audio to `stream_url`.
pub fn connect_document(stream_url: &Url, vertical: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Connect>\n    <Stream url=\"{}\">\n      <Parameter name=\"vertical\" value=\"{}\"/>\n    </Stream>\n  </Connect>\n</Response>\n",
        escape(stream_url.as_str()),
        escape(vertical)
    )
}

/// Builds the media stream URL for `call_id` under `base`, switching
/// `http(s)` to `ws(s)`.
pub fn stream_url(base: &str, call_id: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    if url.set_scheme(scheme).is_err() {
        return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
    }
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push("media-stream")
        .push(call_id);
    Ok(url)
}

/// Public base URL: the configured one, else derived from the `Host` header.
fn public_base(state: &AppState, headers: &HeaderMap) -> Option<String> {
    if let Some(url) = state.public_url.as_deref().filter(|u| !u.trim().is_empty()) {
        return Some(url.to_string());
    }
    headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .map(|host| format!("https://{}", host))
}

async fn connect_call(
    state: &AppState,
    headers: &HeaderMap,
    query: VoiceQuery,
    form: CallNotification,
    direction: &'static str,
) -> Response {
    let call_id = match form.call_sid.filter(|sid| !sid.trim().is_empty()) {
        Some(sid) => sid,
        None => {
            let generated = format!("call-{}", Uuid::new_v4());
            tracing::warn!(call_id = %generated, "call notification without CallSid, generated id");
            generated
        }
    };

    let vertical = match state.services.personas.resolve(query.vertical.as_deref()) {
        Ok((vertical, _)) => vertical,
        Err(e) => {
            tracing::warn!(call_id = %call_id, "rejecting call: {}", e);
            return xml_response(apology_document(&state.apology_phrase));
        }
    };

    let Some(base) = public_base(state, headers) else {
        tracing::error!(call_id = %call_id, "no public url configured and no Host header");
        return xml_response(apology_document(&state.apology_phrase));
    };
    let url = match stream_url(&base, &call_id) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(call_id = %call_id, base = %base, "invalid public url: {}", e);
            return xml_response(apology_document(&state.apology_phrase));
        }
    };

    tracing::info!(
        call_id = %call_id,
        vertical = %vertical,
        direction,
        reported_direction = form.direction.as_deref().unwrap_or(""),
        "connecting call to media stream"
    );
    xml_response(connect_document(&url, vertical.as_str()))
}

/// Handler for `POST /voice/incoming`.
pub async fn incoming_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<VoiceQuery>,
    Form(form): Form<CallNotification>,
) -> Response {
    connect_call(&state, &headers, query, form, "inbound").await
}

/// Handler for `POST /voice/outbound`.
pub async fn outbound_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<VoiceQuery>,
    Form(form): Form<CallNotification>,
) -> Response {
    connect_call(&state, &headers, query, form, "outbound").await
}

/// Handler for `POST /voice/fallback`.
pub async fn fallback_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    xml_response(apology_document(&state.apology_phrase))
}
