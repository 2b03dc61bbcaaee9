//! The HTTP relay between browsers and the upstream gateway.
//!
//! `POST /farmer-chat` takes `{ "messages": [...] }`, prepends the system
//! prompt and passes the upstream event stream through untouched.

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use farm_chat_core::{SYSTEM_PROMPT, UpstreamClient};
use farm_chat_core::upstream::UpstreamResponse;
use farm_chat_model::{ChatRequest, ErrorKind, Turn};
use futures_util::stream;
use serde_json::{Value, json};
use tower_http::set_header::SetResponseHeaderLayer;

const ALLOWED_HEADERS: &str =
    "authorization, x-client-info, apikey, content-type";

/// Shared state of the relay routes.
#[derive(Clone)]
pub struct ServerState {
    upstream: Result<UpstreamClient, Arc<str>>,
    system_prompt: Arc<str>,
}

impl ServerState {
    /// Creates a state that forwards to `upstream`.
    pub fn new(upstream: UpstreamClient) -> Self {
        Self {
            upstream: Ok(upstream),
            system_prompt: SYSTEM_PROMPT.into(),
        }
    }

    /// Creates a state without upstream credentials. Every valid request is
    /// answered with a server error carrying `reason`.
    pub fn unconfigured<S: Into<String>>(reason: S) -> Self {
        let reason: String = reason.into();
        Self {
            upstream: Err(reason.into()),
            system_prompt: SYSTEM_PROMPT.into(),
        }
    }

    /// Replaces the built-in system prompt.
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        let prompt: String = prompt.into();
        self.system_prompt = prompt.into();
        self
    }
}

/// Builds the relay router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/farmer-chat", post(farmer_chat).options(preflight))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .with_state(state)
}

enum RelayError {
    MissingMessages,
    Internal(String),
    Upstream(ErrorKind),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            RelayError::MissingMessages => {
                (StatusCode::BAD_REQUEST, "Messages array is required".into())
            }
            RelayError::Internal(reason) => {
                (StatusCode::INTERNAL_SERVER_ERROR, reason)
            }
            RelayError::Upstream(ErrorKind::RateLimited) => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limits exceeded, please try again later.".into(),
            ),
            RelayError::Upstream(ErrorKind::QuotaExceeded) => (
                StatusCode::PAYMENT_REQUIRED,
                "Payment required, please add funds to your workspace.".into(),
            ),
            RelayError::Upstream(ErrorKind::Unavailable) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AI gateway error".to_owned(),
            ),
        };
        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

async fn preflight() -> &'static str {
    "ok"
}

async fn farmer_chat(
    State(state): State<ServerState>,
    body: Bytes,
) -> Result<Response, RelayError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        warn!("unreadable request body: {err}");
        RelayError::Internal(err.to_string())
    })?;
    let turns: Vec<Turn> = match payload.get("messages") {
        Some(messages @ Value::Array(_)) => {
            serde_json::from_value(messages.clone())
                .map_err(|_| RelayError::MissingMessages)?
        }
        _ => return Err(RelayError::MissingMessages),
    };

    let upstream = state.upstream.as_ref().map_err(|reason| {
        error!("{reason}");
        RelayError::Internal(reason.to_string())
    })?;

    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(Turn::system(&*state.system_prompt));
    messages.extend(turns);
    debug!("relaying {} messages", messages.len());

    let resp = upstream
        .send_request(ChatRequest { messages })
        .await
        .map_err(|err| RelayError::Upstream(err.kind()))?;

    let body = Body::from_stream(passthrough(resp));
    Ok(([(header::CONTENT_TYPE, "text/event-stream")], body).into_response())
}

fn passthrough(
    resp: UpstreamResponse,
) -> impl futures_util::Stream<Item = Result<Bytes, io::Error>> {
    stream::unfold(Some(resp), |resp| async move {
        let mut resp = resp?;
        match resp.next_chunk().await {
            Ok(Some(chunk)) => Some((Ok(chunk), Some(resp))),
            Ok(None) => None,
            Err(err) => {
                error!("upstream stream broke: {err}");
                Some((Err(io::Error::other(err.to_string())), None))
            }
        }
    })
}
