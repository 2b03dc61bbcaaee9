//! A chat provider for OpenAI-compatible completion gateways.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use farm_chat_model::{
    ChatProvider, ChatProviderError, ChatRequest, ErrorKind,
};
use mime::Mime;
use reqwest::{Client, header};

pub use config::{GatewayConfig, GatewayConfigBuilder};
use io::Chunks;
pub use response::GatewayResponse;

/// Error type for [`GatewayProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    status: Option<u16>,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            status: None,
        }
    }

    fn from_status(status: u16, kind: ErrorKind) -> Self {
        Self {
            message: format!("gateway responded with status {status}"),
            kind,
            status: Some(status),
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the upstream HTTP status, if the gateway answered at all.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ChatProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Provider for an OpenAI-compatible completion gateway.
#[derive(Clone, Debug)]
pub struct GatewayProvider {
    client: Client,
    config: Arc<GatewayConfig>,
}

impl GatewayProvider {
    /// Creates a new `GatewayProvider` with the given configuration.
    #[inline]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl ChatProvider for GatewayProvider {
    type Error = Error;
    type Response = GatewayResponse;

    fn send_request(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let gateway_req = proto::create_request(req, &self.config);
        debug!("calling the gateway with {} messages", req.messages.len());
        let resp_fut = self
            .client
            .post(self.config.completions_url())
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .json(&gateway_req)
            .send();

        async move {
            let resp = match resp_fut.await {
                Ok(resp) => resp,
                Err(err) => {
                    error!("gateway request failed: {err}");
                    return Err(Error::new(
                        format!("{err}"),
                        ErrorKind::Unavailable,
                    ));
                }
            };

            // The status decides the outcome before any body byte is read.
            let status = resp.status().as_u16();
            if let Some(kind) = ErrorKind::from_status(status) {
                error!("gateway error: {status} ({kind})");
                return Err(Error::from_status(status, kind));
            }

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_event_stream = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| m.subtype().as_str() == "event-stream")
                .unwrap_or(false);
            if !is_event_stream {
                warn!("unexpected content type: {content_type:?}");
            }

            // Here we got a successful response.
            Ok(GatewayResponse::from_chunks(Chunks::from_response(resp)))
        }
    }
}
