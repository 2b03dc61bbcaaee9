use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ChatRequest;
use crate::response::ChatResponse;

/// The error type for a chat provider.
pub trait ChatProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A type that represents an upstream chat completion provider.
///
/// Once the provider is created, it should behave like a stateless object.
/// Every request carries the full transcript, and nothing is remembered
/// between requests.
pub trait ChatProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ChatProviderError;

    /// The response type for this provider.
    type Response: ChatResponse<Error = Self::Error>;

    /// Sends a streaming request to the provider.
    ///
    /// The returned future resolves once the response status is known.
    /// Non-success statuses must be reported as errors here, before any
    /// body byte is read.
    fn send_request(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
