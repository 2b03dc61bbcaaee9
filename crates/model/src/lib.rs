//! The shared protocol for talking to streaming chat completion providers.
//!
//! This crate establishes the types that flow between the relay and any
//! upstream provider: conversation turns, the outgoing request, the raw
//! streaming response, and the decoder that turns server-sent events into
//! text fragments.
//!
//! Providers implement [`ChatProvider`] and hand back a [`ChatResponse`]
//! that yields raw body chunks. Callers that need the assistant text feed
//! those chunks through a [`StreamDecoder`].

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod decoder;
mod error;
mod provider;
mod request;
mod response;

pub use decoder::{DecodeSummary, StreamDecoder};
pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
