//! An out-of-the-box farming assistant built on the farm chat relay.
//!
//! The crate includes a CLI tool with an HTTP relay server and a terminal
//! chat. You can also use it as a library to bring chat sessions into your
//! own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod export;
pub mod server;
mod session;

pub use session::{
    Error, Reply, Session, SessionBuilder, SessionConfig, VoiceSettings,
    compose_user_content,
};

/// Re-exports of [`farm_chat_core`] crate.
pub mod core {
    pub use farm_chat_core::*;
}
