//! Agent app-server protocol client.
//!
//! Speaks newline-delimited JSON over a child process's stdio:
//!
//! - `codec`: bounded line framing.
//! - `protocol`: envelopes, inbound classification, typed params and results.
//! - `spawner`: child process construction.
//! - `reader` / `writer`: the stdio tasks.
//! - `client`: [`AgentClient`], request correlation and lifecycle.

pub mod client;
pub mod codec;
pub mod protocol;
pub mod reader;
pub mod spawner;
pub mod writer;

pub use client::{AgentClient, ClientState};
pub use protocol::Notification;
