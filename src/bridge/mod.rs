//! Chat-to-agent orchestration.

pub mod cleanup;
pub mod commands;
mod events;
pub mod orchestrator;
pub mod queue;
pub mod recall;
pub mod state;

pub use orchestrator::{Bridge, BridgeOptions};
