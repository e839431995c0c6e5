//! Slack adapter: Web API calls and Socket Mode events.

pub mod client;
pub mod events;
