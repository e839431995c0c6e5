#![forbid(unsafe_code)]

//! Bridge between chat conversations and a local coding agent subprocess.

pub mod agent;
pub mod bridge;
pub mod chat;
pub mod config;
pub mod driver;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod slack;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
