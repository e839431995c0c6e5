//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use serde::Deserialize;
use serde_json::Value;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// JSON-RPC error code reserved by the agent server for an unknown thread id.
pub const THREAD_NOT_FOUND_CODE: i64 = -32001;

/// Generic "invalid request" code; the agent server reports unknown threads
/// under this code with a `thread not found` message prefix.
pub const INVALID_REQUEST_CODE: i64 = -32600;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Slack API or Socket Mode failure.
    Slack(String),
    /// Agent process or wire-protocol failure.
    Agent(String),
    /// Agent process could not be spawned or failed its handshake.
    Startup(String),
    /// The agent server answered a request with an error object.
    Rpc(RpcError),
    /// A request did not receive a response in time.
    Timeout(String),
    /// The operation was abandoned because the owning context was cancelled.
    Cancelled(String),
    /// The operation was refused because work is still in flight.
    Busy(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error reports that the agent no longer knows a thread id.
    #[must_use]
    pub fn is_thread_not_found(&self) -> bool {
        matches!(self, Self::Rpc(rpc) if rpc.kind() == RpcErrorKind::ThreadNotFound)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Slack(msg) => write!(f, "slack: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Rpc(err) => write!(f, "rpc: {err}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Agent(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Classification of server-reported RPC errors the bridge reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// The referenced thread is unknown to the agent server.
    ThreadNotFound,
    /// Any other server error; surfaced to the caller unchanged.
    Other,
}

/// Error object carried by a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcError {
    /// Classify this error.
    ///
    /// The dedicated [`THREAD_NOT_FOUND_CODE`] is authoritative. Servers that
    /// predate it report the condition as [`INVALID_REQUEST_CODE`] with a
    /// `thread not found` message, which is accepted for that code only.
    #[must_use]
    pub fn kind(&self) -> RpcErrorKind {
        if self.code == THREAD_NOT_FOUND_CODE {
            return RpcErrorKind::ThreadNotFound;
        }
        if self.code == INVALID_REQUEST_CODE
            && self
                .message
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("thread not found")
        {
            return RpcErrorKind::ThreadNotFound;
        }
        RpcErrorKind::Other
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}
