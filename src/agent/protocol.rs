//! Wire types for the agent app-server protocol.
//!
//! The protocol is JSON-RPC shaped but carries no `"jsonrpc"` header. Every
//! line read from the child is one of:
//!
//! | Shape                        | Classified as                  |
//! |------------------------------|--------------------------------|
//! | `{id, result}` / `{id, error}` | [`Inbound::Response`]        |
//! | `{id, method, params}`       | [`Inbound::ServerRequest`]     |
//! | `{method, params}`           | [`Inbound::Notification`]      |
//! | anything else                | ignored                        |

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::RpcError;
use crate::{AppError, Result};

/// Method names sent by the client.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Handshake acknowledgement notification.
    pub const INITIALIZED: &str = "initialized";
    /// Create a new thread.
    pub const THREAD_START: &str = "thread/start";
    /// Reattach to an existing thread.
    pub const THREAD_RESUME: &str = "thread/resume";
    /// Start a turn on a thread.
    pub const TURN_START: &str = "turn/start";
    /// Interrupt the active turn on a thread.
    pub const TURN_INTERRUPT: &str = "turn/interrupt";

    /// A thread was created.
    pub const THREAD_STARTED: &str = "thread/started";
    /// Token accounting for a thread changed.
    pub const TOKEN_USAGE_UPDATED: &str = "thread/tokenUsage/updated";
    /// A turn began.
    pub const TURN_STARTED: &str = "turn/started";
    /// A turn reached a terminal status.
    pub const TURN_COMPLETED: &str = "turn/completed";
    /// An item within a turn began.
    pub const ITEM_STARTED: &str = "item/started";
    /// An item within a turn finished.
    pub const ITEM_COMPLETED: &str = "item/completed";
    /// Incremental agent reply text.
    pub const AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
    /// Incremental reasoning text.
    pub const REASONING_TEXT_DELTA: &str = "item/reasoning/textDelta";
    /// Incremental command output.
    pub const COMMAND_OUTPUT_DELTA: &str = "item/commandExecution/outputDelta";

    /// Server asks permission to run a command.
    pub const COMMAND_APPROVAL: &str = "item/commandExecution/requestApproval";
    /// Server asks permission to change files.
    pub const FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// Outbound request envelope.
#[derive(Debug, Serialize)]
pub struct RequestEnvelope<'a, P: Serialize> {
    /// Correlation id, unique per client.
    pub id: i64,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: P,
}

/// Outbound notification envelope. `params` is omitted when `None`.
#[derive(Debug, Serialize)]
pub struct NotificationEnvelope<'a> {
    /// Method name.
    pub method: &'a str,
    /// Optional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outbound answer to a server-initiated request.
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope<R: Serialize> {
    /// Id copied verbatim from the server request.
    pub id: Value,
    /// Answer payload.
    pub result: R,
}

/// A server notification, parameters left raw until a consumer decodes them.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Raw parameters (`Value::Null` when absent).
    pub params: Value,
}

impl Notification {
    /// Decode `params` into a typed parameter struct.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the parameters do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.params.clone()).map_err(|err| {
            AppError::Agent(format!("invalid {} params: {err}", self.method))
        })
    }
}

/// One classified inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Answer to one of our requests.
    Response {
        /// Request id being answered.
        id: i64,
        /// Either the `result` payload or the server error object.
        outcome: std::result::Result<Value, RpcError>,
    },
    /// Server-initiated request (approval) that expects an answer.
    ServerRequest {
        /// Server-chosen id, echoed back verbatim.
        id: Value,
        /// Method name.
        method: String,
        /// Raw parameters.
        params: Value,
    },
    /// Fire-and-forget server event.
    Notification(Notification),
}

/// Classify one line read from the agent's stdout.
///
/// Returns `Ok(None)` for blank lines and well-formed JSON that matches no
/// known shape (for example a response with id `0`).
///
/// # Errors
///
/// Returns `AppError::Agent` when the line is not a JSON object or an error
/// object cannot be decoded.
pub fn classify_line(line: &str) -> Result<Option<Inbound>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|err| AppError::Agent(format!("malformed json: {err}")))?;
    let Value::Object(mut obj) = value else {
        return Err(AppError::Agent("malformed message: not a json object".into()));
    };

    let id = obj.remove("id").filter(|id| !id.is_null());

    if let Some(method) = take_method(&mut obj) {
        let params = obj.remove("params").unwrap_or(Value::Null);
        return Ok(Some(match id {
            Some(id) => Inbound::ServerRequest { id, method, params },
            None => Inbound::Notification(Notification { method, params }),
        }));
    }

    let Some(id) = id.as_ref().and_then(Value::as_i64).filter(|id| *id != 0) else {
        return Ok(None);
    };

    if let Some(error) = obj.remove("error").filter(|e| !e.is_null()) {
        let error: RpcError = serde_json::from_value(error)
            .map_err(|err| AppError::Agent(format!("malformed error object: {err}")))?;
        return Ok(Some(Inbound::Response {
            id,
            outcome: Err(error),
        }));
    }

    match obj.remove("result") {
        Some(result) => Ok(Some(Inbound::Response {
            id,
            outcome: Ok(result),
        })),
        None => Ok(None),
    }
}

fn take_method(obj: &mut Map<String, Value>) -> Option<String> {
    match obj.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => Some(method),
        _ => None,
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Identity the client announces during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ClientInfo {
    /// Identity of this binary.
    #[must_use]
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: Some(env!("CARGO_PKG_VERSION").into()),
        }
    }
}

/// `initialize` parameters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Announced client identity.
    pub client_info: ClientInfo,
}

/// `initialize` result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Server identification string.
    #[serde(default)]
    pub user_agent: String,
}

// ── Threads and turns ─────────────────────────────────────────────────────────

/// `thread/start` parameters; every field is optional.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartParams {
    /// Model override for this thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Working directory override for this thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Approval policy override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_policy: Option<String>,
    /// Sandbox policy override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_policy: Option<String>,
}

/// Agent-side conversation handle.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    /// Thread id.
    pub id: String,
    /// First-message preview.
    #[serde(default)]
    pub preview: String,
    /// Working directory the thread was created in.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Creation time, unix seconds.
    #[serde(default)]
    pub created_at: i64,
}

/// `thread/start` and `thread/resume` result.
#[derive(Debug, Deserialize)]
pub struct ThreadResult {
    /// The started or resumed thread.
    pub thread: Thread,
}

/// Parameters naming a single thread (`thread/resume`, `turn/interrupt`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadIdParams {
    /// Target thread.
    pub thread_id: String,
}

/// One ordered part of a turn's input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserInput {
    /// Plain prompt text.
    Text {
        /// Prompt text.
        text: String,
    },
    /// Image on the local filesystem.
    LocalImage {
        /// Absolute path.
        path: String,
    },
    /// Image fetched by the server.
    Image {
        /// Remote URL.
        url: String,
    },
}

impl UserInput {
    /// Build the standard input list: the prompt followed by local images.
    #[must_use]
    pub fn prompt_with_images(prompt: &str, images: &[String]) -> Vec<Self> {
        let mut input = Vec::with_capacity(images.len() + 1);
        input.push(Self::Text {
            text: prompt.to_owned(),
        });
        input.extend(images.iter().map(|path| Self::LocalImage { path: path.clone() }));
        input
    }
}

/// `turn/start` parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartParams {
    /// Target thread.
    pub thread_id: String,
    /// Ordered input parts.
    pub input: Vec<UserInput>,
}

/// `turn/start` result.
///
/// Older servers answer `{turnId}`, newer ones `{turn: {id}}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartResult {
    #[serde(default)]
    turn_id: Option<String>,
    #[serde(default)]
    turn: Option<TurnRef>,
}

#[derive(Debug, Default, Deserialize)]
struct TurnRef {
    #[serde(default)]
    id: String,
}

impl TurnStartResult {
    /// Turn id from whichever shape the server used; empty when absent.
    #[must_use]
    pub fn into_turn_id(self) -> String {
        self.turn_id
            .filter(|id| !id.is_empty())
            .or_else(|| self.turn.map(|t| t.id))
            .unwrap_or_default()
    }
}

/// Answer to a server approval request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    /// `accept` or `decline`.
    pub decision: String,
    /// Optional settings that accompany an accept decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_settings: Option<HashMap<String, String>>,
}

// ── Notification params ───────────────────────────────────────────────────────

/// Params of `item/agentMessage/delta` and the other `*Delta` notifications.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeltaParams {
    /// Owning thread.
    pub thread_id: String,
    /// Owning turn.
    #[serde(default)]
    pub turn_id: String,
    /// Item receiving the text.
    #[serde(default)]
    pub item_id: String,
    /// Appended text.
    pub delta: String,
}

/// Params of `turn/completed`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnCompletedParams {
    /// Owning thread.
    pub thread_id: String,
    /// Completed turn.
    #[serde(default)]
    pub turn_id: String,
    /// `completed`, `interrupted`, or `failed`.
    #[serde(default)]
    pub status: String,
}

/// Params of `item/started` and `item/completed`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemParams {
    /// Owning thread.
    pub thread_id: String,
    /// Owning turn.
    #[serde(default)]
    pub turn_id: String,
    /// The item, when the server includes it.
    #[serde(default)]
    pub item: Option<ThreadItem>,
}

/// Subset of a thread item the bridge inspects.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ThreadItem {
    /// Item kind (`agentMessage`, `reasoning`, `commandExecution`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Item id.
    #[serde(default)]
    pub id: String,
    /// Command line, for `commandExecution` items.
    #[serde(default)]
    pub command: Option<String>,
    /// Tool name, for `mcpToolCall` items.
    #[serde(default)]
    pub tool: Option<String>,
}

impl ThreadItem {
    /// Short human label for the step this item represents.
    #[must_use]
    pub fn step_label(&self) -> String {
        match self.kind.as_str() {
            "agentMessage" => "writing reply".into(),
            "reasoning" => "thinking".into(),
            "commandExecution" => match self.command.as_deref() {
                Some(cmd) if !cmd.is_empty() => format!("running command `{cmd}`"),
                _ => "running command".into(),
            },
            "fileChange" => "editing files".into(),
            "mcpToolCall" => match self.tool.as_deref() {
                Some(tool) if !tool.is_empty() => format!("calling tool {tool}"),
                _ => "calling tool".into(),
            },
            "webSearch" => "searching the web".into(),
            "imageView" => "viewing image".into(),
            other => other.to_owned(),
        }
    }
}
