//! Slash commands handled inline instead of being sent to the agent.

use std::path::PathBuf;

use crate::chat::InboundMessage;

/// Help text listing every command.
pub const HELP_TEXT: &str = "Available commands:\n\
/help or /h        show this help\n\
/pwd               show the working directory\n\
/cd <dir>          switch the working directory\n\
/status or /s      show what the agent is doing\n\
/queue or /q       list queued messages\n\
/clear or /c       clear this chat's session\n\
/reset or /r       restart the agent";

/// Longest preview of a queued message shown by `/queue`.
const PREVIEW_CHARS: usize = 80;

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/help`, `/h`.
    Help,
    /// `/pwd`.
    ShowDir,
    /// `/cd <dir>`.
    SwitchDir(PathBuf),
    /// `/clear`, `/c`.
    Clear,
    /// `/queue`, `/q`.
    Queue,
    /// `/status`, `/s`.
    Status,
    /// `/reset`, `/r`.
    Reset,
}

impl Command {
    /// Parse message text; `None` means an ordinary prompt.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text {
            "/help" | "/h" => return Some(Self::Help),
            "/pwd" => return Some(Self::ShowDir),
            "/clear" | "/c" => return Some(Self::Clear),
            "/queue" | "/q" => return Some(Self::Queue),
            "/status" | "/s" => return Some(Self::Status),
            "/reset" | "/r" => return Some(Self::Reset),
            _ => {}
        }

        let (head, arg) = text.split_once(char::is_whitespace)?;
        let arg = arg.trim();
        if head == "/cd" && !arg.is_empty() {
            return Some(Self::SwitchDir(PathBuf::from(arg)));
        }
        None
    }
}

/// Body of the `/status` reply.
#[must_use]
pub fn format_status(processing: bool, last_item: Option<&str>, pending: usize) -> String {
    if !processing {
        return format!("Status: idle\nPending: {pending}");
    }
    let step = last_item.unwrap_or("generating reply");
    format!("Status: processing\nStep: {step}\nPending: {pending}")
}

/// Body of the `/queue` reply.
#[must_use]
pub fn format_queue(processing: Option<&str>, pending: &[InboundMessage]) -> String {
    let mut lines = vec![
        format!("Processing: {}", processing.unwrap_or("none")),
        format!("Pending: {}", pending.len()),
    ];
    for (idx, msg) in pending.iter().enumerate() {
        lines.push(format!("{}) {}", idx + 1, preview(&msg.text)));
    }
    lines.join("\n")
}

fn preview(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "(empty)".into();
    }
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}
