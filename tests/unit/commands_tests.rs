//! Unit tests for chat command parsing and reply formatting.

use std::path::PathBuf;

use agent_bridge::bridge::commands::{format_queue, format_status, Command};
use agent_bridge::chat::{ChatType, InboundMessage};

fn msg(id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        chat_id: "C1".into(),
        message_id: id.into(),
        chat_type: ChatType::Direct,
        text: text.into(),
        image_keys: Vec::new(),
    }
}

#[test]
fn aliases_parse_to_the_same_command() {
    assert_eq!(Command::parse("/help"), Some(Command::Help));
    assert_eq!(Command::parse("/h"), Some(Command::Help));
    assert_eq!(Command::parse("/clear"), Some(Command::Clear));
    assert_eq!(Command::parse("/c"), Some(Command::Clear));
    assert_eq!(Command::parse("/queue"), Some(Command::Queue));
    assert_eq!(Command::parse("/q"), Some(Command::Queue));
    assert_eq!(Command::parse("/status"), Some(Command::Status));
    assert_eq!(Command::parse("/s"), Some(Command::Status));
    assert_eq!(Command::parse("/reset"), Some(Command::Reset));
    assert_eq!(Command::parse("/r"), Some(Command::Reset));
    assert_eq!(Command::parse("  /pwd  "), Some(Command::ShowDir));
}

#[test]
fn cd_takes_the_rest_of_the_line() {
    assert_eq!(
        Command::parse("/cd  /tmp/my project "),
        Some(Command::SwitchDir(PathBuf::from("/tmp/my project")))
    );
    assert_eq!(
        Command::parse("/cd ../sibling"),
        Some(Command::SwitchDir(PathBuf::from("../sibling")))
    );
}

#[test]
fn bare_cd_and_prompts_are_not_commands() {
    assert_eq!(Command::parse("/cd"), None);
    assert_eq!(Command::parse("/cd   "), None);
    assert_eq!(Command::parse("/helpme"), None);
    assert_eq!(Command::parse("please /clear the cache"), None);
    assert_eq!(Command::parse("hello"), None);
}

#[test]
fn status_idle_and_processing() {
    assert_eq!(format_status(false, None, 2), "Status: idle\nPending: 2");
    assert_eq!(
        format_status(true, None, 0),
        "Status: processing\nStep: generating reply\nPending: 0"
    );
    assert_eq!(
        format_status(true, Some("editing files"), 1),
        "Status: processing\nStep: editing files\nPending: 1"
    );
}

#[test]
fn queue_lists_numbered_previews() {
    let pending = vec![msg("m2", "second"), msg("m3", "   ")];
    assert_eq!(
        format_queue(Some("m1"), &pending),
        "Processing: m1\nPending: 2\n1) second\n2) (empty)"
    );
    assert_eq!(format_queue(None, &[]), "Processing: none\nPending: 0");
}

#[test]
fn long_previews_are_truncated_on_char_boundaries() {
    let text = "é".repeat(100);
    let out = format_queue(None, &[msg("m1", &text)]);
    let preview = out.lines().nth(2).expect("preview line");

    assert_eq!(preview, format!("1) {}...", "é".repeat(80)));
}
