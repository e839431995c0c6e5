//! Chat platform boundary.
//!
//! The orchestrator sees the messaging service only through
//! [`ChatPlatform`] and the two inbound event types defined here. The Slack
//! adapter is one implementation; tests use a recording mock.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::driver::DriverFuture;
use crate::Result;

/// Kind of conversation a message arrived in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    /// One-to-one conversation with the bot.
    #[default]
    Direct,
    /// Multi-member channel or group.
    Group,
}

impl ChatType {
    /// Group conversations keep bot replies in the message's thread.
    #[must_use]
    pub fn reply_in_thread(self) -> bool {
        matches!(self, Self::Group)
    }
}

/// A user message delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation id.
    pub chat_id: String,
    /// Platform message id.
    pub message_id: String,
    /// Conversation kind.
    pub chat_type: ChatType,
    /// Message text.
    pub text: String,
    /// Platform-specific handles of attached images.
    pub image_keys: Vec<String>,
}

/// The user withdrew a previously sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecallEvent {
    /// Conversation id; some platforms omit it.
    pub chat_id: Option<String>,
    /// Withdrawn message id.
    pub message_id: String,
}

/// Outbound operations the orchestrator needs from a messaging service.
pub trait ChatPlatform: Send + Sync {
    /// Post `text` to a conversation.
    ///
    /// # Errors
    ///
    /// Returns a platform error if the message cannot be delivered.
    fn send_text<'a>(&'a self, chat_id: &'a str, text: &'a str) -> DriverFuture<'a, Result<()>>;

    /// Reply to `message_id`, optionally inside its thread.
    ///
    /// # Errors
    ///
    /// Returns a platform error if the reply cannot be delivered.
    fn reply_text<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
        text: &'a str,
        in_thread: bool,
    ) -> DriverFuture<'a, Result<()>>;

    /// Add a named reaction and return an id usable with
    /// [`remove_reaction`](Self::remove_reaction).
    ///
    /// # Errors
    ///
    /// Returns a platform error if the reaction cannot be added.
    fn add_reaction<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
        emoji: &'a str,
    ) -> DriverFuture<'a, Result<String>>;

    /// Remove a reaction previously returned by `add_reaction`.
    ///
    /// # Errors
    ///
    /// Returns a platform error if the reaction cannot be removed.
    fn remove_reaction<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
        reaction_id: &'a str,
    ) -> DriverFuture<'a, Result<()>>;

    /// Fetch an attached image to a local file and return its path.
    ///
    /// # Errors
    ///
    /// Returns a platform or I/O error if the download fails.
    fn download_image<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
        image_key: &'a str,
    ) -> DriverFuture<'a, Result<PathBuf>>;
}
