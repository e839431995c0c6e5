//! Socket Mode push-event translation.
//!
//! Slack delivers user messages and deletions as `message` events. They are
//! flattened into [`MessageFields`], classified, and handed to the [`Bridge`]
//! stored in the listener's user state.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackEventCallbackBody,
    SlackMessageEvent, SlackPushEventCallback,
};
use tracing::{debug, warn};

use crate::bridge::commands::Command;
use crate::bridge::Bridge;
use crate::chat::{ChatType, InboundMessage, RecallEvent};

/// The parts of a Slack message event the bridge cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFields {
    /// Conversation id.
    pub channel: Option<String>,
    /// `im`, `mpim`, `channel`, or `group`.
    pub channel_type: Option<String>,
    /// Message timestamp, Slack's message id.
    pub ts: String,
    /// Event subtype such as `message_deleted`.
    pub subtype: Option<String>,
    /// Whether a bot posted it.
    pub from_bot: bool,
    /// Message text.
    pub text: String,
    /// Private URLs of attached images.
    pub images: Vec<String>,
    /// Timestamp of the deleted message, for deletions.
    pub deleted_ts: Option<String>,
}

impl MessageFields {
    /// Flatten a Slack message event.
    #[must_use]
    pub fn from_event(event: &SlackMessageEvent) -> Self {
        let content = event.content.as_ref();
        let images = content
            .and_then(|c| c.files.as_ref())
            .map(|files| {
                files
                    .iter()
                    .filter(|f| {
                        f.mimetype
                            .as_ref()
                            .is_some_and(|m| m.0.starts_with("image/"))
                    })
                    .filter_map(|f| f.url_private.as_ref().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            channel: event.origin.channel.as_ref().map(|c| c.0.clone()),
            channel_type: event.origin.channel_type.as_ref().map(|t| t.0.clone()),
            ts: event.origin.ts.0.clone(),
            subtype: event
                .subtype
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok())
                .and_then(|v| v.as_str().map(str::to_owned)),
            from_bot: event.sender.bot_id.is_some(),
            text: content.and_then(|c| c.text.clone()).unwrap_or_default(),
            images,
            deleted_ts: event.deleted_ts.as_ref().map(|ts| ts.0.clone()),
        }
    }
}

/// What a Slack message event means to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackInbound {
    /// A user prompt or command.
    Message(InboundMessage),
    /// A user deleted a message.
    Recall(RecallEvent),
}

/// Classify a flattened event. Bot posts, edits, joins and empty messages
/// yield `None`.
#[must_use]
pub fn classify(fields: MessageFields) -> Option<SlackInbound> {
    match fields.subtype.as_deref() {
        Some("message_deleted") => {
            let message_id = fields.deleted_ts?;
            return Some(SlackInbound::Recall(RecallEvent {
                chat_id: fields.channel,
                message_id,
            }));
        }
        Some("bot_message") => return None,
        None | Some("file_share" | "thread_broadcast") => {}
        Some(_) => return None,
    }

    if fields.from_bot {
        return None;
    }

    let chat_id = fields.channel?;
    let text = strip_mentions(&fields.text).to_owned();
    if text.is_empty() && fields.images.is_empty() {
        return None;
    }

    let chat_type = match fields.channel_type.as_deref() {
        Some("im") => ChatType::Direct,
        Some(_) => ChatType::Group,
        None if chat_id.starts_with('D') => ChatType::Direct,
        None => ChatType::Group,
    };

    Some(SlackInbound::Message(InboundMessage {
        chat_id,
        message_id: fields.ts,
        chat_type,
        text,
        image_keys: fields.images,
    }))
}

/// Drop leading `<@U…>` mentions so commands work when the bot is addressed.
#[must_use]
pub fn strip_mentions(text: &str) -> &str {
    let mut rest = text.trim();
    while let Some(tail) = rest.strip_prefix("<@") {
        match tail.find('>') {
            Some(end) => rest = tail[end + 1..].trim_start(),
            None => break,
        }
    }
    rest.trim_end()
}

/// Push-event callback registered with Socket Mode.
///
/// Prompts are enqueued before the event is acknowledged so per-chat order
/// matches delivery order. Commands may restart the agent and run in their
/// own task.
///
/// # Errors
///
/// Never fails; unusable events are logged and dropped.
pub async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let bridge: Option<Bridge> = {
        let guard = state.read().await;
        guard.get_user_state::<Bridge>().cloned()
    };
    let Some(bridge) = bridge else {
        warn!("bridge not available; dropping slack event");
        return Ok(());
    };

    let SlackEventCallbackBody::Message(message) = event.event else {
        debug!("ignoring non-message push event");
        return Ok(());
    };

    match classify(MessageFields::from_event(&message)) {
        Some(SlackInbound::Message(msg)) if Command::parse(&msg.text).is_some() => {
            tokio::spawn(async move { bridge.handle_inbound(msg).await });
        }
        Some(SlackInbound::Message(msg)) => bridge.handle_inbound(msg).await,
        Some(SlackInbound::Recall(recall)) => bridge.handle_recall(recall).await,
        None => debug!("ignoring slack message event"),
    }
    Ok(())
}
