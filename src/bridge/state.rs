//! Per-chat processing state and its registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::bridge::recall::RecalledSets;
use crate::chat::{ChatType, InboundMessage};

/// Mutable state of one chat.
///
/// `generation` is bumped by every invalidating event (clear, recall of the
/// in-flight message, directory switch). Work that captured an older
/// generation must not mutate the state once it no longer matches.
#[derive(Debug, Default)]
pub struct ChatState {
    /// Fencing epoch.
    pub generation: u64,
    /// Thread currently serving this chat.
    pub thread_id: Option<String>,
    /// Turn in flight, if any.
    pub turn_id: Option<String>,
    /// Whether a message is being processed.
    pub processing: bool,
    /// Accumulated reply text of the current turn.
    pub buffer: String,
    /// Label of the most recent step the agent started.
    pub last_item: Option<String>,
    /// Source message of the current turn.
    pub message_id: Option<String>,
    /// Transient "in progress" reaction on the source message.
    pub reaction_id: Option<String>,
    /// Kind of conversation, for reply threading.
    pub chat_type: ChatType,
    /// Fired once when the current turn is over.
    pub done: Option<oneshot::Sender<()>>,
}

/// What turn completion hands back for replying.
#[derive(Debug)]
pub struct CompletedTurn {
    /// Buffered reply text.
    pub response: String,
    /// Source message, if still known.
    pub message_id: Option<String>,
    /// Transient reaction to remove.
    pub reaction_id: Option<String>,
    /// Conversation kind.
    pub chat_type: ChatType,
    /// Signal releasing the worker.
    pub done: Option<oneshot::Sender<()>>,
}

/// Identifiers released by an invalidation.
#[derive(Debug)]
pub struct Invalidated {
    /// Thread that was serving the chat.
    pub thread_id: Option<String>,
    /// Source message of the aborted turn.
    pub message_id: Option<String>,
    /// Transient reaction to remove.
    pub reaction_id: Option<String>,
    /// Signal releasing the worker.
    pub done: Option<oneshot::Sender<()>>,
}

impl ChatState {
    /// Enter processing for `msg`; returns the generation snapshot and the
    /// receiver that resolves when the turn is over.
    pub fn begin(&mut self, msg: &InboundMessage) -> (u64, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        self.processing = true;
        self.message_id = Some(msg.message_id.clone());
        self.reaction_id = None;
        self.chat_type = msg.chat_type;
        self.buffer.clear();
        self.last_item = None;
        self.done = Some(tx);
        (self.generation, rx)
    }

    /// [`begin`](Self::begin), backing out if `msg` was already recalled.
    ///
    /// Call with the chat lock held: a recall then either lands before this
    /// check and is consumed here, or finds the message in flight.
    pub fn begin_unless_recalled(
        &mut self,
        msg: &InboundMessage,
        recalled: &mut RecalledSets,
    ) -> Option<(u64, oneshot::Receiver<()>)> {
        let (generation, done) = self.begin(msg);
        if recalled.take(&msg.chat_id, &msg.message_id) {
            self.finish(generation);
            return None;
        }
        Some((generation, done))
    }

    /// Whether `generation` is still current.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Snapshot and reset the per-turn fields on completion.
    pub fn complete_turn(&mut self) -> CompletedTurn {
        self.processing = false;
        self.turn_id = None;
        self.last_item = None;
        CompletedTurn {
            response: std::mem::take(&mut self.buffer),
            message_id: self.message_id.take(),
            reaction_id: self.reaction_id.take(),
            chat_type: self.chat_type,
            done: self.done.take(),
        }
    }

    /// Bump the generation and reset everything tied to the chat's thread.
    pub fn invalidate(&mut self) -> Invalidated {
        self.generation += 1;
        self.processing = false;
        self.turn_id = None;
        self.last_item = None;
        self.buffer.clear();
        Invalidated {
            thread_id: self.thread_id.take(),
            message_id: self.message_id.take(),
            reaction_id: self.reaction_id.take(),
            done: self.done.take(),
        }
    }

    /// Leave processing after the worker is done with `generation`.
    ///
    /// Returns the source message and reaction that still need cleanup, or
    /// `None` if an invalidation already reset the state.
    pub fn finish(&mut self, generation: u64) -> Option<(Option<String>, Option<String>)> {
        if !self.is_current(generation) {
            return None;
        }
        self.processing = false;
        self.done = None;
        self.turn_id = None;
        Some((self.message_id.take(), self.reaction_id.take()))
    }
}

/// Shared handle to one chat's state.
pub type SharedChatState = Arc<Mutex<ChatState>>;

/// Registry of chat states. The map lock is held only for lookup so chats
/// never contend on each other's state.
#[derive(Debug, Clone, Default)]
pub struct ChatStates {
    inner: Arc<Mutex<HashMap<String, SharedChatState>>>,
}

impl ChatStates {
    /// State for `chat_id`, created on first use.
    pub async fn get_or_create(&self, chat_id: &str) -> SharedChatState {
        let mut map = self.inner.lock().await;
        Arc::clone(map.entry(chat_id.to_owned()).or_default())
    }

    /// Chat whose current thread is `thread_id`.
    pub async fn find_by_thread(&self, thread_id: &str) -> Option<(String, SharedChatState)> {
        for (chat_id, state) in self.snapshot().await {
            if state.lock().await.thread_id.as_deref() == Some(thread_id) {
                return Some((chat_id, state));
            }
        }
        None
    }

    /// Chats whose in-flight source message is `message_id`.
    pub async fn find_by_message(&self, message_id: &str) -> Vec<String> {
        let mut found = Vec::new();
        for (chat_id, state) in self.snapshot().await {
            if state.lock().await.message_id.as_deref() == Some(message_id) {
                found.push(chat_id);
            }
        }
        found
    }

    async fn snapshot(&self) -> Vec<(String, SharedChatState)> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), Arc::clone(state)))
            .collect()
    }
}
