//! Per-chat orchestration of agent turns.
//!
//! Every chat gets one bounded queue and one worker task, so a chat never has
//! two turns in flight while different chats run fully in parallel. Each
//! shared registry (chat states, queues, recalled ids, active threads) has its
//! own lock. The agent backend sits behind a read-write lock and is replaced
//! wholesale inside the exclusive `switch` section.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bridge::cleanup;
use crate::bridge::commands::{format_queue, format_status, Command, HELP_TEXT};
use crate::bridge::queue::{ChatQueue, EnqueueError};
use crate::bridge::recall::RecalledSets;
use crate::bridge::state::{ChatStates, SharedChatState};
use crate::chat::{ChatPlatform, InboundMessage, RecallEvent};
use crate::config::GlobalConfig;
use crate::driver::{AgentBackend, AgentLauncher};
use crate::persistence::session_repo::SessionStore;
use crate::{AppError, Result};

/// Reaction shown while a message is being worked on.
pub const IN_PROGRESS_REACTION: &str = "eyes";
/// Reaction left on a message once it has been answered.
pub const DONE_REACTION: &str = "white_check_mark";
/// Reply used when a turn produced no text.
pub const EMPTY_RESPONSE: &str = "✅ (no text response)";
/// Reply sent when a chat's queue is full.
pub const QUEUE_FULL_TEXT: &str = "⚠️ Too many queued messages, please try again later.";
/// Reply sent when the agent process is gone.
pub const AGENT_DOWN_TEXT: &str = "❌ Agent is not running, send /reset to restart it.";

/// Tunables for a [`Bridge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Capacity of each chat queue.
    pub queue_capacity: usize,
    /// Period of the stale-session sweep.
    pub cleanup_interval: Duration,
}

impl From<&GlobalConfig> for BridgeOptions {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            cleanup_interval: config.cleanup_interval(),
        }
    }
}

/// Cheaply cloneable handle to the orchestrator.
#[derive(Clone)]
pub struct Bridge {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) platform: Arc<dyn ChatPlatform>,
    launcher: Arc<dyn AgentLauncher>,
    pub(super) store: SessionStore,
    options: BridgeOptions,
    agent: RwLock<Arc<dyn AgentBackend>>,
    switch: Mutex<()>,
    pub(super) states: ChatStates,
    queues: Mutex<HashMap<String, Arc<ChatQueue>>>,
    recalled: Mutex<RecalledSets>,
    pub(super) active: Mutex<HashSet<String>>,
    pub(super) cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Launch the agent in `working_dir` and start the background tasks.
    ///
    /// `cancel` is the root token: cancelling it (or calling
    /// [`shutdown`](Self::shutdown)) stops every worker and in-flight request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the agent cannot be launched.
    pub async fn start(
        platform: Arc<dyn ChatPlatform>,
        launcher: Arc<dyn AgentLauncher>,
        store: SessionStore,
        working_dir: &Path,
        options: BridgeOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let agent = launcher.launch(working_dir, &cancel).await?;

        let bridge = Self {
            inner: Arc::new(Inner {
                platform,
                launcher,
                store: store.clone(),
                options: options.clone(),
                agent: RwLock::new(Arc::clone(&agent)),
                switch: Mutex::new(()),
                states: ChatStates::default(),
                queues: Mutex::new(HashMap::new()),
                recalled: Mutex::new(RecalledSets::default()),
                active: Mutex::new(HashSet::new()),
                cancel: cancel.clone(),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        bridge.spawn_event_consumer(&agent).await;
        bridge
            .track(cleanup::spawn_session_cleanup(
                store,
                options.cleanup_interval,
                cancel,
            ))
            .await;

        info!(working_dir = %working_dir.display(), "bridge started");
        Ok(bridge)
    }

    /// Stop everything: cancel the root token, close all chat queues, stop the
    /// agent, and wait for every background task.
    pub async fn shutdown(&self) {
        info!("bridge shutting down");
        self.inner.cancel.cancel();

        let queues: Vec<Arc<ChatQueue>> =
            self.inner.queues.lock().await.drain().map(|(_, q)| q).collect();
        for queue in queues {
            queue.close().await;
        }

        if let Err(err) = self.agent().await.stop().await {
            warn!(error = %err, "agent stop failed during shutdown");
        }

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                warn!(%err, "bridge task panicked");
            }
        }
        info!("bridge stopped");
    }

    /// Entry point for every inbound chat message.
    pub async fn handle_inbound(&self, msg: InboundMessage) {
        debug!(
            chat_id = msg.chat_id.as_str(),
            message_id = msg.message_id.as_str(),
            images = msg.image_keys.len(),
            "inbound message"
        );
        match Command::parse(&msg.text) {
            Some(command) => self.run_command(command, &msg).await,
            None => self.enqueue(msg).await,
        }
    }

    /// Entry point for message recall events.
    pub async fn handle_recall(&self, event: RecallEvent) {
        let message_id = event.message_id.as_str();
        if message_id.is_empty() {
            return;
        }

        match event.chat_id.as_deref().filter(|c| !c.is_empty()) {
            Some(chat_id) => {
                self.inner
                    .recalled
                    .lock()
                    .await
                    .mark(Some(chat_id), message_id);
                let state = self.inner.states.get_or_create(chat_id).await;
                let in_flight = state.lock().await.message_id.as_deref() == Some(message_id);
                if in_flight {
                    info!(chat_id, message_id, "in-flight message recalled, clearing chat");
                    self.clear_chat(chat_id).await;
                }
                self.drop_pending(chat_id, message_id).await;
            }
            None => {
                self.inner.recalled.lock().await.mark(None, message_id);
                for chat_id in self.inner.states.find_by_message(message_id).await {
                    info!(chat_id, message_id, "in-flight message recalled, clearing chat");
                    self.clear_chat(&chat_id).await;
                }
            }
        }

        self.drop_pending_everywhere(message_id).await;
    }

    /// Invalidate a chat: interrupt its turn, delete its session, and drop
    /// its queued messages.
    pub async fn clear_chat(&self, chat_id: &str) {
        let _switch = self.inner.switch.lock().await;
        self.reset_chat(chat_id, true).await;
    }

    /// Restart the agent rooted at `dir` and reset `chat_id`.
    ///
    /// Relative paths resolve against the current working directory.
    /// Switching to the current directory is a no-op.
    ///
    /// # Errors
    ///
    /// - `AppError::Busy` while any turn is active, naming the count.
    /// - `AppError::Io` if `dir` is not an accessible directory.
    /// - `AppError::Startup` if the agent fails to start there; the previous
    ///   directory is restored.
    pub async fn switch_working_dir(&self, chat_id: &str, dir: &Path) -> Result<PathBuf> {
        let _switch = self.inner.switch.lock().await;
        self.ensure_idle().await?;

        let current = self.agent().await.working_dir();
        let target = resolve_dir(&current, dir)?;
        if target == current {
            return Ok(target);
        }

        self.replace_agent(&target).await?;
        self.reset_chat(chat_id, false).await;
        self.inner.active.lock().await.clear();
        info!(chat_id, working_dir = %target.display(), "working directory switched");
        Ok(target)
    }

    /// Restart the agent in its current directory and reset `chat_id`.
    ///
    /// # Errors
    ///
    /// Same as [`switch_working_dir`](Self::switch_working_dir).
    pub async fn restart_agent(&self, chat_id: &str) -> Result<PathBuf> {
        let _switch = self.inner.switch.lock().await;
        self.ensure_idle().await?;

        let current = self.agent().await.working_dir();
        self.replace_agent(&current).await?;
        self.reset_chat(chat_id, false).await;
        self.inner.active.lock().await.clear();
        info!(chat_id, working_dir = %current.display(), "agent restarted");
        Ok(current)
    }

    /// Directory the current agent runs in.
    pub async fn working_dir(&self) -> PathBuf {
        self.agent().await.working_dir()
    }

    /// Background task handles held for shutdown.
    pub async fn held_tasks(&self) -> usize {
        self.inner.tasks.lock().await.len()
    }

    /// Number of threads with a turn in flight.
    pub async fn active_turns(&self) -> usize {
        self.inner.active.lock().await.len()
    }

    /// Whether `chat_id` is processing a message.
    pub async fn is_processing(&self, chat_id: &str) -> bool {
        self.inner
            .states
            .get_or_create(chat_id)
            .await
            .lock()
            .await
            .processing
    }

    /// Messages waiting in `chat_id`'s queue.
    pub async fn pending_len(&self, chat_id: &str) -> usize {
        match self.existing_queue(chat_id).await {
            Some(queue) => queue.pending_len().await,
            None => 0,
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn run_command(&self, command: Command, msg: &InboundMessage) {
        let chat_id = msg.chat_id.as_str();
        info!(chat_id, ?command, "running command");

        let text = match command {
            Command::Help => HELP_TEXT.to_owned(),
            Command::ShowDir => format!(
                "📁 Working directory: {}\nSend /help for available commands.",
                self.working_dir().await.display()
            ),
            Command::SwitchDir(dir) => match self.switch_working_dir(chat_id, &dir).await {
                Ok(dir) => format!("✅ Switched working directory to {}", dir.display()),
                Err(err) => format!("❌ Failed to switch working directory: {err}"),
            },
            Command::Clear => {
                self.clear_chat(chat_id).await;
                "✅ Cleared this chat's session (working directory unchanged).".to_owned()
            }
            Command::Queue => self.queue_text(chat_id).await,
            Command::Status => self.status_text(chat_id).await,
            Command::Reset => match self.restart_agent(chat_id).await {
                Ok(_) => "✅ Agent restarted; this chat starts a new session.".to_owned(),
                Err(err) => format!("❌ Failed to restart agent: {err}"),
            },
        };

        self.reply(chat_id, &msg.message_id, &text, msg.chat_type.reply_in_thread())
            .await;
        if let Err(err) = self
            .inner
            .platform
            .add_reaction(chat_id, &msg.message_id, DONE_REACTION)
            .await
        {
            debug!(error = %err, "failed to mark command handled");
        }
    }

    async fn status_text(&self, chat_id: &str) -> String {
        let state = self.inner.states.get_or_create(chat_id).await;
        let (processing, last_item) = {
            let st = state.lock().await;
            (st.processing, st.last_item.clone())
        };
        format_status(processing, last_item.as_deref(), self.pending_len(chat_id).await)
    }

    async fn queue_text(&self, chat_id: &str) -> String {
        let state = self.inner.states.get_or_create(chat_id).await;
        let processing = {
            let st = state.lock().await;
            st.message_id.clone().filter(|_| st.processing)
        };
        let pending = match self.existing_queue(chat_id).await {
            Some(queue) => queue.pending().await,
            None => Vec::new(),
        };
        format_queue(processing.as_deref(), &pending)
    }

    // ── Queueing ──────────────────────────────────────────────────────────────

    async fn enqueue(&self, msg: InboundMessage) {
        if self.inner.cancel.is_cancelled() {
            debug!("bridge shutting down, ignoring message");
            return;
        }
        if self
            .inner
            .recalled
            .lock()
            .await
            .contains(&msg.chat_id, &msg.message_id)
        {
            debug!(message_id = msg.message_id.as_str(), "message already recalled");
            return;
        }

        let queue = self.queue_for(&msg.chat_id).await;
        match queue.push(msg).await {
            Ok(()) => {}
            Err(EnqueueError::Full(msg)) => {
                warn!(chat_id = msg.chat_id.as_str(), "chat queue full, dropping message");
                self.reply(
                    &msg.chat_id,
                    &msg.message_id,
                    QUEUE_FULL_TEXT,
                    msg.chat_type.reply_in_thread(),
                )
                .await;
            }
            Err(EnqueueError::Closed(msg)) => {
                debug!(chat_id = msg.chat_id.as_str(), "chat queue closed, dropping message");
            }
        }
    }

    async fn queue_for(&self, chat_id: &str) -> Arc<ChatQueue> {
        let mut queues = self.inner.queues.lock().await;
        if let Some(queue) = queues.get(chat_id) {
            return Arc::clone(queue);
        }

        let (queue, rx) = ChatQueue::new(self.inner.options.queue_capacity);
        let queue = Arc::new(queue);
        queues.insert(chat_id.to_owned(), Arc::clone(&queue));
        drop(queues);

        let worker = tokio::spawn(self.clone().run_worker(
            chat_id.to_owned(),
            Arc::clone(&queue),
            rx,
        ));
        self.track(worker).await;
        queue
    }

    async fn existing_queue(&self, chat_id: &str) -> Option<Arc<ChatQueue>> {
        self.inner.queues.lock().await.get(chat_id).cloned()
    }

    async fn drop_pending(&self, chat_id: &str, message_id: &str) {
        if let Some(queue) = self.existing_queue(chat_id).await {
            queue.remove(message_id).await;
        }
    }

    async fn drop_pending_everywhere(&self, message_id: &str) {
        let queues: Vec<Arc<ChatQueue>> =
            self.inner.queues.lock().await.values().cloned().collect();
        for queue in queues {
            queue.remove(message_id).await;
        }
    }

    async fn drop_queued(&self, chat_id: &str) -> usize {
        match self.existing_queue(chat_id).await {
            Some(queue) => queue.drain().await,
            None => 0,
        }
    }

    // ── Worker ────────────────────────────────────────────────────────────────

    async fn run_worker(
        self,
        chat_id: String,
        queue: Arc<ChatQueue>,
        mut rx: mpsc::Receiver<InboundMessage>,
    ) {
        debug!(chat_id, "chat worker started");
        loop {
            tokio::select! {
                biased;

                () = self.inner.cancel.cancelled() => break,

                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if !queue.claim(&msg.message_id).await {
                        debug!(
                            chat_id,
                            message_id = msg.message_id.as_str(),
                            "skipping dropped message"
                        );
                        continue;
                    }
                    let span = info_span!(
                        "process_message",
                        chat_id = msg.chat_id.as_str(),
                        message_id = msg.message_id.as_str()
                    );
                    self.process_message(msg).instrument(span).await;
                }
            }
        }
        debug!(chat_id, "chat worker stopped");
    }

    async fn process_message(&self, msg: InboundMessage) {
        let state = self.inner.states.get_or_create(&msg.chat_id).await;
        let begun = {
            let mut st = state.lock().await;
            let mut recalled = self.inner.recalled.lock().await;
            st.begin_unless_recalled(&msg, &mut recalled)
        };
        let Some((generation, done)) = begun else {
            info!("message recalled before processing, skipping");
            return;
        };

        if self.start_turn(&state, generation, &msg).await {
            tokio::select! {
                _ = done => {}
                () = self.inner.cancel.cancelled() => {
                    debug!("shutdown while waiting for turn completion");
                }
            }
        }

        let leftover = state.lock().await.finish(generation);
        if let Some((Some(message_id), Some(reaction_id))) = leftover {
            self.remove_reaction(&msg.chat_id, &message_id, &reaction_id)
                .await;
        }
    }

    /// Run steps up to and including turn start. Returns `true` when a turn
    /// is in flight and the worker should wait for its completion.
    async fn start_turn(
        &self,
        state: &SharedChatState,
        generation: u64,
        msg: &InboundMessage,
    ) -> bool {
        let chat_id = msg.chat_id.as_str();

        match self
            .inner
            .platform
            .add_reaction(chat_id, &msg.message_id, IN_PROGRESS_REACTION)
            .await
        {
            Ok(reaction_id) => {
                let mut st = state.lock().await;
                if st.is_current(generation) {
                    st.reaction_id = Some(reaction_id);
                } else {
                    drop(st);
                    self.remove_reaction(chat_id, &msg.message_id, &reaction_id)
                        .await;
                }
            }
            Err(err) => debug!(error = %err, "failed to add in-progress reaction"),
        }

        let agent = self.agent().await;
        if !agent.is_running() {
            warn!("agent is not running, refusing turn");
            self.reply_if_current(state, generation, msg, AGENT_DOWN_TEXT)
                .await;
            return false;
        }
        let images = self.download_images(msg).await;

        let mut thread_id = match self.resolve_thread(agent.as_ref(), chat_id).await {
            Ok(thread_id) => thread_id,
            Err(err) => {
                let text = format!("❌ Failed to create session: {err}");
                self.reply_if_current(state, generation, msg, &text).await;
                return false;
            }
        };
        if !self.bind_thread(state, generation, &thread_id).await {
            return false;
        }

        let mut started = agent.turn_start(&thread_id, &msg.text, &images).await;
        if matches!(&started, Err(err) if err.is_thread_not_found()) {
            warn!(thread_id, "agent lost the thread, starting a new one");
            self.inner.active.lock().await.remove(&thread_id);
            if let Err(err) = self.inner.store.delete(chat_id).await {
                warn!(error = %err, "failed to delete lost session");
            }

            thread_id = match self.new_thread(agent.as_ref(), chat_id).await {
                Ok(thread_id) => thread_id,
                Err(err) => {
                    let text = format!("❌ Failed to create session: {err}");
                    self.reply_if_current(state, generation, msg, &text).await;
                    return false;
                }
            };
            if !self.bind_thread(state, generation, &thread_id).await {
                return false;
            }
            started = agent.turn_start(&thread_id, &msg.text, &images).await;
        }

        let turn_id = match started {
            Ok(turn_id) => turn_id,
            Err(err) => {
                self.inner.active.lock().await.remove(&thread_id);
                let text = format!("❌ Failed to send request: {err}");
                self.reply_if_current(state, generation, msg, &text).await;
                return false;
            }
        };

        {
            let mut st = state.lock().await;
            if !st.is_current(generation) {
                return false;
            }
            st.turn_id = Some(turn_id.clone());
        }

        info!(thread_id, turn_id, "turn started");
        if let Err(err) = self.inner.store.touch(chat_id).await {
            warn!(error = %err, "failed to touch session");
        }
        true
    }

    /// Record `thread_id` as the chat's thread and mark it active, unless the
    /// chat was invalidated meanwhile.
    ///
    /// The thread is registered before `turn/start` is sent so a completion
    /// racing the response can never leave a stale active entry behind.
    async fn bind_thread(
        &self,
        state: &SharedChatState,
        generation: u64,
        thread_id: &str,
    ) -> bool {
        {
            let mut st = state.lock().await;
            if !st.is_current(generation) {
                return false;
            }
            st.thread_id = Some(thread_id.to_owned());
        }
        self.inner.active.lock().await.insert(thread_id.to_owned());
        true
    }

    async fn resolve_thread(&self, agent: &dyn AgentBackend, chat_id: &str) -> Result<String> {
        let entry = match self.inner.store.get_by_chat_id(chat_id).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "failed to load session, starting a new thread");
                None
            }
        };

        match entry {
            Some(entry) if self.inner.store.is_fresh(Some(&entry)) => {
                debug!(thread_id = entry.thread_id.as_str(), "reusing thread");
                Ok(entry.thread_id)
            }
            _ => self.new_thread(agent, chat_id).await,
        }
    }

    async fn new_thread(&self, agent: &dyn AgentBackend, chat_id: &str) -> Result<String> {
        let thread_id = agent.thread_start().await?;
        if let Err(err) = self.inner.store.create(chat_id, &thread_id).await {
            warn!(error = %err, "failed to persist session");
        }
        info!(thread_id, "created thread");
        Ok(thread_id)
    }

    async fn download_images(&self, msg: &InboundMessage) -> Vec<String> {
        let mut paths = Vec::with_capacity(msg.image_keys.len());
        for key in &msg.image_keys {
            match self
                .inner
                .platform
                .download_image(&msg.chat_id, &msg.message_id, key)
                .await
            {
                Ok(path) => paths.push(path.display().to_string()),
                Err(err) => warn!(image_key = key.as_str(), error = %err, "image download failed"),
            }
        }
        paths
    }

    // ── Invalidation ──────────────────────────────────────────────────────────

    /// Caller must hold the switch lock.
    async fn reset_chat(&self, chat_id: &str, interrupt: bool) {
        let state = self.inner.states.get_or_create(chat_id).await;
        let released = state.lock().await.invalidate();

        if let Some(done) = released.done {
            let _ = done.send(());
        }

        if interrupt {
            if let Some(thread_id) = released.thread_id.as_deref() {
                if let Err(err) = self.agent().await.turn_interrupt(thread_id).await {
                    debug!(thread_id, error = %err, "turn interrupt failed");
                }
            }
        }

        if let (Some(message_id), Some(reaction_id)) =
            (released.message_id.as_deref(), released.reaction_id.as_deref())
        {
            self.remove_reaction(chat_id, message_id, reaction_id).await;
        }

        if let Err(err) = self.inner.store.delete(chat_id).await {
            warn!(chat_id, error = %err, "failed to delete session");
        }

        if let Some(thread_id) = released.thread_id.as_deref() {
            self.inner.active.lock().await.remove(thread_id);
        }

        let dropped = self.drop_queued(chat_id).await;
        info!(chat_id, dropped, "chat context cleared");
    }

    async fn ensure_idle(&self) -> Result<()> {
        let active = self.inner.active.lock().await.len();
        if active > 0 {
            return Err(AppError::Busy(format!(
                "{active} task(s) still running, wait for them to finish"
            )));
        }
        Ok(())
    }

    /// Caller must hold the switch lock.
    async fn replace_agent(&self, target: &Path) -> Result<()> {
        let old = self.agent().await;
        if let Err(err) = old.stop().await {
            warn!(error = %err, "failed to stop agent");
        }

        match self.inner.launcher.launch(target, &self.inner.cancel).await {
            Ok(agent) => {
                self.install_agent(agent).await;
                Ok(())
            }
            Err(err) => {
                let previous = old.working_dir();
                warn!(
                    error = %err,
                    previous = %previous.display(),
                    "agent failed to start, restoring previous"
                );
                match self.inner.launcher.launch(&previous, &self.inner.cancel).await {
                    Ok(agent) => self.install_agent(agent).await,
                    Err(restore_err) => error!(error = %restore_err, "failed to restore agent"),
                }
                Err(err)
            }
        }
    }

    async fn install_agent(&self, agent: Arc<dyn AgentBackend>) {
        self.spawn_event_consumer(&agent).await;
        *self.inner.agent.write().await = agent;
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    pub(super) async fn agent(&self) -> Arc<dyn AgentBackend> {
        Arc::clone(&*self.inner.agent.read().await)
    }

    /// Keep `handle` for shutdown, dropping handles of tasks already done.
    pub(super) async fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn reply_if_current(
        &self,
        state: &SharedChatState,
        generation: u64,
        msg: &InboundMessage,
        text: &str,
    ) {
        if !state.lock().await.is_current(generation) {
            return;
        }
        if self
            .inner
            .recalled
            .lock()
            .await
            .contains(&msg.chat_id, &msg.message_id)
        {
            return;
        }
        self.reply(&msg.chat_id, &msg.message_id, text, msg.chat_type.reply_in_thread())
            .await;
    }

    /// Reply to a message, falling back to a plain send.
    pub(super) async fn reply(&self, chat_id: &str, message_id: &str, text: &str, in_thread: bool) {
        let platform = &self.inner.platform;
        if let Err(err) = platform.reply_text(chat_id, message_id, text, in_thread).await {
            warn!(chat_id, error = %err, "reply failed, sending instead");
            self.send(chat_id, text).await;
        }
    }

    pub(super) async fn send(&self, chat_id: &str, text: &str) {
        if let Err(err) = self.inner.platform.send_text(chat_id, text).await {
            warn!(chat_id, error = %err, "send failed");
        }
    }

    pub(super) async fn remove_reaction(&self, chat_id: &str, message_id: &str, reaction_id: &str) {
        if let Err(err) = self
            .inner
            .platform
            .remove_reaction(chat_id, message_id, reaction_id)
            .await
        {
            debug!(error = %err, "failed to remove reaction");
        }
    }
}

fn resolve_dir(base: &Path, dir: &Path) -> Result<PathBuf> {
    let joined = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base.join(dir)
    };
    let canonical = joined.canonicalize().map_err(|err| {
        AppError::Io(format!("directory not accessible: {}: {err}", joined.display()))
    })?;
    if !canonical.is_dir() {
        return Err(AppError::Io(format!(
            "not a directory: {}",
            canonical.display()
        )));
    }
    Ok(canonical)
}
