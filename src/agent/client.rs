//! Protocol client owning one agent app-server process.
//!
//! Lifecycle: `Created → Started → Ready → Stopping → Stopped`. A client is
//! good for exactly one process; restarting means building a new client.
//!
//! Three background tasks run per process: the stdin writer, the stdout
//! dispatcher, and the stderr logger. All share a [`CancellationToken`]
//! derived from the caller's root token, so shutting down the bridge also
//! unblocks every in-flight request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::protocol::{
    methods, ApprovalResponse, ClientInfo, InitializeParams, InitializeResult,
    NotificationEnvelope, RequestEnvelope, ResponseEnvelope, Thread, ThreadIdParams, ThreadResult,
    ThreadStartParams, TurnStartParams, TurnStartResult, UserInput,
};
use crate::agent::reader::{self, Dispatcher, PendingRequests};
use crate::agent::{spawner, writer, Notification};
use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Capacity of the internal stdin writer queue.
const OUTBOUND_CAPACITY: usize = 64;

/// Lifecycle state of an [`AgentClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed, no process yet.
    Created,
    /// Process spawned, handshake in progress.
    Started,
    /// Handshake complete; requests accepted.
    Ready,
    /// Shutdown in progress.
    Stopping,
    /// Process gone; the client cannot be restarted.
    Stopped,
}

impl ClientState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Started => 1,
            Self::Ready => 2,
            Self::Stopping => 3,
            Self::Stopped => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Ready,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Handles owned while the process is alive; taken exactly once by `stop`.
struct Running {
    child: Child,
    writer: JoinHandle<Result<()>>,
    reader: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

/// Client for the agent app-server protocol over a child process's stdio.
pub struct AgentClient {
    config: AgentConfig,
    working_dir: PathBuf,
    state: AtomicU8,
    next_id: AtomicI64,
    pending: PendingRequests,
    outbound: OnceLock<mpsc::Sender<Value>>,
    cancel: OnceLock<CancellationToken>,
    notifications: Mutex<Option<mpsc::Receiver<Notification>>>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("command", &self.config.command)
            .field("working_dir", &self.working_dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AgentClient {
    /// Build a client that will run `config.command` inside `working_dir`.
    #[must_use]
    pub fn new(config: AgentConfig, working_dir: PathBuf) -> Self {
        Self {
            config,
            working_dir,
            state: AtomicU8::new(ClientState::Created.to_u8()),
            next_id: AtomicI64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound: OnceLock::new(),
            cancel: OnceLock::new(),
            notifications: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the handshake completed and the process has not been stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ClientState::Ready
    }

    /// Directory the agent process runs in.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Spawn the process, start the I/O tasks, and perform the handshake.
    ///
    /// `parent` is the caller's root token; cancelling it aborts every
    /// request this client has in flight.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the client was already started, the
    /// process cannot be spawned, or the handshake fails. A failed handshake
    /// tears the process down before returning.
    pub async fn start(&self, parent: &CancellationToken) -> Result<()> {
        self.state
            .compare_exchange(
                ClientState::Created.to_u8(),
                ClientState::Started.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|raw| {
                AppError::Startup(format!(
                    "client cannot start from state {:?}",
                    ClientState::from_u8(raw)
                ))
            })?;

        let process = match spawner::spawn_agent(&self.config, &self.working_dir) {
            Ok(process) => process,
            Err(err) => {
                self.set_state(ClientState::Stopped);
                return Err(err);
            }
        };

        let cancel = parent.child_token();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(self.config.notification_capacity);

        let writer = tokio::spawn(writer::run_writer(
            process.stdin,
            outbound_rx,
            cancel.clone(),
        ));
        let dispatcher = Dispatcher {
            pending: Arc::clone(&self.pending),
            notifications: events_tx,
            outbound: outbound_tx.clone(),
            approval: self.config.approval_policy,
        };
        let reader = tokio::spawn(reader::run_reader(
            process.stdout,
            dispatcher,
            cancel.clone(),
        ));
        let stderr = tokio::spawn(reader::run_stderr(process.stderr, cancel.clone()));

        // Fresh OnceLocks: the Created guard above admits a single start.
        let _ = self.outbound.set(outbound_tx);
        let _ = self.cancel.set(cancel);
        *self.notifications.lock().await = Some(events_rx);
        *self.running.lock().await = Some(Running {
            child: process.child,
            writer,
            reader,
            stderr,
        });

        if let Err(err) = self.handshake().await {
            warn!(error = %err, "agent handshake failed, tearing down");
            let _ = self.stop().await;
            return Err(AppError::Startup(format!("handshake failed: {err}")));
        }

        self.set_state(ClientState::Ready);
        info!(working_dir = %self.working_dir.display(), "agent client ready");
        Ok(())
    }

    /// Shut the process down. Idempotent.
    ///
    /// Cancels the I/O tasks (the writer closes stdin on its way out), waits
    /// up to the configured grace period for the process to exit, kills it
    /// otherwise, and joins every task. The notification stream ends when
    /// the stdout task finishes.
    ///
    /// # Errors
    ///
    /// Currently infallible; shutdown problems are logged.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        self.set_state(ClientState::Stopping);

        if let Some(cancel) = self.cancel.get() {
            cancel.cancel();
        }

        match running.writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "agent writer ended with error"),
            Err(err) => warn!(%err, "agent writer task panicked"),
        }

        let grace = self.config.stop_grace();
        match tokio::time::timeout(grace, running.child.wait()).await {
            Ok(Ok(status)) => info!(%status, "agent process exited"),
            Ok(Err(err)) => warn!(%err, "failed to wait for agent process"),
            Err(_) => {
                warn!(?grace, "agent process did not exit in time, killing");
                if let Err(err) = running.child.kill().await {
                    warn!(%err, "failed to kill agent process");
                }
            }
        }

        if let Err(err) = running.reader.await {
            warn!(%err, "agent reader task panicked");
        }
        if let Err(err) = running.stderr.await {
            warn!(%err, "agent stderr task panicked");
        }

        self.set_state(ClientState::Stopped);
        info!("agent client stopped");
        Ok(())
    }

    /// Take the notification stream. Yields `Some` once per client.
    pub async fn take_notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        self.notifications.lock().await.take()
    }

    /// Send a request and wait for its result.
    ///
    /// Waits until the response arrives, the configured timeout elapses, or
    /// the client is cancelled. The waiter is deregistered on every exit path
    /// that leaves it unanswered.
    ///
    /// # Errors
    ///
    /// - `AppError::Agent` if the client is not started or the process exits.
    /// - `AppError::Rpc` if the server answers with an error object.
    /// - `AppError::Timeout` / `AppError::Cancelled` as described above.
    pub async fn send_request<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        if !matches!(self.state(), ClientState::Started | ClientState::Ready) {
            return Err(AppError::Agent(format!(
                "client not running, cannot send {method}"
            )));
        }
        let (Some(outbound), Some(cancel)) = (self.outbound.get(), self.cancel.get()) else {
            return Err(AppError::Agent(format!(
                "client not started, cannot send {method}"
            )));
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = serde_json::to_value(RequestEnvelope { id, method, params })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if outbound.send(envelope).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AppError::Agent(format!(
                "agent stdin closed, cannot send {method}"
            )));
        }
        debug!(request_id = id, method, "agent request sent");

        let timeout = self.config.request_timeout();
        let outcome = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                self.pending.lock().await.remove(&id);
                return Err(AppError::Cancelled(format!("{method} (request {id})")));
            }

            answer = tokio::time::timeout(timeout, rx) => match answer {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => {
                    return Err(AppError::Agent(format!(
                        "agent exited before answering {method}"
                    )));
                }
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(AppError::Timeout(format!(
                        "request {method} timed out after {timeout:?}"
                    )));
                }
            },
        };

        outcome.map_err(AppError::Rpc)
    }

    /// Send a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the client was never started or its
    /// writer has exited.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let envelope = serde_json::to_value(NotificationEnvelope { method, params })?;
        self.send_raw(envelope, method).await
    }

    /// Create a new thread and return its id.
    ///
    /// # Errors
    ///
    /// Propagates request errors; returns `AppError::Agent` if the server
    /// reports an empty thread id.
    pub async fn thread_start(&self, params: ThreadStartParams) -> Result<String> {
        let result: ThreadResult = self.call(methods::THREAD_START, params).await?;
        if result.thread.id.is_empty() {
            return Err(AppError::Agent("thread/start returned empty thread id".into()));
        }
        Ok(result.thread.id)
    }

    /// Reattach to an existing thread.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn thread_resume(&self, thread_id: &str) -> Result<Thread> {
        let params = ThreadIdParams {
            thread_id: thread_id.to_owned(),
        };
        let result: ThreadResult = self.call(methods::THREAD_RESUME, params).await?;
        Ok(result.thread)
    }

    /// Start a turn from a prompt plus local image paths; returns the turn id.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn turn_start(
        &self,
        thread_id: &str,
        prompt: &str,
        images: &[String],
    ) -> Result<String> {
        self.turn_start_with_input(thread_id, UserInput::prompt_with_images(prompt, images))
            .await
    }

    /// Start a turn from explicit input parts; returns the turn id.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn turn_start_with_input(
        &self,
        thread_id: &str,
        input: Vec<UserInput>,
    ) -> Result<String> {
        let params = TurnStartParams {
            thread_id: thread_id.to_owned(),
            input,
        };
        let result: TurnStartResult = self.call(methods::TURN_START, params).await?;
        Ok(result.into_turn_id())
    }

    /// Interrupt the active turn on `thread_id`.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn turn_interrupt(&self, thread_id: &str) -> Result<()> {
        let params = ThreadIdParams {
            thread_id: thread_id.to_owned(),
        };
        self.send_request(methods::TURN_INTERRUPT, params).await?;
        Ok(())
    }

    /// Answer a server-initiated request with an explicit decision.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the writer has exited.
    pub async fn respond_to_approval(&self, request_id: Value, decision: &str) -> Result<()> {
        let envelope = serde_json::to_value(ResponseEnvelope {
            id: request_id,
            result: ApprovalResponse {
                decision: decision.to_owned(),
                accept_settings: None,
            },
        })?;
        self.send_raw(envelope, "approval response").await
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    async fn handshake(&self) -> Result<()> {
        let params = InitializeParams {
            client_info: ClientInfo::current(),
        };
        let result: InitializeResult = self.call(methods::INITIALIZE, params).await?;
        info!(user_agent = result.user_agent.as_str(), "agent server initialized");
        self.send_notification(methods::INITIALIZED, None).await
    }

    async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
        let value = self.send_request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|err| AppError::Agent(format!("failed to parse {method} result: {err}")))
    }

    async fn send_raw(&self, envelope: Value, what: &str) -> Result<()> {
        let outbound = self
            .outbound
            .get()
            .ok_or_else(|| AppError::Agent(format!("client not started, cannot send {what}")))?;
        outbound
            .send(envelope)
            .await
            .map_err(|_| AppError::Agent(format!("agent stdin closed, cannot send {what}")))
    }

    fn set_state(&self, state: ClientState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }
}
