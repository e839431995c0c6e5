//! Seam between the chat orchestrator and the agent process.
//!
//! The orchestrator only ever talks to an [`AgentBackend`] and creates new
//! ones through an [`AgentLauncher`], which keeps directory switches and
//! restarts testable without spawning real processes.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::protocol::ThreadStartParams;
use crate::agent::{AgentClient, Notification};
use crate::config::AgentConfig;
use crate::Result;

/// Boxed future returned by driver trait methods.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Operations the orchestrator performs against a running agent.
pub trait AgentBackend: Send + Sync {
    /// Directory the agent runs in.
    fn working_dir(&self) -> PathBuf;

    /// Whether the backend accepts requests.
    fn is_running(&self) -> bool;

    /// Create a thread and return its id.
    ///
    /// # Errors
    ///
    /// Propagates protocol and server errors.
    fn thread_start(&self) -> DriverFuture<'_, Result<String>>;

    /// Start a turn and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error for which
    /// [`AppError::is_thread_not_found`](crate::AppError::is_thread_not_found)
    /// holds when the agent no longer knows `thread_id`.
    fn turn_start<'a>(
        &'a self,
        thread_id: &'a str,
        prompt: &'a str,
        images: &'a [String],
    ) -> DriverFuture<'a, Result<String>>;

    /// Interrupt the active turn on a thread.
    ///
    /// # Errors
    ///
    /// Propagates protocol and server errors.
    fn turn_interrupt<'a>(&'a self, thread_id: &'a str) -> DriverFuture<'a, Result<()>>;

    /// Take the notification stream; `Some` at most once per backend.
    fn take_notifications(&self) -> DriverFuture<'_, Option<mpsc::Receiver<Notification>>>;

    /// Stop the agent. Idempotent.
    ///
    /// # Errors
    ///
    /// Implementation specific; the process client never fails here.
    fn stop(&self) -> DriverFuture<'_, Result<()>>;
}

/// Factory for started backends.
pub trait AgentLauncher: Send + Sync {
    /// Start a backend rooted at `working_dir`, bound to `cancel`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the agent cannot be brought up.
    fn launch<'a>(
        &'a self,
        working_dir: &'a Path,
        cancel: &'a CancellationToken,
    ) -> DriverFuture<'a, Result<Arc<dyn AgentBackend>>>;
}

impl AgentBackend for AgentClient {
    fn working_dir(&self) -> PathBuf {
        AgentClient::working_dir(self).to_path_buf()
    }

    fn is_running(&self) -> bool {
        AgentClient::is_running(self)
    }

    fn thread_start(&self) -> DriverFuture<'_, Result<String>> {
        Box::pin(AgentClient::thread_start(self, ThreadStartParams::default()))
    }

    fn turn_start<'a>(
        &'a self,
        thread_id: &'a str,
        prompt: &'a str,
        images: &'a [String],
    ) -> DriverFuture<'a, Result<String>> {
        Box::pin(AgentClient::turn_start(self, thread_id, prompt, images))
    }

    fn turn_interrupt<'a>(&'a self, thread_id: &'a str) -> DriverFuture<'a, Result<()>> {
        Box::pin(AgentClient::turn_interrupt(self, thread_id))
    }

    fn take_notifications(&self) -> DriverFuture<'_, Option<mpsc::Receiver<Notification>>> {
        Box::pin(AgentClient::take_notifications(self))
    }

    fn stop(&self) -> DriverFuture<'_, Result<()>> {
        Box::pin(AgentClient::stop(self))
    }
}

/// Launches real agent processes from [`AgentConfig`].
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: AgentConfig,
}

impl ProcessLauncher {
    /// Launcher for the configured agent executable.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

impl AgentLauncher for ProcessLauncher {
    fn launch<'a>(
        &'a self,
        working_dir: &'a Path,
        cancel: &'a CancellationToken,
    ) -> DriverFuture<'a, Result<Arc<dyn AgentBackend>>> {
        Box::pin(async move {
            let client = Arc::new(AgentClient::new(
                self.config.clone(),
                working_dir.to_path_buf(),
            ));
            client.start(cancel).await?;
            let backend: Arc<dyn AgentBackend> = client;
            Ok(backend)
        })
    }
}
