//! Agent process construction.
//!
//! The child runs in the configured working directory with all three stdio
//! streams piped. `kill_on_drop(true)` guarantees the process never outlives
//! its [`AgentProcess`] handle, even on early-return error paths.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Spawned agent process with its stdio handles detached.
#[derive(Debug)]
pub struct AgentProcess {
    /// Process handle; killed when dropped.
    pub child: Child,
    /// Write side of the protocol.
    pub stdin: ChildStdin,
    /// Read side of the protocol.
    pub stdout: ChildStdout,
    /// Diagnostic output.
    pub stderr: ChildStderr,
}

/// Full argument list for the agent executable.
///
/// Leading `args` come first, then `-c model="<m>"` when a model is set, then
/// every `extra_config` entry as its own `-c` override.
#[must_use]
pub fn build_args(config: &AgentConfig) -> Vec<String> {
    let mut args = config.args.clone();
    if let Some(model) = config.model.as_deref().filter(|m| !m.is_empty()) {
        args.push("-c".into());
        args.push(format!("model=\"{model}\""));
    }
    for extra in &config.extra_config {
        args.push("-c".into());
        args.push(extra.clone());
    }
    args
}

/// Spawn the agent executable rooted at `working_dir`.
///
/// # Errors
///
/// Returns `AppError::Startup` if the OS refuses to spawn the process or any
/// stdio pipe is missing.
pub fn spawn_agent(config: &AgentConfig, working_dir: &Path) -> Result<AgentProcess> {
    let args = build_args(config);
    info!(
        command = config.command.as_str(),
        ?args,
        working_dir = %working_dir.display(),
        "spawning agent process"
    );

    let mut child = Command::new(&config.command)
        .args(&args)
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            AppError::Startup(format!("failed to spawn {}: {err}", config.command))
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Startup("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Startup("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Startup("failed to capture agent stderr".into()))?;

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}
