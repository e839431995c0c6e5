//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keyring service name under which Slack tokens are stored.
const KEYRING_SERVICE: &str = "agent-bridge";

/// Nested Slack configuration for Socket Mode connectivity.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// never from the TOML config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// How server-initiated approval requests are answered.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Accept every command-execution and file-change request.
    #[default]
    AutoAccept,
    /// Decline every request.
    Decline,
}

impl ApprovalPolicy {
    /// Decision string sent back to the agent server.
    #[must_use]
    pub fn decision(self) -> &'static str {
        match self {
            Self::AutoAccept => "accept",
            Self::Decline => "decline",
        }
    }
}

/// Agent subprocess settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent executable.
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Leading arguments passed before any `-c` overrides.
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Optional model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Additional `-c key=value` overrides, appended verbatim.
    #[serde(default = "default_extra_config")]
    pub extra_config: Vec<String>,
    /// Per-request response timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Grace period between closing stdin and force-killing the process.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: u64,
    /// Capacity of the notification stream.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// Answer given to server-initiated approval requests.
    #[serde(default)]
    pub approval_policy: ApprovalPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            model: None,
            extra_config: default_extra_config(),
            request_timeout_seconds: default_request_timeout(),
            stop_grace_seconds: default_stop_grace(),
            notification_capacity: default_notification_capacity(),
            approval_policy: ApprovalPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Stop grace period as a [`Duration`].
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }
}

fn default_agent_command() -> String {
    "codex".into()
}

fn default_agent_args() -> Vec<String> {
    vec!["app-server".into()]
}

fn default_extra_config() -> Vec<String> {
    vec![
        r#"sandbox_permissions=["disk-full-read-access","disk-full-write-access","network-full-access"]"#
            .into(),
    ]
}

fn default_request_timeout() -> u64 {
    300
}

fn default_stop_grace() -> u64 {
    5
}

fn default_notification_capacity() -> usize {
    100
}

/// Session freshness and storage settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Explicit database path; defaults to `<working_dir>/.agent-bridge/sessions.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Minutes of inactivity after which a session is stale; `<= 0` disables.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_minutes: i64,
    /// Local hour of day at which sessions reset; `< 0` disables.
    #[serde(default = "default_reset_hour")]
    pub daily_reset_hour: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            idle_timeout_minutes: default_idle_timeout(),
            daily_reset_hour: default_reset_hour(),
        }
    }
}

fn default_idle_timeout() -> i64 {
    60
}

fn default_reset_hour() -> i32 {
    4
}

fn default_queue_capacity() -> usize {
    100
}

fn default_cleanup_interval() -> u64 {
    600
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory the agent process runs in.
    pub working_dir: PathBuf,
    /// Bounded capacity of each chat's message queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Period of the stale-session sweep.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Where downloaded chat images are written.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Agent subprocess settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Session store settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the working directory, canonicalizing it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the path does not name a directory.
    pub fn set_working_dir(&mut self, dir: &Path) -> Result<()> {
        self.working_dir = canonical_dir(dir)?;
        Ok(())
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// Tries the `agent-bridge` keyring service first, then falls back to
    /// `SLACK_APP_TOKEN` / `SLACK_BOT_TOKEN` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// the required tokens.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN").await?;
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Session database path, explicit or derived from the working directory.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.session.db_path.clone().unwrap_or_else(|| {
            self.working_dir
                .join(".agent-bridge")
                .join("sessions.db")
        })
    }

    /// Directory for downloaded images.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("agent-bridge").join("images"))
    }

    /// Stale-session sweep period.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(AppError::Config(
                "queue_capacity must be greater than zero".into(),
            ));
        }

        if self.cleanup_interval_seconds == 0 {
            return Err(AppError::Config(
                "cleanup_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.agent.notification_capacity == 0 {
            return Err(AppError::Config(
                "agent.notification_capacity must be greater than zero".into(),
            ));
        }

        if self.agent.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "agent.request_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.session.daily_reset_hour > 23 {
            return Err(AppError::Config(format!(
                "session.daily_reset_hour must be in 0..=23 or negative, got {}",
                self.session.daily_reset_hour
            )));
        }

        self.working_dir = canonical_dir(&self.working_dir)?;
        Ok(())
    }
}

fn canonical_dir(dir: &Path) -> Result<PathBuf> {
    let canonical = dir
        .canonicalize()
        .map_err(|err| AppError::Config(format!("working_dir invalid: {err}")))?;
    if !canonical.is_dir() {
        return Err(AppError::Config(format!(
            "working_dir is not a directory: {}",
            canonical.display()
        )));
    }
    Ok(canonical)
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
