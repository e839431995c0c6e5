//! Slack Socket Mode client with a small buffered send queue.
//!
//! Outgoing text goes through a bounded queue drained by one sender task that
//! retries with backoff, honouring Slack's `Retry-After` on rate limits.
//! Reactions and image downloads are direct calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiReactionsAddRequest, SlackApiReactionsRemoveRequest,
    SlackApiToken, SlackApiTokenType, SlackApiTokenValue, SlackChannelId, SlackClient,
    SlackClientEventsListenerEnvironment, SlackClientHyperHttpsConnector, SlackClientSession,
    SlackClientSocketModeConfig, SlackClientSocketModeListener, SlackMessageContent,
    SlackReactionName, SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::chat::ChatPlatform;
use crate::driver::DriverFuture;
use crate::slack::events;
use crate::{config::SlackConfig, AppError, Result};

const QUEUE_CAPACITY: usize = 256;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const MAX_SEND_ATTEMPTS: u32 = 5;

type Connector = SlackClientHyperHttpsConnector;

/// Message to be delivered to Slack via chat.postMessage.
#[derive(Debug, Clone)]
pub struct SlackMessage {
    /// Target conversation.
    pub channel: SlackChannelId,
    /// Message text.
    pub text: String,
    /// Parent message when replying inside a thread.
    pub thread_ts: Option<SlackTs>,
}

impl SlackMessage {
    /// Create a plain-text message for a channel.
    pub fn plain(channel: SlackChannelId, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
            thread_ts: None,
        }
    }

    /// Same message, posted as a thread reply to `ts`.
    #[must_use]
    pub fn in_thread(mut self, ts: SlackTs) -> Self {
        self.thread_ts = Some(ts);
        self
    }

    fn into_request(self) -> SlackApiChatPostMessageRequest {
        let content = SlackMessageContent {
            text: Some(self.text),
            markdown_text: None,
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        };

        SlackApiChatPostMessageRequest {
            channel: self.channel,
            content,
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: self.thread_ts,
            username: None,
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        }
    }
}

/// Slack Web API and Socket Mode wrapper implementing [`ChatPlatform`].
pub struct SlackService {
    client: Arc<SlackClient<Connector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    queue_tx: mpsc::Sender<SlackMessage>,
    http: reqwest::Client,
    download_dir: PathBuf,
}

impl std::fmt::Debug for SlackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackService")
            .field("download_dir", &self.download_dir)
            .finish_non_exhaustive()
    }
}

impl SlackService {
    /// Create the Slack client and start the background sender task.
    ///
    /// Socket Mode is started separately with
    /// [`spawn_socket_mode`](Self::spawn_socket_mode) once a [`Bridge`]
    /// exists to receive events.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTPS connector cannot be created.
    pub fn start(
        config: &SlackConfig,
        download_dir: PathBuf,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = token(&config.bot_token, SlackApiTokenType::Bot);
        let app_token = token(&config.app_token, SlackApiTokenType::App);

        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let queue_task = Self::spawn_worker(Arc::clone(&client), bot_token.clone(), queue_rx);

        info!(download_dir = %download_dir.display(), "slack service started");

        let service = Arc::new(Self {
            client,
            bot_token,
            app_token,
            queue_tx,
            http: reqwest::Client::new(),
            download_dir,
        });
        Ok((service, queue_task))
    }

    /// Enqueue a message for async delivery.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the sender task has exited.
    pub async fn enqueue(&self, message: SlackMessage) -> Result<()> {
        self.queue_tx
            .send(message)
            .await
            .map_err(|err| AppError::Slack(format!("failed to enqueue slack message: {err}")))
    }

    fn spawn_worker(
        client: Arc<SlackClient<Connector>>,
        token: SlackApiToken,
        mut queue_rx: mpsc::Receiver<SlackMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let session = client.open_session(&token);
            while let Some(message) = queue_rx.recv().await {
                let channel = message.channel.clone();
                let request = message.into_request();
                let mut backoff = INITIAL_RETRY_DELAY;
                for attempt in 1..=MAX_SEND_ATTEMPTS {
                    match session.chat_post_message(&request).await {
                        Ok(_) => {
                            debug!(?channel, "sent slack message");
                            break;
                        }
                        Err(err) if attempt == MAX_SEND_ATTEMPTS => {
                            error!(?channel, ?err, "giving up on slack message");
                        }
                        Err(err) => {
                            let delay = match &err {
                                slack_morphism::errors::SlackClientError::RateLimitError(rate) => {
                                    rate.retry_after.unwrap_or(backoff)
                                }
                                _ => backoff,
                            };
                            warn!(?channel, ?err, ?delay, attempt, "slack post failed; retrying");
                            sleep(delay).await;
                            backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                        }
                    }
                }
            }
            info!("slack sender task exiting");
        })
    }

    /// Connect Socket Mode and feed message events into `bridge`.
    #[must_use]
    pub fn spawn_socket_mode(&self, bridge: Bridge) -> JoinHandle<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(bridge),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                info!(?event, "socket hello");
            })
            .with_push_events(events::handle_push_event);
        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "socket mode listen failed");
                return;
            }

            listener.serve().await;
            info!("socket mode listener exited");
        })
    }

    fn http_session(&self) -> SlackClientSession<'_, Connector> {
        self.client.open_session(&self.bot_token)
    }

    /// Post immediately, bypassing the queue, so failures reach the caller.
    async fn post_direct(&self, message: SlackMessage) -> Result<()> {
        self.http_session()
            .chat_post_message(&message.into_request())
            .await
            .map_err(|err| AppError::Slack(format!("failed to post message: {err}")))?;
        Ok(())
    }

    async fn add_reaction_inner(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<String> {
        let request = SlackApiReactionsAddRequest::new(
            SlackChannelId(chat_id.to_owned()),
            SlackReactionName(emoji.to_owned()),
            SlackTs(message_id.to_owned()),
        );
        self.http_session()
            .reactions_add(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to add reaction: {err}")))?;
        // Slack removes reactions by name, so the name doubles as the id.
        Ok(emoji.to_owned())
    }

    async fn remove_reaction_inner(
        &self,
        chat_id: &str,
        message_id: &str,
        reaction_id: &str,
    ) -> Result<()> {
        let request = SlackApiReactionsRemoveRequest::new(SlackReactionName(reaction_id.to_owned()))
            .with_channel(SlackChannelId(chat_id.to_owned()))
            .with_timestamp(SlackTs(message_id.to_owned()));
        self.http_session()
            .reactions_remove(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to remove reaction: {err}")))?;
        Ok(())
    }

    /// Fetch a private file URL with the bot token and store it locally.
    async fn download_inner(&self, message_id: &str, url: &str) -> Result<PathBuf> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token.token_value.0)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Slack(format!("failed to download image: {err}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Slack(format!("failed to read image body: {err}")))?;

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(image_file_name(message_id, url));
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "downloaded image");
        Ok(path)
    }
}

impl ChatPlatform for SlackService {
    fn send_text<'a>(&'a self, chat_id: &'a str, text: &'a str) -> DriverFuture<'a, Result<()>> {
        Box::pin(self.enqueue(SlackMessage::plain(SlackChannelId(chat_id.to_owned()), text)))
    }

    fn reply_text<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
        text: &'a str,
        in_thread: bool,
    ) -> DriverFuture<'a, Result<()>> {
        let mut message = SlackMessage::plain(SlackChannelId(chat_id.to_owned()), text);
        if in_thread {
            message = message.in_thread(SlackTs(message_id.to_owned()));
        }
        Box::pin(self.post_direct(message))
    }

    fn add_reaction<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
        emoji: &'a str,
    ) -> DriverFuture<'a, Result<String>> {
        Box::pin(self.add_reaction_inner(chat_id, message_id, emoji))
    }

    fn remove_reaction<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
        reaction_id: &'a str,
    ) -> DriverFuture<'a, Result<()>> {
        Box::pin(self.remove_reaction_inner(chat_id, message_id, reaction_id))
    }

    fn download_image<'a>(
        &'a self,
        _chat_id: &'a str,
        message_id: &'a str,
        image_key: &'a str,
    ) -> DriverFuture<'a, Result<PathBuf>> {
        Box::pin(self.download_inner(message_id, image_key))
    }
}

fn token(value: &str, token_type: SlackApiTokenType) -> SlackApiToken {
    SlackApiToken {
        token_value: SlackApiTokenValue(value.to_owned()),
        cookie: None,
        team_id: None,
        scope: None,
        token_type: Some(token_type),
    }
}

/// Local file name for an image: the message timestamp plus the URL's last
/// path segment, restricted to characters safe on every filesystem.
#[must_use]
pub fn image_file_name(message_id: &str, url: &str) -> String {
    let last = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').find(|s| !s.is_empty()))
        .unwrap_or("image");
    let safe = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    let name = format!("{}-{}", safe(message_id), safe(last));
    if Path::new(last).extension().is_some() {
        name
    } else {
        format!("{name}.png")
    }
}
