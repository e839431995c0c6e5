//! Consumption of agent notifications.
//!
//! One consumer task runs per agent backend. Notifications are routed to the
//! chat whose current thread they name; anything for an unknown thread is
//! dropped.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::protocol::{methods, DeltaParams, ItemParams, TurnCompletedParams};
use crate::agent::Notification;
use crate::bridge::orchestrator::{Bridge, DONE_REACTION, EMPTY_RESPONSE};
use crate::driver::AgentBackend;

impl Bridge {
    /// Take `agent`'s notification stream and route it until the stream ends
    /// or the bridge shuts down.
    pub(super) async fn spawn_event_consumer(&self, agent: &Arc<dyn AgentBackend>) {
        let Some(mut rx) = agent.take_notifications().await else {
            warn!("agent notification stream already taken");
            return;
        };

        let bridge = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    notification = rx.recv() => {
                        let Some(notification) = notification else { break };
                        bridge.handle_notification(notification).await;
                    }
                }
            }
            debug!("agent event consumer stopped");
        });
        self.track(handle).await;
    }

    async fn handle_notification(&self, notification: Notification) {
        match notification.method.as_str() {
            methods::AGENT_MESSAGE_DELTA => {
                match notification.decode::<DeltaParams>() {
                    Ok(params) => self.append_delta(params).await,
                    Err(err) => debug!(error = %err, "malformed message delta"),
                }
            }
            methods::TURN_COMPLETED => match notification.decode::<TurnCompletedParams>() {
                Ok(params) => self.handle_turn_completed(params).await,
                Err(err) => warn!(error = %err, "malformed turn completion"),
            },
            methods::ITEM_STARTED => match notification.decode::<ItemParams>() {
                Ok(params) => self.record_step(params).await,
                Err(err) => debug!(error = %err, "malformed item notification"),
            },
            methods::ITEM_COMPLETED => {
                debug!(params = %notification.params, "item completed");
            }
            other => debug!(method = other, "ignoring notification"),
        }
    }

    async fn append_delta(&self, params: DeltaParams) {
        if params.delta.is_empty() {
            return;
        }
        if let Some((_, state)) = self.inner.states.find_by_thread(&params.thread_id).await {
            state.lock().await.buffer.push_str(&params.delta);
        }
    }

    async fn record_step(&self, params: ItemParams) {
        let Some(item) = params.item else { return };
        if let Some((_, state)) = self.inner.states.find_by_thread(&params.thread_id).await {
            let mut st = state.lock().await;
            if st.processing {
                st.last_item = Some(item.step_label());
            }
        }
    }

    async fn handle_turn_completed(&self, params: TurnCompletedParams) {
        let thread_id = params.thread_id.as_str();
        self.inner.active.lock().await.remove(thread_id);

        let Some((chat_id, state)) = self.inner.states.find_by_thread(thread_id).await else {
            debug!(thread_id, "turn completed for unknown thread");
            return;
        };

        let completed = state.lock().await.complete_turn();
        info!(
            chat_id,
            thread_id,
            status = params.status.as_str(),
            "turn completed"
        );

        let response = if completed.response.trim().is_empty() {
            EMPTY_RESPONSE.to_owned()
        } else {
            completed.response
        };

        match completed.message_id.as_deref() {
            Some(message_id) => {
                if let Some(reaction_id) = completed.reaction_id.as_deref() {
                    self.remove_reaction(&chat_id, message_id, reaction_id).await;
                }
                if let Err(err) = self
                    .inner
                    .platform
                    .add_reaction(&chat_id, message_id, DONE_REACTION)
                    .await
                {
                    debug!(error = %err, "failed to mark message done");
                }
                self.reply(
                    &chat_id,
                    message_id,
                    &response,
                    completed.chat_type.reply_in_thread(),
                )
                .await;
            }
            None => self.send(&chat_id, &response).await,
        }

        if let Err(err) = self.inner.store.touch(&chat_id).await {
            warn!(chat_id, error = %err, "failed to touch session");
        }

        if let Some(done) = completed.done {
            let _ = done.send(());
        }
    }
}
