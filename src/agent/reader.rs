//! Agent stdout and stderr reader tasks.
//!
//! The stdout loop is the only consumer of the protocol stream. Each decoded
//! line is classified by [`classify_line`] and routed:
//!
//! - responses complete the matching pending waiter (unmatched ones are dropped);
//! - server requests are answered immediately per the [`ApprovalPolicy`];
//! - notifications are offered to the bounded stream with `try_send`, so a
//!   slow consumer costs dropped events, never stalled protocol reads.
//!
//! The loop owns the notification sender. When it returns the sender is
//! dropped, which closes the stream exactly once per process.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::codec::NdjsonCodec;
use crate::agent::protocol::{
    classify_line, ApprovalResponse, Inbound, Notification, ResponseEnvelope,
};
use crate::config::ApprovalPolicy;
use crate::errors::RpcError;

/// Outcome delivered to a request waiter.
pub type ResponseOutcome = std::result::Result<Value, RpcError>;

/// In-flight requests keyed by id.
pub type PendingRequests = Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseOutcome>>>>;

/// Everything the stdout loop needs to route inbound lines.
#[derive(Debug)]
pub struct Dispatcher {
    /// Waiters for outstanding requests.
    pub pending: PendingRequests,
    /// Bounded notification stream.
    pub notifications: mpsc::Sender<Notification>,
    /// Writer queue, used to answer server requests.
    pub outbound: mpsc::Sender<Value>,
    /// How server requests are answered.
    pub approval: ApprovalPolicy,
}

impl Dispatcher {
    /// Route one raw line. Malformed input is logged and ignored.
    pub async fn dispatch_line(&self, line: &str) {
        match classify_line(line) {
            Ok(Some(Inbound::Response { id, outcome })) => self.complete(id, outcome).await,
            Ok(Some(Inbound::ServerRequest { id, method, params })) => {
                self.answer_server_request(id, &method, &params).await;
            }
            Ok(Some(Inbound::Notification(notification))) => self.publish(notification),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, raw_line = %line, "agent reader: skipping malformed line");
            }
        }
    }

    async fn complete(&self, id: i64, outcome: ResponseOutcome) {
        let waiter = self.pending.lock().await.remove(&id);
        match waiter {
            Some(tx) => {
                // Receiver may have timed out between lookup and send.
                let _ = tx.send(outcome);
            }
            None => debug!(request_id = id, "agent reader: response with no waiter, dropping"),
        }
    }

    async fn answer_server_request(&self, id: Value, method: &str, params: &Value) {
        let decision = self.approval.decision();
        debug!(method, %id, decision, ?params, "agent reader: answering server request");

        let answer = ResponseEnvelope {
            id,
            result: ApprovalResponse {
                decision: decision.to_owned(),
                accept_settings: None,
            },
        };
        let value = match serde_json::to_value(&answer) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, method, "agent reader: failed to encode approval answer");
                return;
            }
        };
        if self.outbound.send(value).await.is_err() {
            warn!(method, "agent reader: writer closed, approval answer lost");
        }
    }

    fn publish(&self, notification: Notification) {
        match self.notifications.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    method = dropped.method.as_str(),
                    "agent reader: notification stream full, dropping"
                );
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!(
                    method = dropped.method.as_str(),
                    "agent reader: notification stream closed, dropping"
                );
            }
        }
    }
}

/// Read protocol lines from `stdout` until EOF, I/O failure, or cancellation.
///
/// On exit every outstanding waiter is released and `cancel` is fired, so
/// requests issued after the process died fail at once instead of waiting
/// out their timeout.
pub async fn run_reader<R>(stdout: R, dispatcher: Dispatcher, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, NdjsonCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("agent reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("agent reader: EOF");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "agent reader: stream error, stopping");
                        break;
                    }
                    Some(Ok(line)) => dispatcher.dispatch_line(&line).await,
                }
            }
        }
    }

    dispatcher.pending.lock().await.clear();
    cancel.cancel();
}

/// Log each non-empty stderr line at `DEBUG`; diagnostics only.
///
/// Keeps draining until EOF or cancellation so the child never blocks on a
/// full stderr pipe. Undecodable lines are dropped by the codec.
pub async fn run_stderr<R>(stderr: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, NdjsonCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = framed.next() => {
                match item {
                    None => break,
                    Some(Ok(line)) => {
                        if !line.trim().is_empty() {
                            debug!(target: "agent_bridge::agent::stderr", "{line}");
                        }
                    }
                    Some(Err(err)) => {
                        debug!(error = %err, "agent stderr: stream error, stopping");
                        break;
                    }
                }
            }
        }
    }
}
