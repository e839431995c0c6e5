//! Bounded per-chat FIFO of inbound messages.
//!
//! Each queue pairs an `mpsc` channel, drained by the chat's single worker,
//! with a `pending` list mirroring what is still waiting. The list is the
//! authority: dropping a message (clear, switch, recall) removes it from
//! `pending`, and the worker skips anything it dequeues that is no longer
//! listed there.

use tokio::sync::{mpsc, Mutex};

use crate::chat::InboundMessage;

/// Returned when a message cannot be enqueued.
#[derive(Debug)]
pub enum EnqueueError {
    /// The queue is at capacity; the message is handed back.
    Full(InboundMessage),
    /// The queue was closed for shutdown.
    Closed(InboundMessage),
}

/// One chat's queue.
#[derive(Debug)]
pub struct ChatQueue {
    tx: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    pending: Mutex<Vec<InboundMessage>>,
}

impl ChatQueue {
    /// New queue of `capacity` plus the receiver its worker drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx: Mutex::new(Some(tx)),
            pending: Mutex::new(Vec::new()),
        };
        (queue, rx)
    }

    /// Append `msg` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] at capacity and
    /// [`EnqueueError::Closed`] after [`close`](Self::close).
    pub async fn push(&self, msg: InboundMessage) -> std::result::Result<(), EnqueueError> {
        let tx = self.tx.lock().await;
        let Some(tx) = tx.as_ref() else {
            return Err(EnqueueError::Closed(msg));
        };

        let mut pending = self.pending.lock().await;
        match tx.try_send(msg.clone()) {
            Ok(()) => {
                pending.push(msg);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(msg)) => Err(EnqueueError::Full(msg)),
            Err(mpsc::error::TrySendError::Closed(msg)) => Err(EnqueueError::Closed(msg)),
        }
    }

    /// Claim a dequeued message. Returns `false` if it was dropped meanwhile.
    pub async fn claim(&self, message_id: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.iter().position(|m| m.message_id == message_id) {
            Some(idx) => {
                pending.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Drop `message_id` if still waiting; returns whether it was found.
    pub async fn remove(&self, message_id: &str) -> bool {
        self.claim(message_id).await
    }

    /// Drop everything still waiting; returns how many were dropped.
    pub async fn drain(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let dropped = pending.len();
        pending.clear();
        dropped
    }

    /// Messages still waiting, oldest first.
    pub async fn pending(&self) -> Vec<InboundMessage> {
        self.pending.lock().await.clone()
    }

    /// Number of messages still waiting.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Refuse further messages and let the worker run dry.
    pub async fn close(&self) {
        self.tx.lock().await.take();
    }
}
