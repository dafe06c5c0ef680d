use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use anonchat_shared::{ChangeEvent, Identity, Message, MessageId, NewMessage};

use crate::error::Result;

/// Buffered change events between a subscription task and its consumer.
pub const FEED_BUFFER: usize = 256;

/// CRUD and change-notification surface of the hosted backend.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Top-level messages, newest first.
    async fn fetch_top_level(&self) -> Result<Vec<Message>>;

    /// Replies bucketed by parent, each bucket oldest first.
    async fn fetch_replies(&self) -> Result<HashMap<MessageId, Vec<Message>>>;

    /// Every row, newest first.
    async fn fetch_all(&self) -> Result<Vec<Message>>;

    async fn fetch_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Ids of the messages `identity` currently likes.
    async fn fetch_likes(&self, identity: &Identity) -> Result<HashSet<MessageId>>;

    /// Insert a row and return it as stored (backend-assigned id).
    async fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    async fn update_reply_count(&self, id: &MessageId, count: u32) -> Result<()>;

    /// Atomically flip the like relation and the row's counter. Every call
    /// flips; two calls restore the original state.
    async fn toggle_like(&self, id: &MessageId, identity: &Identity) -> Result<()>;

    /// Open a change subscription on the messages table.
    async fn subscribe(&self) -> Result<ChangeFeed>;
}

/// Receiving end of a change subscription. Dropping it releases the
/// subscription and stops the task feeding it.
pub struct ChangeFeed {
    rx: mpsc::Receiver<ChangeEvent>,
    task: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// A feed plus the sender that fills it, without a backing task.
    pub fn channel() -> (mpsc::Sender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        (tx, Self::new(rx, None))
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop the subscription explicitly.
    pub fn close(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}
