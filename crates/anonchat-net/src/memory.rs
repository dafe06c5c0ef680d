//! In-process backend with the hosted backend's semantics.
//!
//! Writes publish the same change events the hosted backend would emit,
//! like toggling is atomic under one lock, and individual operations can be
//! told to fail so callers can exercise their error paths.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::debug;

use anonchat_shared::{
    group_replies, ChangeEvent, Identity, Message, MessageId, MessagePatch, NewMessage,
};

use crate::error::{GatewayError, Result};
use crate::gateway::{ChangeFeed, Gateway, FEED_BUFFER};

/// Gateway operations, used for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchTopLevel,
    FetchReplies,
    FetchAll,
    FetchMessage,
    FetchLikes,
    Insert,
    UpdateReplyCount,
    ToggleLike,
    Subscribe,
}

#[derive(Debug, Default)]
struct Tables {
    messages: Vec<Message>,
    likes: HashSet<(MessageId, String)>,
    failures: HashMap<Operation, usize>,
    calls: HashMap<Operation, usize>,
}

impl Tables {
    /// Count the call and consume one injected failure, if any.
    fn enter(&mut self, op: Operation) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(remaining) = self.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(GatewayError::Injected(format!("{op:?}")));
            }
        }
        Ok(())
    }

    fn find_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

pub struct MemoryGateway {
    tables: Mutex<Tables>,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(FEED_BUFFER);
        Self {
            tables: Mutex::new(Tables::default()),
            events,
        }
    }

    /// Put rows in place without emitting change events, as if they existed
    /// before anyone subscribed.
    pub async fn seed(&self, rows: impl IntoIterator<Item = Message>) {
        let mut tables = self.tables.lock().await;
        tables.messages.extend(rows);
    }

    /// Make the next `times` calls of `op` fail.
    pub async fn fail_next(&self, op: Operation, times: usize) {
        let mut tables = self.tables.lock().await;
        *tables.failures.entry(op).or_default() += times;
    }

    /// How many times `op` has been called.
    pub async fn calls(&self, op: Operation) -> usize {
        let tables = self.tables.lock().await;
        tables.calls.get(&op).copied().unwrap_or(0)
    }

    /// Publish an arbitrary event to current subscribers, e.g. a duplicate
    /// delivery.
    pub fn emit(&self, event: ChangeEvent) {
        // No subscribers is not an error here.
        let _ = self.events.send(event);
    }

    /// Apply a change made by some other client and publish it.
    pub async fn external_update(&self, patch: MessagePatch) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .find_mut(&patch.id)
            .ok_or_else(|| GatewayError::NotFound(patch.id.to_string()))?;
        patch.apply_to(row);
        let event = ChangeEvent::Update(MessagePatch::from(row.clone()));
        drop(tables);
        self.emit(event);
        Ok(())
    }

    /// Delete a row (moderation, retention) and publish the deletion.
    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let pos = tables
            .messages
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        let removed = tables.messages.remove(pos);
        tables.likes.retain(|(mid, _)| mid != id);
        drop(tables);
        self.emit(ChangeEvent::Delete(removed.key()));
        Ok(())
    }

    /// Snapshot of a stored row.
    pub async fn row(&self, id: &MessageId) -> Option<Message> {
        let tables = self.tables.lock().await;
        tables.messages.iter().find(|m| &m.id == id).cloned()
    }

    pub async fn is_liked(&self, id: &MessageId, identity: &Identity) -> bool {
        let tables = self.tables.lock().await;
        tables
            .likes
            .contains(&(id.clone(), identity.as_str().to_string()))
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(rows: &mut [Message]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn fetch_top_level(&self) -> Result<Vec<Message>> {
        let mut tables = self.tables.lock().await;
        tables.enter(Operation::FetchTopLevel)?;
        let mut rows: Vec<_> = tables
            .messages
            .iter()
            .filter(|m| m.parent_id.is_none())
            .cloned()
            .collect();
        newest_first(&mut rows);
        Ok(rows)
    }

    async fn fetch_replies(&self) -> Result<HashMap<MessageId, Vec<Message>>> {
        let mut tables = self.tables.lock().await;
        tables.enter(Operation::FetchReplies)?;
        let rows: Vec<_> = tables
            .messages
            .iter()
            .filter(|m| m.parent_id.is_some())
            .cloned()
            .collect();
        Ok(group_replies(rows))
    }

    async fn fetch_all(&self) -> Result<Vec<Message>> {
        let mut tables = self.tables.lock().await;
        tables.enter(Operation::FetchAll)?;
        let mut rows = tables.messages.clone();
        newest_first(&mut rows);
        Ok(rows)
    }

    async fn fetch_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let mut tables = self.tables.lock().await;
        tables.enter(Operation::FetchMessage)?;
        Ok(tables.messages.iter().find(|m| &m.id == id).cloned())
    }

    async fn fetch_likes(&self, identity: &Identity) -> Result<HashSet<MessageId>> {
        let mut tables = self.tables.lock().await;
        tables.enter(Operation::FetchLikes)?;
        Ok(tables
            .likes
            .iter()
            .filter(|(_, user)| user == identity.as_str())
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let mut tables = self.tables.lock().await;
        tables.enter(Operation::Insert)?;
        let row = Message {
            id: MessageId::generate(),
            content: message.content.clone(),
            author: message.author.clone(),
            created_at: message.created_at,
            tags: message.tags.clone(),
            like_count: message.likes,
            reply_count: message.replies,
            reactions: message.reactions.clone(),
            parent_id: message.parent_id.clone(),
        };
        tables.messages.push(row.clone());
        drop(tables);

        debug!(id = %row.id, "memory backend inserted row");
        self.emit(ChangeEvent::Insert(row.clone()));
        Ok(row)
    }

    async fn update_reply_count(&self, id: &MessageId, count: u32) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.enter(Operation::UpdateReplyCount)?;
        let row = tables
            .find_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        row.reply_count = count;
        let event = ChangeEvent::Update(MessagePatch::from(row.clone()));
        drop(tables);
        self.emit(event);
        Ok(())
    }

    async fn toggle_like(&self, id: &MessageId, identity: &Identity) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.enter(Operation::ToggleLike)?;
        if tables.find_mut(id).is_none() {
            return Err(GatewayError::NotFound(id.to_string()));
        }
        let key = (id.clone(), identity.as_str().to_string());
        let now_liked = !tables.likes.remove(&key);
        if now_liked {
            tables.likes.insert(key);
        }
        let row = tables
            .find_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        row.like_count = if now_liked {
            row.like_count + 1
        } else {
            row.like_count.saturating_sub(1)
        };
        let event = ChangeEvent::Update(MessagePatch::from(row.clone()));
        drop(tables);
        self.emit(event);
        Ok(())
    }

    async fn subscribe(&self) -> Result<ChangeFeed> {
        self.tables.lock().await.enter(Operation::Subscribe)?;

        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "memory feed lagged, requesting resync");
                        ChangeEvent::Resync
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(ChangeFeed::new(rx, Some(task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn draft(content: &str, parent: Option<MessageId>) -> NewMessage {
        NewMessage {
            content: content.to_string(),
            author: "anon-test".into(),
            created_at: Utc::now(),
            tags: vec![],
            likes: 0,
            replies: 0,
            reactions: vec![],
            parent_id: parent,
        }
    }

    #[tokio::test]
    async fn test_insert_publishes_event() {
        let gw = MemoryGateway::new();
        let mut feed = gw.subscribe().await.unwrap();

        let row = gw.insert_message(&draft("halo", None)).await.unwrap();
        assert!(row.id.is_well_formed());

        match feed.next().await {
            Some(ChangeEvent::Insert(m)) => assert_eq!(m.id, row.id),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_toggle_like_flips() {
        let gw = MemoryGateway::new();
        let me = Identity::new("anon-me");
        let row = gw.insert_message(&draft("halo", None)).await.unwrap();

        gw.toggle_like(&row.id, &me).await.unwrap();
        assert!(gw.is_liked(&row.id, &me).await);
        assert_eq!(gw.row(&row.id).await.unwrap().like_count, 1);
        assert!(gw.fetch_likes(&me).await.unwrap().contains(&row.id));

        gw.toggle_like(&row.id, &me).await.unwrap();
        assert!(!gw.is_liked(&row.id, &me).await);
        assert_eq!(gw.row(&row.id).await.unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn test_fetch_splits_top_level_and_replies() {
        let gw = MemoryGateway::new();
        let parent = gw.insert_message(&draft("parent", None)).await.unwrap();
        gw.insert_message(&draft("child", Some(parent.id.clone())))
            .await
            .unwrap();

        let top = gw.fetch_top_level().await.unwrap();
        assert_eq!(top.len(), 1);
        let replies = gw.fetch_replies().await.unwrap();
        assert_eq!(replies[&parent.id].len(), 1);
        assert_eq!(gw.fetch_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let gw = MemoryGateway::new();
        gw.fail_next(Operation::FetchAll, 1).await;
        assert!(matches!(gw.fetch_all().await, Err(GatewayError::Injected(_))));
        assert!(gw.fetch_all().await.is_ok());
        assert_eq!(gw.calls(Operation::FetchAll).await, 2);
    }

    #[tokio::test]
    async fn test_delete_publishes_old_key() {
        let gw = MemoryGateway::new();
        let row = gw.insert_message(&draft("bye", None)).await.unwrap();
        let mut feed = gw.subscribe().await.unwrap();

        gw.delete(&row.id).await.unwrap();
        assert_eq!(feed.next().await, Some(ChangeEvent::Delete(row.key())));
        assert!(gw.row(&row.id).await.is_none());
    }
}
