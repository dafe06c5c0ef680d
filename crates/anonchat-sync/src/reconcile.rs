//! In-memory board state and change-event reconciliation.
//!
//! [`Board`] owns the local copy of the table: top-level messages newest
//! first, reply lists oldest first, the liked set and the tag ranking.
//! [`EventLedger`] decides which change events are new.
//!
//! Every event is checked against the ledger:
//! - an INSERT for an id already known (snapshot, earlier event or local
//!   splice) is dropped;
//! - an UPDATE identical to the last one applied for its id is dropped;
//! - a DELETE tombstones the id, after which nothing for it is applied.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use anonchat_shared::{ChangeEvent, Message, MessageId, MessageKey, MessagePatch};

use crate::tags::TagCount;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Why an event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    AlreadyKnown,
    RepeatedUpdate,
    Tombstoned,
    /// The row is not held locally, so there is nothing to update or remove.
    Missing,
    /// Snapshot reloads are driven by the store, not the board.
    Resync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Updated,
    Deleted,
    Skipped(Skip),
}

impl Outcome {
    pub fn changed(&self) -> bool {
        !matches!(self, Outcome::Skipped(_))
    }
}

#[derive(Debug, Default)]
pub struct EventLedger {
    known: HashSet<MessageId>,
    last_update: HashMap<MessageId, blake3::Hash>,
    tombstones: HashSet<MessageId>,
}

impl EventLedger {
    /// Forget per-event history and start from the ids of a fresh snapshot.
    /// Tombstones survive unless the snapshot shows the row alive.
    pub fn reset(&mut self, snapshot_ids: impl IntoIterator<Item = MessageId>) {
        self.known.clear();
        self.last_update.clear();
        for id in snapshot_ids {
            self.tombstones.remove(&id);
            self.known.insert(id);
        }
    }

    /// Record `id` as present. Returns `false` if it was already known or
    /// has been deleted.
    pub fn register(&mut self, id: &MessageId) -> bool {
        if self.tombstones.contains(id) {
            return false;
        }
        self.known.insert(id.clone())
    }

    pub fn is_known(&self, id: &MessageId) -> bool {
        self.known.contains(id)
    }

    pub fn is_tombstoned(&self, id: &MessageId) -> bool {
        self.tombstones.contains(id)
    }

    /// Check an event and record it. `Ok` means apply it.
    pub fn admit(&mut self, event: &ChangeEvent) -> Result<(), Skip> {
        match event {
            ChangeEvent::Insert(row) => {
                if self.tombstones.contains(&row.id) {
                    return Err(Skip::Tombstoned);
                }
                if !self.known.insert(row.id.clone()) {
                    return Err(Skip::AlreadyKnown);
                }
                Ok(())
            }
            ChangeEvent::Update(patch) => {
                if self.tombstones.contains(&patch.id) {
                    return Err(Skip::Tombstoned);
                }
                let fingerprint = patch.fingerprint();
                if self.last_update.get(&patch.id) == Some(&fingerprint) {
                    return Err(Skip::RepeatedUpdate);
                }
                self.last_update.insert(patch.id.clone(), fingerprint);
                Ok(())
            }
            ChangeEvent::Delete(key) => {
                if !self.tombstones.insert(key.id.clone()) {
                    return Err(Skip::Tombstoned);
                }
                self.known.remove(&key.id);
                self.last_update.remove(&key.id);
                Ok(())
            }
            ChangeEvent::Resync => Err(Skip::Resync),
        }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Board {
    messages: Vec<Message>,
    replies: HashMap<MessageId, Vec<Message>>,
    liked: HashSet<MessageId>,
    top_tags: Vec<TagCount>,
    loading: bool,
    ledger: EventLedger,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// An empty board that is still waiting for its first snapshot.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            replies: HashMap::new(),
            liked: HashSet::new(),
            top_tags: Vec::new(),
            loading: true,
            ledger: EventLedger::default(),
        }
    }

    /// Replace everything with a freshly fetched snapshot.
    pub fn replace_snapshot(
        &mut self,
        mut messages: Vec<Message>,
        mut replies: HashMap<MessageId, Vec<Message>>,
        liked: HashSet<MessageId>,
    ) {
        sort_newest_first(&mut messages);
        for bucket in replies.values_mut() {
            sort_oldest_first(bucket);
        }

        let ids = messages
            .iter()
            .chain(replies.values().flatten())
            .map(|m| m.id.clone())
            .collect::<Vec<_>>();
        self.ledger.reset(ids);

        debug!(
            messages = messages.len(),
            threads = replies.len(),
            liked = liked.len(),
            "snapshot loaded"
        );
        self.messages = messages;
        self.replies = replies;
        self.liked = liked;
        self.loading = false;
    }

    /// Reconcile one change event.
    pub fn apply(&mut self, event: ChangeEvent) -> Outcome {
        if let Err(skip) = self.ledger.admit(&event) {
            trace!(id = ?event.row_id(), ?skip, "change event skipped");
            return Outcome::Skipped(skip);
        }

        match event {
            ChangeEvent::Insert(row) => {
                self.place(row);
                Outcome::Inserted
            }
            ChangeEvent::Update(patch) => self.merge(&patch),
            ChangeEvent::Delete(key) => self.remove(&key),
            ChangeEvent::Resync => Outcome::Skipped(Skip::Resync),
        }
    }

    /// Put a row returned by a local insert in place, unless its change
    /// event got here first.
    pub fn splice(&mut self, row: Message) -> bool {
        if !self.ledger.register(&row.id) {
            return false;
        }
        self.place(row);
        true
    }

    fn place(&mut self, row: Message) {
        match row.parent_id.clone() {
            Some(parent) => {
                let bucket = self.replies.entry(parent).or_default();
                if bucket.iter().all(|m| m.id != row.id) {
                    bucket.push(row);
                    sort_oldest_first(bucket);
                }
            }
            None => {
                if self.messages.iter().all(|m| m.id != row.id) {
                    self.messages.insert(0, row);
                    sort_newest_first(&mut self.messages);
                }
            }
        }
    }

    fn merge(&mut self, patch: &MessagePatch) -> Outcome {
        match self.find_mut(&patch.id, patch.parent_id.as_ref()) {
            Some(row) => {
                patch.apply_to(row);
                Outcome::Updated
            }
            None => {
                debug!(id = %patch.id, "update for a row not held locally");
                Outcome::Skipped(Skip::Missing)
            }
        }
    }

    fn remove(&mut self, key: &MessageKey) -> Outcome {
        self.liked.remove(&key.id);

        if let Some(pos) = self.messages.iter().position(|m| m.id == key.id) {
            self.messages.remove(pos);
            self.replies.remove(&key.id);
            return Outcome::Deleted;
        }

        // Delete payloads may carry only the id, so search every thread
        // when the parent is unknown.
        let buckets: Vec<MessageId> = match &key.parent_id {
            Some(parent) => vec![parent.clone()],
            None => self.replies.keys().cloned().collect(),
        };
        for parent in buckets {
            if let Some(bucket) = self.replies.get_mut(&parent) {
                if let Some(pos) = bucket.iter().position(|m| m.id == key.id) {
                    bucket.remove(pos);
                    return Outcome::Deleted;
                }
            }
        }
        Outcome::Skipped(Skip::Missing)
    }

    // -----------------------------------------------------------------------
    // Local edits
    // -----------------------------------------------------------------------

    /// Flip this identity's like on `id` and move the counter by one.
    /// Returns the new liked state.
    pub fn flip_like(&mut self, id: &MessageId) -> bool {
        let now_liked = if self.liked.remove(id) {
            false
        } else {
            self.liked.insert(id.clone());
            true
        };
        self.adjust_likes(id, now_liked);
        now_liked
    }

    fn adjust_likes(&mut self, id: &MessageId, up: bool) {
        if let Some(row) = self.find_mut(id, None) {
            row.like_count = if up {
                row.like_count.saturating_add(1)
            } else {
                row.like_count.saturating_sub(1)
            };
        }
    }

    /// Overwrite a row's like counter and this identity's membership with
    /// fetched truth. A `None` row means it no longer exists remotely.
    pub fn reconcile_like(&mut self, id: &MessageId, row: Option<Message>, liked: bool) {
        if liked {
            self.liked.insert(id.clone());
        } else {
            self.liked.remove(id);
        }
        match row {
            Some(row) => {
                if let Some(local) = self.find_mut(id, row.parent_id.as_ref()) {
                    local.like_count = row.like_count;
                }
            }
            None => {
                let key = MessageKey {
                    id: id.clone(),
                    parent_id: None,
                };
                self.remove(&key);
            }
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub fn set_reply_count(&mut self, id: &MessageId, count: u32) {
        if let Some(row) = self.find_mut(id, None) {
            row.reply_count = count;
        }
    }

    pub fn set_top_tags(&mut self, top_tags: Vec<TagCount>) -> bool {
        if self.top_tags == top_tags {
            return false;
        }
        self.top_tags = top_tags;
        true
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn replies(&self, parent: &MessageId) -> &[Message] {
        self.replies.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_replies(&self) -> &HashMap<MessageId, Vec<Message>> {
        &self.replies
    }

    pub fn liked(&self) -> &HashSet<MessageId> {
        &self.liked
    }

    pub fn is_liked(&self, id: &MessageId) -> bool {
        self.liked.contains(id)
    }

    pub fn top_tags(&self) -> &[TagCount] {
        &self.top_tags
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    pub fn top_level(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Any held row, top-level or reply.
    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.top_level(id)
            .or_else(|| self.replies.values().flatten().find(|m| &m.id == id))
    }

    /// Locate a row, looking in `parent`'s thread first when given.
    fn find_mut(&mut self, id: &MessageId, parent: Option<&MessageId>) -> Option<&mut Message> {
        if let Some(parent) = parent {
            let hinted = self
                .replies
                .get(parent)
                .and_then(|bucket| bucket.iter().position(|m| &m.id == id));
            if let Some(pos) = hinted {
                return self.replies.get_mut(parent).map(|bucket| &mut bucket[pos]);
            }
        }
        if let Some(pos) = self.messages.iter().position(|m| &m.id == id) {
            return Some(&mut self.messages[pos]);
        }
        self.replies
            .values_mut()
            .flat_map(|bucket| bucket.iter_mut())
            .find(|m| &m.id == id)
    }
}

fn sort_newest_first(rows: &mut [Message]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn sort_oldest_first(rows: &mut [Message]) {
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn row(content: &str, at: i64, parent: Option<&MessageId>) -> Message {
        Message {
            id: MessageId::generate(),
            content: content.into(),
            author: "anon-x".into(),
            created_at: t(at),
            tags: vec![],
            like_count: 0,
            reply_count: 0,
            reactions: vec![],
            parent_id: parent.cloned(),
        }
    }

    fn loaded(messages: Vec<Message>) -> Board {
        let mut board = Board::new();
        board.replace_snapshot(messages, HashMap::new(), HashSet::new());
        board
    }

    fn contents(rows: &[Message]) -> Vec<&str> {
        rows.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_snapshot_clears_loading_and_sorts() {
        let mut board = Board::new();
        assert!(board.is_loading());
        board.replace_snapshot(
            vec![row("old", 1, None), row("new", 9, None)],
            HashMap::new(),
            HashSet::new(),
        );
        assert!(!board.is_loading());
        assert_eq!(contents(board.messages()), vec!["new", "old"]);
    }

    #[test]
    fn test_insert_of_snapshot_row_is_dropped() {
        let a = row("a", 1, None);
        let mut board = loaded(vec![a.clone()]);
        assert_eq!(
            board.apply(ChangeEvent::Insert(a)),
            Outcome::Skipped(Skip::AlreadyKnown)
        );
        assert_eq!(board.messages().len(), 1);
    }

    #[test]
    fn test_every_repeated_insert_is_dropped() {
        let mut board = loaded(vec![]);
        let a = row("a", 1, None);
        assert_eq!(board.apply(ChangeEvent::Insert(a.clone())), Outcome::Inserted);
        for _ in 0..3 {
            assert!(!board.apply(ChangeEvent::Insert(a.clone())).changed());
        }
        assert_eq!(board.messages().len(), 1);
    }

    #[test]
    fn test_inserts_keep_order() {
        let mut board = loaded(vec![row("mid", 5, None)]);
        board.apply(ChangeEvent::Insert(row("late", 9, None)));
        board.apply(ChangeEvent::Insert(row("early", 1, None)));
        assert_eq!(contents(board.messages()), vec!["late", "mid", "early"]);

        let parent = board.messages()[0].id.clone();
        board.apply(ChangeEvent::Insert(row("r2", 20, Some(&parent))));
        board.apply(ChangeEvent::Insert(row("r1", 10, Some(&parent))));
        assert_eq!(contents(board.replies(&parent)), vec!["r1", "r2"]);
    }

    #[test]
    fn test_update_merges_and_drops_repeats() {
        let a = row("a", 1, None);
        let mut board = loaded(vec![a.clone()]);

        let mut patch = MessagePatch::new(a.id.clone());
        patch.like_count = Some(4);
        assert_eq!(board.apply(ChangeEvent::Update(patch.clone())), Outcome::Updated);
        assert_eq!(
            board.apply(ChangeEvent::Update(patch)),
            Outcome::Skipped(Skip::RepeatedUpdate)
        );

        let stored = board.find(&a.id).unwrap();
        assert_eq!(stored.like_count, 4);
        assert_eq!(stored.content, "a");
    }

    #[test]
    fn test_update_finds_reply_without_parent_hint() {
        let parent = row("p", 1, None);
        let reply = row("r", 2, Some(&parent.id));
        let mut board = Board::new();
        let mut replies = HashMap::new();
        replies.insert(parent.id.clone(), vec![reply.clone()]);
        board.replace_snapshot(vec![parent], replies, HashSet::new());

        let mut patch = MessagePatch::new(reply.id.clone());
        patch.content = Some("edited".into());
        assert_eq!(board.apply(ChangeEvent::Update(patch)), Outcome::Updated);
        assert_eq!(board.find(&reply.id).unwrap().content, "edited");
    }

    #[test]
    fn test_delete_tombstones_row() {
        let a = row("a", 1, None);
        let mut board = loaded(vec![a.clone()]);

        assert_eq!(board.apply(ChangeEvent::Delete(a.key())), Outcome::Deleted);
        assert!(board.messages().is_empty());

        let mut patch = MessagePatch::new(a.id.clone());
        patch.like_count = Some(1);
        assert_eq!(
            board.apply(ChangeEvent::Update(patch)),
            Outcome::Skipped(Skip::Tombstoned)
        );
        assert_eq!(
            board.apply(ChangeEvent::Insert(a.clone())),
            Outcome::Skipped(Skip::Tombstoned)
        );
        assert!(!board.splice(a));
        assert!(board.messages().is_empty());
    }

    #[test]
    fn test_delete_with_bare_id_finds_reply() {
        let parent = row("p", 1, None);
        let mut board = loaded(vec![parent.clone()]);
        let reply = row("r", 2, Some(&parent.id));
        board.apply(ChangeEvent::Insert(reply.clone()));

        let key = MessageKey {
            id: reply.id.clone(),
            parent_id: None,
        };
        assert_eq!(board.apply(ChangeEvent::Delete(key)), Outcome::Deleted);
        assert!(board.replies(&parent.id).is_empty());
    }

    #[test]
    fn test_splice_then_event_is_single_entry() {
        let mut board = loaded(vec![]);
        let a = row("a", 1, None);
        assert!(board.splice(a.clone()));
        assert!(!board.apply(ChangeEvent::Insert(a)).changed());
        assert_eq!(board.messages().len(), 1);
    }

    #[test]
    fn test_flip_like_moves_counter() {
        let a = row("a", 1, None);
        let mut board = loaded(vec![a.clone()]);
        assert!(board.flip_like(&a.id));
        assert_eq!(board.find(&a.id).unwrap().like_count, 1);
        assert!(!board.flip_like(&a.id));
        assert_eq!(board.find(&a.id).unwrap().like_count, 0);
    }

    #[test]
    fn test_reconcile_like_overwrites_prediction() {
        let a = row("a", 1, None);
        let mut board = loaded(vec![a.clone()]);
        board.flip_like(&a.id);

        let mut truth = a.clone();
        truth.like_count = 7;
        board.reconcile_like(&a.id, Some(truth), false);
        assert!(!board.is_liked(&a.id));
        assert_eq!(board.find(&a.id).unwrap().like_count, 7);

        board.reconcile_like(&a.id, None, false);
        assert!(board.find(&a.id).is_none());
    }

    #[test]
    fn test_resync_keeps_tombstones_for_absent_rows() {
        let a = row("a", 1, None);
        let mut board = loaded(vec![a.clone()]);
        board.apply(ChangeEvent::Delete(a.key()));
        board.replace_snapshot(vec![], HashMap::new(), HashSet::new());
        assert!(board.ledger().is_tombstoned(&a.id));
        assert!(!board.apply(ChangeEvent::Insert(a)).changed());
    }
}
