//! The message synchronization store.
//!
//! Startup order matters: the change subscription is opened first, then
//! the snapshot (top-level messages, replies, liked set) is fetched
//! concurrently, and only then does the pump start draining the queued
//! events. Anything the snapshot already captured is dropped by the
//! ledger, so nothing is lost or applied twice in the gap.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use anonchat_net::{ChangeFeed, Gateway, GatewayError};
use anonchat_shared::{
    profanity, ChangeEvent, Draft, Identity, Message, MessageId, NewMessage, ValidationError,
};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{self, Notice, Severity, StoreEvent, EVENT_BUFFER};
use crate::feed::{FeedPage, FeedQuery};
use crate::guard::SubmitGuard;
use crate::reconcile::Board;
use crate::tags::{compute_top_tags, TagCount};

pub struct SyncStore {
    gateway: Arc<dyn Gateway>,
    identity: Identity,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    board: Mutex<Board>,
    guard: Mutex<SubmitGuard>,
    events: broadcast::Sender<StoreEvent>,
    shutdown: watch::Receiver<bool>,
}

/// Owner of a running store. Shutting it down, or dropping it, stops the
/// change pump and makes every pending and future mutation return
/// [`SyncError::Closed`].
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    pump: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Signal shutdown and wait for the pump to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                if !e.is_cancelled() {
                    error!(error = %e, "change pump panicked");
                }
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl SyncStore {
    /// Subscribe, load the initial snapshot and start applying change
    /// events. Fails if either the subscription or the snapshot fails.
    pub async fn start(
        gateway: Arc<dyn Gateway>,
        identity: Identity,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<(Arc<Self>, SyncHandle), SyncError> {
        let feed = gateway.subscribe().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let store = Arc::new(Self {
            gateway,
            identity,
            clock,
            guard: Mutex::new(SubmitGuard::new(&config)),
            config,
            board: Mutex::new(Board::new()),
            events,
            shutdown: shutdown_rx,
        });

        store.load_snapshot().await?;

        let pump = tokio::spawn(Self::pump(Arc::clone(&store), feed));
        info!(identity = %store.identity, "sync store started");

        Ok((
            store,
            SyncHandle {
                shutdown: shutdown_tx,
                pump: Some(pump),
            },
        ))
    }

    async fn pump(store: Arc<Self>, mut feed: ChangeFeed) {
        let mut shutdown = store.shutdown.clone();
        loop {
            tokio::select! {
                _ = closed(&mut shutdown) => break,
                event = feed.next() => match event {
                    Some(event) => store.handle_change(event).await,
                    None => {
                        warn!("change feed ended");
                        store.notice(Severity::Warning, "Live updates stopped");
                        break;
                    }
                },
            }
        }
        feed.close();
        debug!("change pump stopped");
    }

    // -----------------------------------------------------------------------
    // Snapshot and change events
    // -----------------------------------------------------------------------

    async fn load_snapshot(&self) -> Result<(), SyncError> {
        self.board.lock().await.set_loading(true);
        self.emit(StoreEvent::Changed);

        let fetched = self
            .cancellable(async {
                tokio::try_join!(
                    self.gateway.fetch_top_level(),
                    self.gateway.fetch_replies(),
                    self.gateway.fetch_likes(&self.identity),
                )
            })
            .await;

        let (messages, replies, liked) = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.board.lock().await.set_loading(false);
                self.emit(StoreEvent::Changed);
                return Err(e);
            }
        };

        let top_tags = compute_top_tags(&messages, self.config.top_tags);
        {
            let mut board = self.board.lock().await;
            board.replace_snapshot(messages, replies, liked);
            board.set_top_tags(top_tags);
        }
        self.emit(StoreEvent::Changed);
        Ok(())
    }

    /// Reconcile one change event, then refresh the tag ranking.
    pub async fn handle_change(&self, event: ChangeEvent) {
        if event == ChangeEvent::Resync {
            info!("change stream lost continuity, reloading snapshot");
            if let Err(e) = self.load_snapshot().await {
                warn!(error = %e, "snapshot reload failed");
            }
            return;
        }

        let kind = event.kind();
        let id = event.row_id().cloned();
        let outcome = self.board.lock().await.apply(event);
        debug!(?kind, id = ?id, ?outcome, "change event");

        if outcome.changed() {
            self.emit(StoreEvent::Changed);
        }
        self.refresh_tags().await;
    }

    /// Recompute the popular tags from a fresh fetch. Failures are logged
    /// and otherwise ignored.
    pub async fn refresh_tags(&self) {
        match self.cancellable(self.gateway.fetch_top_level()).await {
            Ok(rows) => {
                let top_tags = compute_top_tags(&rows, self.config.top_tags);
                if self.board.lock().await.set_top_tags(top_tags) {
                    self.emit(StoreEvent::Changed);
                }
            }
            Err(SyncError::Closed) => {}
            Err(e) => warn!(error = %e, "popular tag refresh failed"),
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Parse raw form input into a [`Draft`], raising a notice when it is
    /// rejected.
    pub fn prepare_draft(&self, content: &str, tags_input: &str) -> Result<Draft, SyncError> {
        Draft::parse(content, tags_input).map_err(|e| self.reject(e.into()))
    }

    /// Post a top-level message.
    pub async fn post(&self, draft: Draft) -> Result<Message, SyncError> {
        self.ensure_open()?;
        self.check_length(&draft)?;

        let content = draft.masked_content();
        let now = self.clock.now();
        let admitted = {
            let board = self.board.lock().await;
            let mut guard = self.guard.lock().await;
            guard.admit(None, &content, board.messages(), now)
        };
        let ticket = admitted.map_err(|e| self.reject(e))?;
        self.warn_if_flagged(&draft);

        let payload = NewMessage::from_draft(&draft, &self.identity, now, None);
        let result = self.cancellable(self.gateway.insert_message(&payload)).await;
        let accepted_at = result.as_ref().ok().map(|_| self.clock.now());
        self.guard.lock().await.release(&ticket, accepted_at);

        let row = result.map_err(|e| self.fail("Failed to send message", e))?;
        info!(id = %row.id, "message posted");

        if self.board.lock().await.splice(row.clone()) {
            self.emit(StoreEvent::Changed);
        }
        self.refresh_tags().await;
        self.notice(Severity::Success, "Message sent");
        Ok(row)
    }

    /// Reply to a top-level message and bump its reply counter.
    ///
    /// The counter update is a separate call. If it fails the reply still
    /// stands and a warning notice is raised; the counter catches up on the
    /// next snapshot.
    pub async fn reply(&self, parent_id: &MessageId, draft: Draft) -> Result<Message, SyncError> {
        self.ensure_open()?;
        if !parent_id.is_well_formed() {
            let err = ValidationError::MalformedId(parent_id.to_string());
            return Err(self.reject(err.into()));
        }
        self.check_length(&draft)?;

        let content = draft.masked_content();
        let now = self.clock.now();
        let admitted = {
            let board = self.board.lock().await;
            if board.top_level(parent_id).is_some() {
                let mut guard = self.guard.lock().await;
                guard.admit(
                    Some(parent_id.clone()),
                    &content,
                    board.replies(parent_id),
                    now,
                )
            } else if board.find(parent_id).is_some() {
                Err(ValidationError::NestedReply(parent_id.to_string()).into())
            } else {
                Err(SyncError::UnknownParent(parent_id.to_string()))
            }
        };
        let ticket = admitted.map_err(|e| self.reject(e))?;
        self.warn_if_flagged(&draft);

        let payload =
            NewMessage::from_draft(&draft, &self.identity, now, Some(parent_id.clone()));
        let result = self.cancellable(self.gateway.insert_message(&payload)).await;
        let accepted_at = result.as_ref().ok().map(|_| self.clock.now());
        self.guard.lock().await.release(&ticket, accepted_at);

        let row = result.map_err(|e| self.fail("Failed to send reply", e))?;
        info!(id = %row.id, parent = %parent_id, "reply posted");
        self.board.lock().await.splice(row.clone());

        let next_count = {
            let board = self.board.lock().await;
            board.top_level(parent_id).map(|p| p.reply_count + 1)
        };
        if let Some(count) = next_count {
            match self
                .cancellable(self.gateway.update_reply_count(parent_id, count))
                .await
            {
                Ok(()) => self.board.lock().await.set_reply_count(parent_id, count),
                Err(SyncError::Closed) => return Err(SyncError::Closed),
                Err(e) => {
                    warn!(parent = %parent_id, error = %e, "reply count update failed");
                    self.notice(
                        Severity::Warning,
                        "Reply sent, but the reply count could not be updated",
                    );
                }
            }
        }

        self.emit(StoreEvent::Changed);
        self.notice(Severity::Success, "Reply sent");
        Ok(row)
    }

    /// Flip this identity's like on `id`. Returns the new liked state.
    ///
    /// The local flip happens before the backend call. On failure the row's
    /// counter and the liked set are refetched; if that fails too, the flip
    /// is undone.
    pub async fn toggle_like(&self, id: &MessageId) -> Result<bool, SyncError> {
        self.ensure_open()?;
        if !id.is_well_formed() {
            let err = ValidationError::MalformedId(id.to_string());
            return Err(self.reject(err.into()));
        }

        let now_liked = self.board.lock().await.flip_like(id);
        self.emit(StoreEvent::Changed);

        match self
            .cancellable(self.gateway.toggle_like(id, &self.identity))
            .await
        {
            Ok(()) => {
                debug!(%id, liked = now_liked, "like toggled");
                Ok(now_liked)
            }
            Err(SyncError::Closed) => Err(SyncError::Closed),
            Err(e) => {
                warn!(%id, error = %e, "like toggle failed, reconciling");
                self.reconcile_like(id).await;
                self.emit(StoreEvent::Changed);
                Err(self.fail("Failed to update like", e))
            }
        }
    }

    async fn reconcile_like(&self, id: &MessageId) {
        let fetched = self
            .cancellable(async {
                tokio::try_join!(
                    self.gateway.fetch_message(id),
                    self.gateway.fetch_likes(&self.identity),
                )
            })
            .await;

        let mut board = self.board.lock().await;
        match fetched {
            Ok((row, liked)) => board.reconcile_like(id, row, liked.contains(id)),
            Err(SyncError::Closed) => {}
            Err(e) => {
                warn!(%id, error = %e, "like refetch failed, reverting local flip");
                board.flip_like(id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Carry over the cooldown of a submission accepted before this store
    /// started.
    pub async fn restore_cooldown(&self, accepted_at: DateTime<Utc>) {
        self.guard.lock().await.restore(accepted_at);
    }

    /// Time of the last accepted post or reply, for persisting the cooldown.
    pub async fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.guard.lock().await.last_accepted()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Top-level messages, newest first.
    pub async fn messages(&self) -> Vec<Message> {
        self.board.lock().await.messages().to_vec()
    }

    /// Replies to `parent`, oldest first.
    pub async fn replies(&self, parent: &MessageId) -> Vec<Message> {
        self.board.lock().await.replies(parent).to_vec()
    }

    pub async fn all_replies(&self) -> HashMap<MessageId, Vec<Message>> {
        self.board.lock().await.all_replies().clone()
    }

    pub async fn message(&self, id: &MessageId) -> Option<Message> {
        self.board.lock().await.find(id).cloned()
    }

    pub async fn is_liked(&self, id: &MessageId) -> bool {
        self.board.lock().await.is_liked(id)
    }

    pub async fn liked(&self) -> HashSet<MessageId> {
        self.board.lock().await.liked().clone()
    }

    pub async fn top_tags(&self) -> Vec<TagCount> {
        self.board.lock().await.top_tags().to_vec()
    }

    pub async fn is_loading(&self) -> bool {
        self.board.lock().await.is_loading()
    }

    /// Filtered, sorted and paginated view of the top-level messages.
    pub async fn feed(&self, query: &FeedQuery) -> FeedPage {
        let board = self.board.lock().await;
        query.run(board.messages())
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Run a gateway call unless the store shuts down first.
    async fn cancellable<T, F>(&self, call: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            result = call => result.map_err(SyncError::from),
            _ = closed(&mut shutdown) => Err(SyncError::Closed),
        }
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    fn check_length(&self, draft: &Draft) -> Result<(), SyncError> {
        let len = draft.content().chars().count();
        if len > self.config.max_content_len {
            let err = ValidationError::ContentTooLong {
                len,
                max: self.config.max_content_len,
            };
            return Err(self.reject(err.into()));
        }
        Ok(())
    }

    fn warn_if_flagged(&self, draft: &Draft) {
        if profanity::contains_flagged(draft.content()) {
            self.notice(
                Severity::Warning,
                "Your message contains inappropriate words and has been masked",
            );
        }
    }

    /// Surface a local, pre-flight rejection.
    fn reject(&self, err: SyncError) -> SyncError {
        debug!(error = %err, "submission rejected locally");
        self.notice(Severity::Error, err.to_string());
        err
    }

    /// Surface a failed backend call.
    fn fail(&self, text: &str, err: SyncError) -> SyncError {
        if !matches!(err, SyncError::Closed) {
            error!(error = %err, "{text}");
            self.notice(Severity::Error, text);
        }
        err
    }

    fn notice(&self, severity: Severity, text: impl Into<String>) {
        self.emit(StoreEvent::Notice(Notice::new(severity, text)));
    }

    fn emit(&self, event: StoreEvent) {
        events::emit(&self.events, event);
    }
}

/// Resolves once shutdown is signalled or the handle is gone. The borrowed
/// value is released here so callers can keep awaiting in other arms.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anonchat_net::{MemoryGateway, Operation};
    use chrono::TimeZone;

    use crate::clock::ManualClock;

    async fn started(gw: Arc<MemoryGateway>) -> (Arc<SyncStore>, SyncHandle) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        SyncStore::start(gw, Identity::new("anon-unittest"), clock, SyncConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_fails_when_snapshot_fails() {
        let gw = Arc::new(MemoryGateway::new());
        gw.fail_next(Operation::FetchLikes, 1).await;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let result =
            SyncStore::start(gw, Identity::new("anon-x"), clock, SyncConfig::default()).await;
        assert!(matches!(result, Err(SyncError::Gateway(_))));
    }

    #[tokio::test]
    async fn test_pump_can_be_spawned() {
        fn assert_send<T: Send + 'static>(_: &T) {}

        let gw = Arc::new(MemoryGateway::new());
        let (store, _handle) = started(Arc::clone(&gw)).await;
        let feed = gw.subscribe().await.unwrap();
        let pump = SyncStore::pump(Arc::clone(&store), feed);
        assert_send(&pump);
        drop(pump);
    }

    #[tokio::test]
    async fn test_malformed_like_never_reaches_backend() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, _handle) = started(Arc::clone(&gw)).await;
        let mut events = store.subscribe();

        let err = store.toggle_like(&MessageId::new("not-a-uuid")).await;
        assert!(matches!(
            err,
            Err(SyncError::Validation(ValidationError::MalformedId(_)))
        ));
        assert_eq!(gw.calls(Operation::ToggleLike).await, 0);
        match events.recv().await.unwrap() {
            StoreEvent::Notice(n) => assert_eq!(n.severity, Severity::Error),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_store_rejects_mutations() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, handle) = started(Arc::clone(&gw)).await;
        handle.shutdown().await;

        assert!(store.is_closed());
        let draft = Draft::parse("halo", "").unwrap();
        assert!(matches!(store.post(draft).await, Err(SyncError::Closed)));
        assert_eq!(gw.calls(Operation::Insert).await, 0);
    }

    #[tokio::test]
    async fn test_restored_cooldown_blocks_post() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, _handle) = started(Arc::clone(&gw)).await;
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        store.restore_cooldown(start - chrono::Duration::seconds(1)).await;
        let draft = Draft::parse("halo", "").unwrap();
        assert!(matches!(
            store.post(draft).await,
            Err(SyncError::RateLimited { wait_secs: 2 })
        ));
        assert_eq!(gw.calls(Operation::Insert).await, 0);
        assert_eq!(
            store.last_accepted().await,
            Some(start - chrono::Duration::seconds(1))
        );
    }

    #[tokio::test]
    async fn test_prepare_draft_raises_notice() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, _handle) = started(gw).await;
        let mut events = store.subscribe();

        assert!(store.prepare_draft("   ", "").is_err());
        assert!(matches!(
            events.recv().await.unwrap(),
            StoreEvent::Notice(Notice {
                severity: Severity::Error,
                ..
            })
        ));
    }
}
