//! Local submission guard: cooldown between accepted submissions, duplicate
//! content within a recent window, and identical submissions already in
//! flight.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use anonchat_shared::{Message, MessageId};

use crate::config::SyncConfig;
use crate::error::SyncError;

/// Where a submission lands: `None` for the top-level feed, `Some(parent)`
/// for a reply thread.
pub type Scope = Option<MessageId>;

/// Reservation for one admitted submission. Hand it back with
/// [`SubmitGuard::release`] once the backend call has resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket {
    scope: Scope,
    content: String,
}

#[derive(Debug)]
pub struct SubmitGuard {
    cooldown: Duration,
    duplicate_window: Duration,
    last_accepted: Option<DateTime<Utc>>,
    in_flight: HashSet<Ticket>,
}

impl SubmitGuard {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            cooldown: config.cooldown,
            duplicate_window: config.duplicate_window,
            last_accepted: None,
            in_flight: HashSet::new(),
        }
    }

    /// Run every local check for a submission of `content` into `scope`.
    ///
    /// `existing` is the scope's current contents: the top-level list for a
    /// post, the parent's replies for a reply. `content` must already be
    /// masked, since that is what the backend stores.
    pub fn admit<'a>(
        &mut self,
        scope: Scope,
        content: &str,
        existing: impl IntoIterator<Item = &'a Message>,
        now: DateTime<Utc>,
    ) -> Result<Ticket, SyncError> {
        self.check_rate(now)?;

        let recent_duplicate = existing
            .into_iter()
            .any(|m| m.content == content && self.within_window(m.created_at, now));
        if recent_duplicate {
            debug!(?scope, "rejecting duplicate of a recent message");
            return Err(SyncError::Duplicate);
        }

        let ticket = Ticket {
            scope,
            content: content.to_string(),
        };
        if !self.in_flight.insert(ticket.clone()) {
            debug!(scope = ?ticket.scope, "identical submission already in flight");
            return Err(SyncError::Duplicate);
        }
        Ok(ticket)
    }

    /// Release a ticket. `accepted_at` is the time the backend confirmed the
    /// insert, or `None` when it failed; only accepted submissions start a
    /// new cooldown.
    pub fn release(&mut self, ticket: &Ticket, accepted_at: Option<DateTime<Utc>>) {
        self.in_flight.remove(ticket);
        if let Some(at) = accepted_at {
            self.last_accepted = Some(at);
        }
    }

    /// When the last accepted submission went through, if any.
    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }

    /// Resume a cooldown that started elsewhere, e.g. in an earlier run.
    /// Never moves the recorded time backwards.
    pub fn restore(&mut self, accepted_at: DateTime<Utc>) {
        if self.last_accepted.map_or(true, |last| accepted_at > last) {
            self.last_accepted = Some(accepted_at);
        }
    }

    pub fn check_rate(&self, now: DateTime<Utc>) -> Result<(), SyncError> {
        let Some(last) = self.last_accepted else {
            return Ok(());
        };
        // A clock that went backwards counts as no time elapsed.
        let elapsed = (now - last).to_std().unwrap_or_default();
        if elapsed >= self.cooldown {
            return Ok(());
        }
        let remaining_ns = (self.cooldown - elapsed).as_nanos();
        let wait_secs = remaining_ns.div_ceil(1_000_000_000) as u64;
        Err(SyncError::RateLimited { wait_secs })
    }

    fn within_window(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = (now - created_at).to_std().unwrap_or_default();
        age < self.duplicate_window
    }
}
