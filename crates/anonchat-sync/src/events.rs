use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the store's event channel. Slow subscribers lag and miss
/// events rather than blocking the store.
pub const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Short-lived user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub text: String,
}

impl Notice {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Store contents changed; re-read what you display.
    Changed,
    Notice(Notice),
}

pub(crate) fn emit(tx: &broadcast::Sender<StoreEvent>, event: StoreEvent) {
    // No subscribers is fine.
    if tx.send(event).is_err() {
        tracing::trace!("store event dropped, no subscribers");
    }
}
