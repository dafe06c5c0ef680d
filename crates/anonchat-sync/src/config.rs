use std::time::Duration;

use anonchat_shared::constants::{
    DUPLICATE_WINDOW_SECS, MAX_CONTENT_LEN, POST_COOLDOWN_MS, TOP_TAGS_LIMIT,
};

/// Tunables for [`crate::SyncStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum time between two accepted submissions.
    pub cooldown: Duration,
    /// How far back identical content counts as a duplicate.
    pub duplicate_window: Duration,
    /// Length of the popular-tag ranking.
    pub top_tags: usize,
    /// Longest accepted message, in characters. Never above what
    /// [`anonchat_shared::Draft`] itself accepts.
    pub max_content_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(POST_COOLDOWN_MS),
            duplicate_window: Duration::from_secs(DUPLICATE_WINDOW_SECS),
            top_tags: TOP_TAGS_LIMIT,
            max_content_len: MAX_CONTENT_LEN,
        }
    }
}
