//! # anonchat-sync
//!
//! Client-side synchronization for the anonchat board.
//!
//! [`SyncStore`] keeps an in-memory copy of the `messages` table (top-level
//! posts plus per-parent reply lists), this identity's liked set and the
//! popular-tag ranking consistent with the backend's change stream. Posting,
//! replying and liking go through it so that rate limiting, duplicate
//! suppression and optimistic updates are applied in one place.
//!
//! The [`monitor`] module is an independent read model over the same table
//! and shares no state with the store.

pub mod clock;
pub mod config;
pub mod events;
pub mod feed;
pub mod guard;
pub mod monitor;
pub mod reconcile;
pub mod sync;
pub mod tags;

mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use error::SyncError;
pub use events::{Notice, Severity, StoreEvent};
pub use feed::{FeedPage, FeedQuery, SortOrder};
pub use monitor::{Monitor, MonitorConfig, MonitorSnapshot, RefreshInterval, TimeWindow};
pub use sync::{SyncHandle, SyncStore};
pub use tags::{compute_top_tags, TagCount};
