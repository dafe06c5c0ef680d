use thiserror::Error;

use anonchat_net::GatewayError;
use anonchat_shared::ValidationError;

/// Errors returned by store operations.
///
/// Everything except [`SyncError::Gateway`] is raised before the backend is
/// contacted, so no state has changed when it is returned.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Please wait {wait_secs} seconds before sending another message")]
    RateLimited { wait_secs: u64 },

    #[error("Duplicate message detected. Please wait before sending the same message again.")]
    Duplicate,

    #[error("Unknown parent message: {0}")]
    UnknownParent(String),

    #[error("Backend error: {0}")]
    Gateway(#[from] GatewayError),

    /// The store was shut down while the operation was pending.
    #[error("Store is closed")]
    Closed,
}

impl SyncError {
    /// Whether the failure was decided locally, before any network call.
    pub fn is_preflight(&self) -> bool {
        !matches!(self, SyncError::Gateway(_) | SyncError::Closed)
    }
}
