use thiserror::Error;

/// Problems caught before anything is sent to the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyContent,

    #[error("Message too long: {len} characters (max {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("Tags should only contain letters, numbers, and hyphens: {0}")]
    InvalidTag(String),

    #[error("No need to add # to a tag, it is added automatically: {0}")]
    HashInTag(String),

    #[error("Invalid message ID format: {0}")]
    MalformedId(String),

    #[error("Replies cannot be replied to: {0}")]
    NestedReply(String),
}
