/// Application name
pub const APP_NAME: &str = "anonchat";

/// Backend table holding posts and replies
pub const MESSAGES_TABLE: &str = "messages";

/// Backend table relating identities to the messages they like
pub const LIKES_TABLE: &str = "message_likes";

/// Remote procedure that atomically flips a like and the denormalized counter
pub const TOGGLE_LIKE_RPC: &str = "toggle_message_like";

/// Default realtime channel name
pub const DEFAULT_REALTIME_CHANNEL: &str = "messages-channel";

/// Realtime heartbeat interval in seconds
pub const REALTIME_HEARTBEAT_SECS: u64 = 25;

/// Maximum message length in characters
pub const MAX_CONTENT_LEN: usize = 500;

/// Minimum delay between two accepted submissions, in milliseconds
pub const POST_COOLDOWN_MS: u64 = 3_000;

/// Window inside which identical content counts as a duplicate, in seconds
pub const DUPLICATE_WINDOW_SECS: u64 = 5 * 60;

/// Number of tags kept in the popular-tag ranking
pub const TOP_TAGS_LIMIT: usize = 10;

/// Messages shown per feed page
pub const MESSAGES_PER_PAGE: usize = 5;

/// Local key under which the anonymous identity is persisted
pub const IDENTITY_KEY: &str = "anonymous_user_id";

/// Local key holding the time of the last accepted post or reply
pub const LAST_SUBMISSION_KEY: &str = "last_submission_at";

/// Prefix of every generated identity
pub const IDENTITY_PREFIX: &str = "anon-";

/// Length of the random identity suffix
pub const IDENTITY_SUFFIX_LEN: usize = 9;

/// Character used to mask flagged words
pub const MASK_CHAR: char = '*';
