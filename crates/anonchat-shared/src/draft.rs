//! User input before it reaches the backend.
//!
//! A [`Draft`] is validated text plus parsed tags. Turning it into a
//! [`NewMessage`] is the only way to build an insert payload, and that
//! conversion always runs the profanity mask.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_CONTENT_LEN;
use crate::error::ValidationError;
use crate::identity::Identity;
use crate::profanity;
use crate::types::{MessageId, Reaction};

const FORBIDDEN_TAG_CHARS: &[char] = &[
    '!', '@', '$', '%', '^', '&', '*', '(', ')', ',', '.', '?', '"', ':', '{', '}', '|', '<',
    '>', '/', '\\', ';', '\'', '[', ']',
];

/// A lower-case category label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Trim, lower-case and validate a single tag. Returns `Ok(None)` for an
    /// empty entry so callers can skip it.
    pub fn parse(raw: &str) -> Result<Option<Self>, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed.contains('#') {
            return Err(ValidationError::HashInTag(trimmed.to_string()));
        }
        if trimmed.contains(FORBIDDEN_TAG_CHARS) {
            return Err(ValidationError::InvalidTag(trimmed.to_string()));
        }
        Ok(Some(Self(trimmed.to_lowercase())))
    }

    /// Parse a comma separated list. Duplicates keep their first position.
    pub fn parse_list(input: &str) -> Result<Vec<Self>, ValidationError> {
        let mut tags: Vec<Self> = Vec::new();
        for raw in input.split(',') {
            if let Some(tag) = Self::parse(raw)? {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        Ok(tags)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Validated message text and tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    content: String,
    tags: Vec<Tag>,
}

impl Draft {
    pub fn new(content: &str, tags: Vec<Tag>) -> Result<Self, ValidationError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let len = content.chars().count();
        if len > MAX_CONTENT_LEN {
            return Err(ValidationError::ContentTooLong {
                len,
                max: MAX_CONTENT_LEN,
            });
        }
        Ok(Self {
            content: content.to_string(),
            tags,
        })
    }

    /// Build a draft from raw form input: message text and a comma separated
    /// tag string.
    pub fn parse(content: &str, tags_input: &str) -> Result<Self, ValidationError> {
        let tags = Tag::parse_list(tags_input)?;
        Self::new(content, tags)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Content exactly as it will be persisted.
    pub fn masked_content(&self) -> String {
        profanity::mask(&self.content)
    }
}

/// Insert payload for the `messages` table. The backend assigns `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub content: String,
    #[serde(rename = "username")]
    pub author: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub likes: u32,
    pub replies: u32,
    pub reactions: Vec<Reaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
}

impl NewMessage {
    pub fn from_draft(
        draft: &Draft,
        author: &Identity,
        created_at: DateTime<Utc>,
        parent_id: Option<MessageId>,
    ) -> Self {
        Self {
            content: draft.masked_content(),
            author: author.as_str().to_string(),
            created_at,
            tags: draft.tags.iter().map(|t| t.as_str().to_string()).collect(),
            likes: 0,
            replies: 0,
            reactions: Vec::new(),
            parent_id,
        }
    }
}
