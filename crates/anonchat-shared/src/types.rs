use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque row identifier. The backend assigns it; the client only checks
/// that it has the hyphenated UUID v4 shape before using it in a call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id, used by backends that assign ids themselves.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `xxxxxxxx-xxxx-4xxx-[89ab]xxx-xxxxxxxxxxxx`, any letter case.
    pub fn is_well_formed(&self) -> bool {
        if self.0.len() != 36 {
            return false;
        }
        match Uuid::try_parse(&self.0) {
            Ok(uuid) => {
                uuid.get_version_num() == 4 && uuid.get_variant() == uuid::Variant::RFC4122
            }
            Err(_) => false,
        }
    }

    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
}

/// One row of the `messages` table: a top-level post or a reply.
///
/// Field names on the wire follow the backend columns (`username`,
/// `timestamp`, `likes`, `replies`). The legacy `liked_by` column is not
/// modelled; like state lives in `message_likes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    #[serde(rename = "username")]
    pub author: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(rename = "likes", default, deserialize_with = "null_as_default")]
    pub like_count: u32,
    #[serde(rename = "replies", default, deserialize_with = "null_as_default")]
    pub reply_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
}

impl Message {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Bucket reply rows by parent, each bucket ordered oldest first.
pub fn group_replies(rows: Vec<Message>) -> HashMap<MessageId, Vec<Message>> {
    let mut map: HashMap<MessageId, Vec<Message>> = HashMap::new();
    for row in rows {
        if let Some(parent) = row.parent_id.clone() {
            map.entry(parent).or_default().push(row);
        }
    }
    for bucket in map.values_mut() {
        bucket.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }
    map
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// Identity of a row as carried by a DELETE event's old record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageKey {
    pub id: MessageId,
    #[serde(default)]
    pub parent_id: Option<MessageId>,
}

/// Partial row carried by an UPDATE event. Absent fields leave the local
/// copy untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePatch {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "username", default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(rename = "likes", default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u32>,
    #[serde(rename = "replies", default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<Reaction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
}

impl MessagePatch {
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            content: None,
            author: None,
            created_at: None,
            tags: None,
            like_count: None,
            reply_count: None,
            reactions: None,
            parent_id: None,
        }
    }

    /// Merge the present fields into `message`. `id`, `parent_id` and
    /// `created_at` are immutable once assigned and are never overwritten.
    pub fn apply_to(&self, message: &mut Message) {
        if let Some(ref content) = self.content {
            message.content = content.clone();
        }
        if let Some(ref author) = self.author {
            message.author = author.clone();
        }
        if let Some(ref tags) = self.tags {
            message.tags = tags.clone();
        }
        if let Some(likes) = self.like_count {
            message.like_count = likes;
        }
        if let Some(replies) = self.reply_count {
            message.reply_count = replies;
        }
        if let Some(ref reactions) = self.reactions {
            message.reactions = reactions.clone();
        }
    }

    /// Content fingerprint used to drop re-delivered identical updates.
    pub fn fingerprint(&self) -> blake3::Hash {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes)
    }
}

impl From<Message> for MessagePatch {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            content: Some(m.content),
            author: Some(m.author),
            created_at: Some(m.created_at),
            tags: Some(m.tags),
            like_count: Some(m.like_count),
            reply_count: Some(m.reply_count),
            reactions: Some(m.reactions),
            parent_id: m.parent_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change notification on the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Message),
    Update(MessagePatch),
    Delete(MessageKey),
    /// The stream lost continuity (reconnect, lagging receiver); local
    /// state must be reloaded from a fresh snapshot.
    Resync,
}

impl ChangeEvent {
    pub fn kind(&self) -> Option<ChangeKind> {
        match self {
            ChangeEvent::Insert(_) => Some(ChangeKind::Insert),
            ChangeEvent::Update(_) => Some(ChangeKind::Update),
            ChangeEvent::Delete(_) => Some(ChangeKind::Delete),
            ChangeEvent::Resync => None,
        }
    }

    pub fn row_id(&self) -> Option<&MessageId> {
        match self {
            ChangeEvent::Insert(m) => Some(&m.id),
            ChangeEvent::Update(p) => Some(&p.id),
            ChangeEvent::Delete(k) => Some(&k.id),
            ChangeEvent::Resync => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_well_formed_ids() {
        assert!(MessageId::new("3f1c2a9e-7b4d-4c1e-9a2b-5d6e7f8a9b0c").is_well_formed());
        assert!(MessageId::new("3F1C2A9E-7B4D-4C1E-9A2B-5D6E7F8A9B0C").is_well_formed());
        assert!(MessageId::generate().is_well_formed());

        // version 1
        assert!(!MessageId::new("3f1c2a9e-7b4d-1c1e-9a2b-5d6e7f8a9b0c").is_well_formed());
        // wrong variant nibble
        assert!(!MessageId::new("3f1c2a9e-7b4d-4c1e-1a2b-5d6e7f8a9b0c").is_well_formed());
        // simple form without hyphens
        assert!(!MessageId::new("3f1c2a9e7b4d4c1e9a2b5d6e7f8a9b0c").is_well_formed());
        assert!(!MessageId::new("anon-123").is_well_formed());
    }

    #[test]
    fn test_decode_row_with_nulls() {
        let json = r#"{
            "id": "3f1c2a9e-7b4d-4c1e-9a2b-5d6e7f8a9b0c",
            "content": "halo",
            "username": "anon-abc",
            "timestamp": "2024-05-01T10:00:00+00:00",
            "tags": null,
            "likes": 3,
            "replies": null,
            "reactions": null,
            "parent_id": null,
            "liked_by": ["anon-x"]
        }"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert!(m.tags.is_empty());
        assert_eq!(m.like_count, 3);
        assert_eq!(m.reply_count, 0);
        assert!(m.parent_id.is_none());
        assert_eq!(
            m.created_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_patch_preserves_absent_fields() {
        let mut m = Message {
            id: MessageId::generate(),
            content: "hello".into(),
            author: "anon-a".into(),
            created_at: Utc::now(),
            tags: vec!["news".into()],
            like_count: 1,
            reply_count: 2,
            reactions: vec![],
            parent_id: None,
        };
        let mut patch = MessagePatch::new(m.id.clone());
        patch.like_count = Some(7);
        patch.apply_to(&mut m);

        assert_eq!(m.like_count, 7);
        assert_eq!(m.reply_count, 2);
        assert_eq!(m.content, "hello");
        assert_eq!(m.tags, vec!["news".to_string()]);
    }

    #[test]
    fn test_patch_keeps_creation_time() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut m = Message {
            id: MessageId::generate(),
            content: "hello".into(),
            author: "anon-a".into(),
            created_at: created,
            tags: vec![],
            like_count: 0,
            reply_count: 0,
            reactions: vec![],
            parent_id: None,
        };
        let mut patch = MessagePatch::new(m.id.clone());
        patch.created_at = Some(created + chrono::Duration::hours(3));
        patch.content = Some("edited".into());
        patch.apply_to(&mut m);

        assert_eq!(m.created_at, created);
        assert_eq!(m.content, "edited");
    }

    #[test]
    fn test_group_replies_orders_oldest_first() {
        let parent = MessageId::generate();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let reply = |secs: i64| Message {
            id: MessageId::generate(),
            content: format!("r{secs}"),
            author: "anon-a".into(),
            created_at: base + chrono::Duration::seconds(secs),
            tags: vec![],
            like_count: 0,
            reply_count: 0,
            reactions: vec![],
            parent_id: Some(parent.clone()),
        };
        let grouped = group_replies(vec![reply(30), reply(10), reply(20)]);
        let contents: Vec<_> = grouped[&parent].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["r10", "r20", "r30"]);
    }

    #[test]
    fn test_identical_patches_share_fingerprint() {
        let id = MessageId::generate();
        let mut a = MessagePatch::new(id.clone());
        a.like_count = Some(4);
        let b = a.clone();
        let mut c = a.clone();
        c.like_count = Some(5);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
