//! Popular-tag aggregation.

use std::collections::HashMap;

use serde::Serialize;

use anonchat_shared::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Count how many of `messages` carry each tag and return the `limit` most
/// common, highest count first. Ties keep the order in which the tags were
/// first seen. A tag repeated within one message counts once; empty tags
/// are ignored.
pub fn compute_top_tags<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    limit: usize,
) -> Vec<TagCount> {
    let mut ranked: Vec<TagCount> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();

    for message in messages {
        for (i, tag) in message.tags.iter().enumerate() {
            if tag.is_empty() || message.tags[..i].contains(tag) {
                continue;
            }
            match index.get(tag.as_str()) {
                Some(&slot) => ranked[slot].count += 1,
                None => {
                    index.insert(tag.as_str(), ranked.len());
                    ranked.push(TagCount {
                        tag: tag.clone(),
                        count: 1,
                    });
                }
            }
        }
    }

    // Stable sort keeps first-seen order among equal counts.
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use anonchat_shared::MessageId;
    use chrono::Utc;

    fn tagged(tags: &[&str]) -> Message {
        Message {
            id: MessageId::generate(),
            content: "x".into(),
            author: "anon-x".into(),
            created_at: Utc::now(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            like_count: 0,
            reply_count: 0,
            reactions: vec![],
            parent_id: None,
        }
    }

    fn pairs(ranked: &[TagCount]) -> Vec<(&str, usize)> {
        ranked.iter().map(|t| (t.tag.as_str(), t.count)).collect()
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let rows = vec![tagged(&["a", "b"]), tagged(&["a"]), tagged(&["b", "c"])];
        let ranked = compute_top_tags(&rows, 10);
        assert_eq!(pairs(&ranked), vec![("a", 2), ("b", 2), ("c", 1)]);
    }

    #[test]
    fn test_higher_count_wins_over_first_seen() {
        let rows = vec![tagged(&["x"]), tagged(&["y"]), tagged(&["y"])];
        assert_eq!(pairs(&compute_top_tags(&rows, 10)), vec![("y", 2), ("x", 1)]);
    }

    #[test]
    fn test_truncates_and_skips_empty() {
        let rows = vec![tagged(&["a", "", "a"]), tagged(&["b"]), tagged(&["c"])];
        let ranked = compute_top_tags(&rows, 2);
        assert_eq!(pairs(&ranked), vec![("a", 1), ("b", 1)]);
    }
}
