//! Search, tag filter, sort order and pagination over the top-level feed.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use anonchat_shared::constants::MESSAGES_PER_PAGE;
use anonchat_shared::Message;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    /// Most liked first.
    Popular,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
            SortOrder::Popular => "popular",
        };
        f.write_str(name)
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            "popular" => Ok(SortOrder::Popular),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    /// Case-insensitive substring of the content. Empty matches everything.
    pub search: String,
    pub tag: Option<String>,
    pub sort: SortOrder,
    /// 1-based; clamped into range.
    pub page: usize,
    pub per_page: usize,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            search: String::new(),
            tag: None,
            sort: SortOrder::default(),
            page: 1,
            per_page: MESSAGES_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub items: Vec<Message>,
    /// The page actually returned after clamping.
    pub page: usize,
    pub total_pages: usize,
    pub total_matches: usize,
}

impl FeedQuery {
    pub fn matches(&self, message: &Message) -> bool {
        let search = self.search.trim().to_lowercase();
        let content_ok = search.is_empty() || message.content.to_lowercase().contains(&search);
        let tag_ok = match &self.tag {
            Some(tag) => message.has_tag(&tag.to_lowercase()),
            None => true,
        };
        content_ok && tag_ok
    }

    /// Filter and sort without paginating.
    pub fn filter_sorted(&self, messages: &[Message]) -> Vec<Message> {
        let mut hits: Vec<Message> = messages
            .iter()
            .filter(|m| self.matches(m))
            .cloned()
            .collect();
        // All sorts are stable.
        match self.sort {
            SortOrder::Newest => hits.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::Oldest => hits.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortOrder::Popular => hits.sort_by(|a, b| b.like_count.cmp(&a.like_count)),
        }
        hits
    }

    pub fn run(&self, messages: &[Message]) -> FeedPage {
        let hits = self.filter_sorted(messages);
        let per_page = self.per_page.max(1);
        let total_matches = hits.len();
        let total_pages = total_matches.div_ceil(per_page);
        let page = self.page.clamp(1, total_pages.max(1));

        let items = hits
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        FeedPage {
            items,
            page,
            total_pages,
            total_matches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anonchat_shared::MessageId;
    use chrono::{Duration, TimeZone, Utc};

    fn msg(content: &str, tags: &[&str], at: i64, likes: u32) -> Message {
        Message {
            id: MessageId::generate(),
            content: content.into(),
            author: "anon-x".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(at),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            like_count: likes,
            reply_count: 0,
            reactions: vec![],
            parent_id: None,
        }
    }

    fn contents(rows: &[Message]) -> Vec<&str> {
        rows.iter().map(|m| m.content.as_str()).collect()
    }

    fn sample() -> Vec<Message> {
        vec![
            msg("Hello world", &["news"], 3, 1),
            msg("say HELLO", &["misc"], 2, 5),
            msg("hello again", &["news", "misc"], 1, 5),
            msg("nothing here", &["news"], 4, 9),
        ]
    }

    #[test]
    fn test_search_and_tag_both_apply() {
        let query = FeedQuery {
            search: "hello".into(),
            tag: Some("news".into()),
            ..Default::default()
        };
        let hits = query.filter_sorted(&sample());
        assert_eq!(contents(&hits), vec!["Hello world", "hello again"]);
    }

    #[test]
    fn test_sort_orders() {
        let rows = sample();
        let mut query = FeedQuery::default();

        query.sort = SortOrder::Oldest;
        assert_eq!(
            contents(&query.filter_sorted(&rows)),
            vec!["hello again", "say HELLO", "Hello world", "nothing here"]
        );

        // Ties on likes keep input order.
        query.sort = SortOrder::Popular;
        assert_eq!(
            contents(&query.filter_sorted(&rows)),
            vec!["nothing here", "say HELLO", "hello again", "Hello world"]
        );
    }

    #[test]
    fn test_pagination_clamps() {
        let rows: Vec<_> = (0..12).map(|i| msg(&format!("m{i}"), &[], i, 0)).collect();
        let mut query = FeedQuery::default();

        let first = query.run(&rows);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.total_matches, 12);
        assert_eq!(contents(&first.items), vec!["m11", "m10", "m9", "m8", "m7"]);

        query.page = 99;
        let last = query.run(&rows);
        assert_eq!(last.page, 3);
        assert_eq!(contents(&last.items), vec!["m1", "m0"]);

        query.search = "zzz".into();
        let empty = query.run(&rows);
        assert_eq!((empty.page, empty.total_pages), (1, 0));
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_sort_order_parses() {
        assert_eq!("Popular".parse::<SortOrder>(), Ok(SortOrder::Popular));
        assert!("loudest".parse::<SortOrder>().is_err());
        assert_eq!(SortOrder::Oldest.to_string(), "oldest");
    }
}
