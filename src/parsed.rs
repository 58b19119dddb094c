use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};

use crate::article::{ArticleId, Author, Enclosure, FeedId, Tag};

// ============================================================================
// Parsed Input
// ============================================================================

/// One freshly parsed feed entry, consumed once per merge cycle and never
/// persisted directly.
///
/// Relation sets are normalized at this boundary: relation data the feed did
/// not carry becomes the empty set, so "absent" and "present but empty" are
/// indistinguishable everywhere downstream. Diff logic and new-item
/// classification therefore apply one consistent rule.
#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub article_id: ArticleId,
    /// Source unique id (entry guid, or synthesized when the feed omits one).
    pub guid: Arc<str>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub authors: HashSet<Author>,
    pub tags: HashSet<Tag>,
    pub enclosures: HashSet<Enclosure>,
}

/// Everything parsed out of one feed document, keyed by derived article id.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub feed_id: FeedId,
    pub items: HashMap<ArticleId, ParsedItem>,
}

impl ParsedFeed {
    /// Parse raw feed bytes (RSS/Atom/JSON Feed via feed-rs) into merge input.
    pub fn parse(feed_id: FeedId, bytes: &[u8]) -> Result<Self> {
        let document = parser::parse(bytes)?;
        Ok(Self::from_document(feed_id, document))
    }

    /// Map an already-parsed feed-rs document into merge input.
    pub fn from_document(feed_id: FeedId, document: feed_rs::model::Feed) -> Self {
        let mut items = HashMap::with_capacity(document.entries.len());

        for entry in document.entries {
            let item = parsed_item(&feed_id, entry);
            // Duplicate guids within one document collapse to the last
            // occurrence; the id is the identity.
            items.insert(item.article_id.clone(), item);
        }

        Self { feed_id, items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn parsed_item(feed_id: &FeedId, entry: feed_rs::model::Entry) -> ParsedItem {
    let url = entry.links.first().map(|l| l.href.clone());
    let published = entry.published.or(entry.updated);
    let title = entry.title.map(|t| t.content);
    let summary = entry.summary.map(|s| s.content);
    let body = entry.content.and_then(|c| c.body);

    let existing_id = if entry.id.trim().is_empty() {
        None
    } else {
        Some(entry.id.as_str())
    };
    let guid = source_guid(existing_id, url.as_deref(), title.as_deref(), published);
    let article_id = ArticleId::derived(feed_id, &guid);

    let authors = entry
        .authors
        .iter()
        .filter_map(|p| {
            Author::new(
                Some(p.name.as_str()),
                p.uri.as_deref(),
                p.email.as_deref(),
            )
        })
        .collect();

    let tags = entry
        .categories
        .iter()
        .filter_map(|c| {
            let name = c.label.as_deref().unwrap_or(c.term.as_str()).trim();
            (!name.is_empty()).then(|| Tag::new(name))
        })
        .collect();

    let enclosures = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| {
            let url = c.url.as_ref()?;
            Some(Enclosure {
                url: Arc::from(url.to_string()),
                mime_type: c.content_type.as_ref().map(|t| Arc::from(t.to_string())),
                size_bytes: c.size.map(|s| s as i64),
            })
        })
        .collect();

    ParsedItem {
        article_id,
        guid: Arc::from(guid),
        title,
        url,
        summary,
        body,
        published,
        authors,
        tags,
        enclosures,
    }
}

/// Use the feed's own entry id when present; otherwise synthesize a stable
/// one by hashing url|title|published (a feed that omits guids still gets
/// stable identity across refreshes).
fn source_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: Option<&str>,
    published: Option<DateTime<Utc>>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title.unwrap_or(""),
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Feed</title>
  <id>urn:example:feed</id>
  <updated>2024-01-02T00:00:00Z</updated>
  <entry>
    <id>urn:example:one</id>
    <title>First Post</title>
    <link href="https://example.com/one"/>
    <updated>2024-01-01T00:00:00Z</updated>
    <summary>First summary</summary>
    <author><name>Jane Doe</name></author>
    <category term="rust"/>
    <category term="feeds"/>
  </entry>
  <entry>
    <id>urn:example:two</id>
    <title>Second Post</title>
    <link href="https://example.com/two"/>
    <updated>2024-01-02T00:00:00Z</updated>
  </entry>
</feed>"#;

    fn feed_id() -> FeedId {
        FeedId::new("https://example.com/feed.xml")
    }

    #[test]
    fn test_parse_maps_entries() {
        let parsed = ParsedFeed::parse(feed_id(), ATOM.as_bytes()).unwrap();
        assert_eq!(parsed.items.len(), 2);

        let first = parsed
            .items
            .values()
            .find(|i| &*i.guid == "urn:example:one")
            .unwrap();
        assert_eq!(first.title.as_deref(), Some("First Post"));
        assert_eq!(first.url.as_deref(), Some("https://example.com/one"));
        assert_eq!(first.authors.len(), 1);
        assert_eq!(first.tags.len(), 2);
        assert!(first.tags.contains(&Tag::new("rust")));
    }

    #[test]
    fn test_absent_relations_normalize_to_empty_sets() {
        let parsed = ParsedFeed::parse(feed_id(), ATOM.as_bytes()).unwrap();
        let second = parsed
            .items
            .values()
            .find(|i| &*i.guid == "urn:example:two")
            .unwrap();

        assert!(second.authors.is_empty());
        assert!(second.tags.is_empty());
        assert!(second.enclosures.is_empty());
    }

    #[test]
    fn test_article_ids_derived_from_feed_and_guid() {
        let parsed = ParsedFeed::parse(feed_id(), ATOM.as_bytes()).unwrap();
        for item in parsed.items.values() {
            assert_eq!(
                item.article_id,
                ArticleId::derived(&feed_id(), &item.guid)
            );
        }

        let other = ParsedFeed::parse(
            FeedId::new("https://other.example.com/feed.xml"),
            ATOM.as_bytes(),
        )
        .unwrap();
        for id in other.items.keys() {
            assert!(!parsed.items.contains_key(id));
        }
    }

    #[test]
    fn test_synthesized_guid_is_stable() {
        let a = source_guid(None, Some("https://example.com/x"), Some("Title"), None);
        let b = source_guid(None, Some("https://example.com/x"), Some("Title"), None);
        assert_eq!(a, b);

        let c = source_guid(Some("  real-guid  "), None, None, None);
        assert_eq!(c, "real-guid");
    }
}
