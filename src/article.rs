use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

// ============================================================================
// Identifiers
// ============================================================================

/// Stable feed identifier (typically the feed URL or a registry-assigned key).
///
/// Uses `Arc<str>` for cheap cloning — feed ids travel with every article,
/// every snapshot, and every storage job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(Arc<str>);

impl FeedId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable article identifier: hex SHA-256 over `feed_id | source-unique-id`.
///
/// Derivation makes the id stable across refreshes and unique across feeds
/// even when two feeds reuse the same guid. Primary key for all
/// article-scoped rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleId(Arc<str>);

impl ArticleId {
    /// Derive the id for an item of `feed_id` with the given source unique id.
    pub fn derived(feed_id: &FeedId, unique_id: &str) -> Self {
        let hash = Sha256::digest(format!("{}|{}", feed_id.as_str(), unique_id).as_bytes());
        Self(Arc::from(format!("{:x}", hash)))
    }

    /// Wrap an already-derived id (e.g. read back from storage).
    pub fn from_raw(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Relation Entities
// ============================================================================

/// One of the three many-to-many relation kinds an article carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Authors,
    Tags,
    Enclosures,
}

impl RelationKind {
    pub const ALL: [RelationKind; 3] = [
        RelationKind::Authors,
        RelationKind::Tags,
        RelationKind::Enclosures,
    ];
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationKind::Authors => "authors",
            RelationKind::Tags => "tags",
            RelationKind::Enclosures => "enclosures",
        })
    }
}

/// Article author. The id is derived from the payload fields, so two authors
/// with identical name/url/email are the same set member everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Author {
    pub author_id: Arc<str>,
    pub name: Option<Arc<str>>,
    pub url: Option<Arc<str>>,
    pub email: Option<Arc<str>>,
}

impl Author {
    /// Build an author, deriving its id. Returns `None` when every payload
    /// field is empty — an all-blank author carries no information.
    pub fn new(
        name: Option<&str>,
        url: Option<&str>,
        email: Option<&str>,
    ) -> Option<Self> {
        let name = none_if_blank(name);
        let url = none_if_blank(url);
        let email = none_if_blank(email);
        if name.is_none() && url.is_none() && email.is_none() {
            return None;
        }

        let input = format!(
            "{}|{}|{}",
            name.as_deref().unwrap_or(""),
            url.as_deref().unwrap_or(""),
            email.as_deref().unwrap_or("")
        );
        let hash = Sha256::digest(input.as_bytes());

        Some(Self {
            author_id: Arc::from(format!("{:x}", hash)),
            name,
            url,
            email,
        })
    }

    /// Rebuild from stored columns, trusting the persisted id.
    pub(crate) fn from_stored(
        author_id: String,
        name: Option<String>,
        url: Option<String>,
        email: Option<String>,
    ) -> Self {
        Self {
            author_id: Arc::from(author_id),
            name: name.map(Arc::from),
            url: url.map(Arc::from),
            email: email.map(Arc::from),
        }
    }
}

fn none_if_blank(value: Option<&str>) -> Option<Arc<str>> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Arc::from)
}

/// Article tag. The name is its own relation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub Arc<str>);

impl Tag {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Media enclosure attached to an article. The url is its own relation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Enclosure {
    pub url: Arc<str>,
    pub mime_type: Option<Arc<str>>,
    pub size_bytes: Option<i64>,
}

/// The three in-memory relation sets of one article.
///
/// Absence of relation data is represented as the empty set — normalization
/// happens at the parse boundary, so set comparison is the whole diff rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSets {
    pub authors: HashSet<Author>,
    pub tags: HashSet<Tag>,
    pub enclosures: HashSet<Enclosure>,
}

// ============================================================================
// Article Status
// ============================================================================

/// Selects one of the per-article status flags for `mark` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFlag {
    Read,
    Starred,
    UserDeleted,
}

impl StatusFlag {
    /// Column name in the statuses table.
    pub(crate) fn column(self) -> &'static str {
        match self {
            StatusFlag::Read => "read",
            StatusFlag::Starred => "starred",
            StatusFlag::UserDeleted => "user_deleted",
        }
    }
}

/// Per-article status flags plus arrival timestamp. One-to-one with
/// `ArticleId`; a status can exist in storage before any article content is
/// known.
///
/// Flags are atomics so that snapshots taken on the coordinating context can
/// be read without locking; all mutation still goes through `FeedStore`
/// methods taking `&mut self`, which is what serializes writers.
#[derive(Debug)]
pub struct ArticleStatus {
    pub article_id: ArticleId,
    read: AtomicBool,
    starred: AtomicBool,
    user_deleted: AtomicBool,
    pub date_arrived: DateTime<Utc>,
}

impl ArticleStatus {
    pub fn new(
        article_id: ArticleId,
        read: bool,
        starred: bool,
        user_deleted: bool,
        date_arrived: DateTime<Utc>,
    ) -> Self {
        Self {
            article_id,
            read: AtomicBool::new(read),
            starred: AtomicBool::new(starred),
            user_deleted: AtomicBool::new(user_deleted),
            date_arrived,
        }
    }

    /// Default status for a just-arrived item: unread, unstarred, not
    /// deleted, arrival set to the parsed publish time when present, else
    /// `now`.
    pub fn arriving(
        article_id: ArticleId,
        published: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(article_id, false, false, false, published.unwrap_or(now))
    }

    pub fn read(&self) -> bool {
        self.read.load(Ordering::Relaxed)
    }

    pub fn starred(&self) -> bool {
        self.starred.load(Ordering::Relaxed)
    }

    pub fn user_deleted(&self) -> bool {
        self.user_deleted.load(Ordering::Relaxed)
    }

    pub fn flag(&self, flag: StatusFlag) -> bool {
        match flag {
            StatusFlag::Read => self.read(),
            StatusFlag::Starred => self.starred(),
            StatusFlag::UserDeleted => self.user_deleted(),
        }
    }

    /// Set one flag, returning whether the stored value actually changed.
    /// Callers use the return to skip redundant storage writes.
    pub(crate) fn set_flag(&self, flag: StatusFlag, value: bool) -> bool {
        let cell = match flag {
            StatusFlag::Read => &self.read,
            StatusFlag::Starred => &self.starred,
            StatusFlag::UserDeleted => &self.user_deleted,
        };
        cell.swap(value, Ordering::Relaxed) != value
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            article_id: self.article_id.clone(),
            read: self.read(),
            starred: self.starred(),
            user_deleted: self.user_deleted(),
            date_arrived: self.date_arrived,
        }
    }
}

/// Plain owned copy of an `ArticleStatus`, safe to hand to the storage
/// worker. Also the value type returned by bulk status loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub article_id: ArticleId,
    pub read: bool,
    pub starred: bool,
    pub user_deleted: bool,
    pub date_arrived: DateTime<Utc>,
}

// ============================================================================
// Article
// ============================================================================

/// One live article. At most one instance exists per `ArticleId` within the
/// coordinating context while externally referenced (see `IdentityCache`).
///
/// Content fields are fixed at construction; only the relation sets mutate
/// in place when a merge cycle observes changed feed data. Every article
/// carries exactly one status — the field is not optional, so the
/// one-status invariant holds by construction.
#[derive(Debug)]
pub struct Article {
    pub article_id: ArticleId,
    pub feed_id: FeedId,
    /// Source-provided unique id the `article_id` was derived from.
    pub guid: Arc<str>,
    pub title: Option<Arc<str>>,
    pub url: Option<Arc<str>>,
    pub summary: Option<Arc<str>>,
    pub body: Option<Arc<str>>,
    pub published: Option<DateTime<Utc>>,
    relations: RwLock<RelationSets>,
    pub status: Arc<ArticleStatus>,
}

impl Article {
    pub fn new(
        article_id: ArticleId,
        feed_id: FeedId,
        guid: Arc<str>,
        title: Option<Arc<str>>,
        url: Option<Arc<str>>,
        summary: Option<Arc<str>>,
        body: Option<Arc<str>>,
        published: Option<DateTime<Utc>>,
        relations: RelationSets,
        status: Arc<ArticleStatus>,
    ) -> Self {
        Self {
            article_id,
            feed_id,
            guid,
            title,
            url,
            summary,
            body,
            published,
            relations: RwLock::new(relations),
            status,
        }
    }

    /// Run `f` against the current relation sets without cloning them.
    pub fn with_relations<T>(&self, f: impl FnOnce(&RelationSets) -> T) -> T {
        f(&self.relations.read().expect("relations lock poisoned"))
    }

    /// Mutate the relation sets in place. Crate-internal: only merge cycles
    /// running on the coordinating context may call this.
    pub(crate) fn update_relations(&self, f: impl FnOnce(&mut RelationSets)) {
        f(&mut self.relations.write().expect("relations lock poisoned"));
    }

    pub fn authors(&self) -> HashSet<Author> {
        self.with_relations(|r| r.authors.clone())
    }

    pub fn tags(&self) -> HashSet<Tag> {
        self.with_relations(|r| r.tags.clone())
    }

    pub fn enclosures(&self) -> HashSet<Enclosure> {
        self.with_relations(|r| r.enclosures.clone())
    }

    /// Export an independent immutable copy for the storage worker. The
    /// coordinating context may keep mutating this article afterwards; the
    /// worker only ever sees the snapshot.
    pub fn snapshot(&self) -> ArticleSnapshot {
        let relations = self.with_relations(RelationSets::clone);
        ArticleSnapshot {
            article_id: self.article_id.clone(),
            feed_id: self.feed_id.clone(),
            guid: self.guid.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
            summary: self.summary.clone(),
            body: self.body.clone(),
            published: self.published,
            authors: relations.authors.into_iter().collect(),
            tags: relations.tags.into_iter().collect(),
            enclosures: relations.enclosures.into_iter().collect(),
            status: self.status.snapshot(),
        }
    }
}

/// Fully owned, immutable copy of an article at a point in time. The only
/// article representation that crosses into the worker context.
#[derive(Debug, Clone)]
pub struct ArticleSnapshot {
    pub article_id: ArticleId,
    pub feed_id: FeedId,
    pub guid: Arc<str>,
    pub title: Option<Arc<str>>,
    pub url: Option<Arc<str>>,
    pub summary: Option<Arc<str>>,
    pub body: Option<Arc<str>>,
    pub published: Option<DateTime<Utc>>,
    pub authors: Vec<Author>,
    pub tags: Vec<Tag>,
    pub enclosures: Vec<Enclosure>,
    pub status: StatusSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> FeedId {
        FeedId::new("https://example.com/feed.xml")
    }

    #[test]
    fn test_article_id_stable_across_calls() {
        let a = ArticleId::derived(&feed(), "guid-1");
        let b = ArticleId::derived(&feed(), "guid-1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_article_id_distinct_per_feed() {
        let other = FeedId::new("https://other.example.com/feed.xml");
        let a = ArticleId::derived(&feed(), "guid-1");
        let b = ArticleId::derived(&other, "guid-1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_author_blank_fields_rejected() {
        assert!(Author::new(None, None, None).is_none());
        assert!(Author::new(Some("  "), Some(""), None).is_none());
    }

    #[test]
    fn test_author_id_derived_from_payload() {
        let a = Author::new(Some("Jane Doe"), None, None).unwrap();
        let b = Author::new(Some("Jane Doe"), None, None).unwrap();
        let c = Author::new(Some("Jane Doe"), Some("https://jane.example"), None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.author_id, c.author_id);
    }

    #[test]
    fn test_set_flag_reports_change() {
        let status = ArticleStatus::arriving(
            ArticleId::derived(&feed(), "g"),
            None,
            chrono::Utc::now(),
        );
        assert!(status.set_flag(StatusFlag::Read, true));
        assert!(!status.set_flag(StatusFlag::Read, true));
        assert!(status.read());
        assert!(status.set_flag(StatusFlag::Read, false));
        assert!(!status.read());
    }

    #[test]
    fn test_arriving_prefers_publish_time() {
        let now = chrono::Utc::now();
        let published = now - chrono::Duration::days(3);
        let id = ArticleId::derived(&feed(), "g");

        let status = ArticleStatus::arriving(id.clone(), Some(published), now);
        assert_eq!(status.date_arrived, published);

        let status = ArticleStatus::arriving(id, None, now);
        assert_eq!(status.date_arrived, now);
    }
}
