use crate::article::{Article, ArticleSnapshot, RelationKind};
use crate::parsed::ParsedItem;

// ============================================================================
// Relation Diffing
// ============================================================================

/// Which of an article's relation kinds differ from freshly parsed data.
///
/// Relation sets are normalized at the parse boundary (absent ≡ empty), so
/// plain set equality per kind is the complete rule — one comparison shared
/// by all three kinds instead of per-kind special cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationChanges {
    pub authors: bool,
    pub tags: bool,
    pub enclosures: bool,
}

impl RelationChanges {
    pub fn any(self) -> bool {
        self.authors || self.tags || self.enclosures
    }

    pub fn contains(self, kind: RelationKind) -> bool {
        match kind {
            RelationKind::Authors => self.authors,
            RelationKind::Tags => self.tags,
            RelationKind::Enclosures => self.enclosures,
        }
    }
}

/// Compare a parsed item's relation sets against the article's current
/// in-memory sets. Cheap and idempotent; merge cycles run it for every item
/// classified as existing.
pub fn diff_relations(item: &ParsedItem, article: &Article) -> RelationChanges {
    article.with_relations(|current| RelationChanges {
        authors: item.authors != current.authors,
        tags: item.tags != current.tags,
        enclosures: item.enclosures != current.enclosures,
    })
}

/// Replace the changed kinds on the article in place, leaving untouched
/// kinds alone.
pub(crate) fn apply_changes(item: &ParsedItem, article: &Article, changes: RelationChanges) {
    if !changes.any() {
        return;
    }
    article.update_relations(|relations| {
        if changes.authors {
            relations.authors = item.authors.clone();
        }
        if changes.tags {
            relations.tags = item.tags.clone();
        }
        if changes.enclosures {
            relations.enclosures = item.enclosures.clone();
        }
    });
}

// ============================================================================
// Change Sets
// ============================================================================

/// Per-kind accumulation of article snapshots whose stored relations must be
/// replaced. A kind with an empty set issues no storage write at all.
#[derive(Debug, Default)]
pub struct ChangeSets {
    authors: Vec<ArticleSnapshot>,
    tags: Vec<ArticleSnapshot>,
    enclosures: Vec<ArticleSnapshot>,
}

impl ChangeSets {
    pub fn record(&mut self, changes: RelationChanges, snapshot: &ArticleSnapshot) {
        if changes.authors {
            self.authors.push(snapshot.clone());
        }
        if changes.tags {
            self.tags.push(snapshot.clone());
        }
        if changes.enclosures {
            self.enclosures.push(snapshot.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.authors.is_empty() && self.tags.is_empty() && self.enclosures.is_empty()
    }

    /// Drain into (kind, snapshots) pairs for per-kind batched writes.
    pub fn into_kinds(self) -> [(RelationKind, Vec<ArticleSnapshot>); 3] {
        [
            (RelationKind::Authors, self.authors),
            (RelationKind::Tags, self.tags),
            (RelationKind::Enclosures, self.enclosures),
        ]
    }
}
