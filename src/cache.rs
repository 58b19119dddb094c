use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::article::{Article, ArticleId};

// ============================================================================
// Identity Cache
// ============================================================================

/// Deduplicating registry mapping article id to the single live `Article`
/// instance for that id.
///
/// Entries are weak: the cache never extends an article's lifetime. Once the
/// last external `Arc` is dropped, the entry is dead and a later candidate
/// for the same id becomes the new canonical instance. Dead entries are
/// reclaimed by `sweep`, which callers run once per merge cycle.
///
/// Single-context only. The owning `FeedStore` exposes it behind `&mut self`
/// methods, which is what serializes access.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<ArticleId, Weak<Article>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitute each candidate with the already-live instance for its id
    /// when one exists; otherwise register the candidate and return it.
    ///
    /// No two distinct instances in the result share an article id: a later
    /// candidate duplicating an earlier one's id resolves to the earlier
    /// (now registered) instance.
    pub fn uniqued(&mut self, candidates: Vec<Arc<Article>>) -> Vec<Arc<Article>> {
        candidates
            .into_iter()
            .map(|candidate| self.unique(candidate))
            .collect()
    }

    /// Single-candidate form of `uniqued`.
    pub fn unique(&mut self, candidate: Arc<Article>) -> Arc<Article> {
        match self.entries.entry(candidate.article_id.clone()) {
            Entry::Occupied(mut entry) => {
                if let Some(live) = entry.get().upgrade() {
                    return live;
                }
                // Previous instance fully released; the candidate takes over.
                entry.insert(Arc::downgrade(&candidate));
                candidate
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::downgrade(&candidate));
                candidate
            }
        }
    }

    /// The live instance for an id, if any external owner still holds it.
    pub fn get(&self, article_id: &ArticleId) -> Option<Arc<Article>> {
        self.entries.get(article_id).and_then(Weak::upgrade)
    }

    /// Drop entries whose article has been released.
    pub fn sweep(&mut self) {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
    }

    /// Number of registered entries, live or not (bounded by `sweep`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ArticleStatus, FeedId, RelationSets};

    fn article(guid: &str) -> Arc<Article> {
        let feed_id = FeedId::new("https://example.com/feed.xml");
        let article_id = ArticleId::derived(&feed_id, guid);
        let status = Arc::new(ArticleStatus::arriving(
            article_id.clone(),
            None,
            chrono::Utc::now(),
        ));
        Arc::new(Article::new(
            article_id,
            feed_id,
            Arc::from(guid),
            Some(Arc::from("Title")),
            None,
            None,
            None,
            None,
            RelationSets::default(),
            status,
        ))
    }

    #[test]
    fn test_first_candidate_registers() {
        let mut cache = IdentityCache::new();
        let a = article("one");
        let out = cache.unique(a.clone());
        assert!(Arc::ptr_eq(&a, &out));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_live_instance_substituted_for_candidate() {
        let mut cache = IdentityCache::new();
        let first = cache.unique(article("one"));
        let second = cache.unique(article("one"));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_duplicate_ids_within_one_batch_collapse() {
        let mut cache = IdentityCache::new();
        let out = cache.uniqued(vec![article("one"), article("one"), article("two")]);
        assert_eq!(out.len(), 3);
        assert!(Arc::ptr_eq(&out[0], &out[1]));
        assert!(!Arc::ptr_eq(&out[0], &out[2]));
    }

    #[test]
    fn test_cache_does_not_extend_lifetime() {
        let mut cache = IdentityCache::new();
        let first = cache.unique(article("one"));
        let first_ptr = Arc::as_ptr(&first);
        drop(first);

        // The entry is dead; a new candidate becomes canonical.
        let replacement = cache.unique(article("one"));
        assert_ne!(first_ptr, Arc::as_ptr(&replacement));
    }

    #[test]
    fn test_sweep_drops_dead_entries() {
        let mut cache = IdentityCache::new();
        let kept = cache.unique(article("kept"));
        let dropped = cache.unique(article("dropped"));
        drop(dropped);

        cache.sweep();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&kept.article_id).is_some());
    }
}
