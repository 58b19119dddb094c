use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::article::{
    Article, ArticleId, ArticleSnapshot, ArticleStatus, FeedId, RelationKind, RelationSets,
};
use crate::diff::{apply_changes, diff_relations, ChangeSets};
use crate::parsed::{ParsedFeed, ParsedItem};
use crate::store::FeedStore;
use crate::worker::Job;

// ============================================================================
// Merge Summary
// ============================================================================

/// What one merge cycle classified and enqueued. Returned unconditionally:
/// a failed storage batch downstream does not surface here, only as the
/// absence of expected state later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Items persisted as new articles.
    pub new_articles: usize,
    /// Existing articles whose relation state changed in this cycle.
    pub updated_articles: usize,
    /// Items dropped by the visibility filter before classification.
    pub ignored: usize,
}

// ============================================================================
// Merge Engine
// ============================================================================

impl FeedStore {
    /// Reconcile one feed's freshly parsed items against stored state. The
    /// sole merge trigger, invoked once per feed per refresh.
    ///
    /// Returning is the completion signal: classification is finished and
    /// all storage operations for this cycle are queued in order — not that
    /// the background writes have been applied. Await [`FeedStore::flush`]
    /// for that.
    pub async fn update(&mut self, feed_id: &FeedId, parsed: &ParsedFeed) -> Result<MergeSummary> {
        debug_assert_eq!(
            feed_id, &parsed.feed_id,
            "parsed feed does not belong to the feed being updated"
        );

        let mut summary = MergeSummary::default();

        // Nothing parsed: complete immediately, issue no queries.
        if parsed.items.is_empty() {
            tracing::debug!(feed_id = %feed_id, "empty parsed feed, nothing to merge");
            return Ok(summary);
        }

        self.cache.sweep();
        let now = Utc::now();
        let window = self.policy.window_at(now);

        // Classification reference: every currently loaded article for this
        // feed, bypassing the display filter — a hidden article must still
        // classify as existing or it would be re-created as new.
        let existing_articles: HashMap<ArticleId, Arc<Article>> = self
            .fetch_articles_unfiltered(feed_id)
            .await?
            .into_iter()
            .map(|article| (article.article_id.clone(), article))
            .collect();

        // Bulk-load statuses for every incoming id in one batched query.
        let incoming_ids: Vec<ArticleId> = parsed.items.keys().cloned().collect();
        let statuses = self.queue.fetch_statuses(incoming_ids).await?;

        // Drop ignorable items, classify the survivors. An item with no
        // status cannot be judged ignorable yet and always passes.
        let mut new_items: Vec<&ParsedItem> = Vec::new();
        let mut existing_items: Vec<&ParsedItem> = Vec::new();
        for item in parsed.items.values() {
            match statuses.get(&item.article_id) {
                Some(status) if window.is_ignorable(status) => summary.ignored += 1,
                Some(_) => existing_items.push(item),
                None if existing_articles.contains_key(&item.article_id) => {
                    existing_items.push(item)
                }
                None => new_items.push(item),
            }
        }

        // New items: ensure default status rows, build articles, persist
        // base rows and all three relation kinds.
        let mut default_statuses = Vec::with_capacity(new_items.len());
        let mut created: Vec<Arc<Article>> = Vec::with_capacity(new_items.len());
        for item in new_items {
            let status = ArticleStatus::arriving(item.article_id.clone(), item.published, now);
            let snapshot = status.snapshot();
            let ignorable = window.is_ignorable(&snapshot);
            default_statuses.push(snapshot);

            if ignorable {
                // Publish date already past the retention cutoff: record the
                // status so later cycles drop the item at the filter step,
                // but never persist the article itself.
                summary.ignored += 1;
                continue;
            }

            created.push(Arc::new(article_from_item(feed_id, item, Arc::new(status))));
        }

        let created = self.cache.uniqued(created);
        if !default_statuses.is_empty() {
            self.queue.submit(Job::EnsureStatuses {
                statuses: default_statuses,
            });
        }
        if !created.is_empty() {
            summary.new_articles = created.len();
            let snapshots: Vec<ArticleSnapshot> =
                created.iter().map(|article| article.snapshot()).collect();
            self.queue.submit(Job::InsertArticles {
                articles: snapshots.clone(),
            });
            for kind in RelationKind::ALL {
                self.queue.submit(Job::SaveRelations {
                    kind,
                    articles: snapshots.clone(),
                });
            }
        }

        // Existing items: diff every one (cheap and idempotent), mutate the
        // live article in place, and export an immutable snapshot for the
        // worker — the original stays mutable on this side of the boundary.
        let mut changes = ChangeSets::default();
        for item in existing_items {
            let Some(article) = existing_articles.get(&item.article_id) else {
                // Status row without an article row (purged, or an earlier
                // cycle's insert batch failed). Classified existing, so it
                // is not re-created; there is nothing to diff against.
                tracing::debug!(article_id = %item.article_id, "status known but article missing, skipping diff");
                continue;
            };

            let changed = diff_relations(item, article);
            if changed.any() {
                apply_changes(item, article, changed);
                changes.record(changed, &article.snapshot());
                summary.updated_articles += 1;
            }
        }

        // Only the relation kinds that actually changed issue a write; a
        // cycle touching zero existing articles issues zero relation writes.
        for (kind, articles) in changes.into_kinds() {
            if !articles.is_empty() {
                self.queue.submit(Job::SaveRelations { kind, articles });
            }
        }

        tracing::debug!(
            feed_id = %feed_id,
            new = summary.new_articles,
            updated = summary.updated_articles,
            ignored = summary.ignored,
            "merge cycle classified and enqueued"
        );
        Ok(summary)
    }
}

fn article_from_item(feed_id: &FeedId, item: &ParsedItem, status: Arc<ArticleStatus>) -> Article {
    Article::new(
        item.article_id.clone(),
        feed_id.clone(),
        item.guid.clone(),
        item.title.as_deref().map(Arc::from),
        item.url.as_deref().map(Arc::from),
        item.summary.as_deref().map(Arc::from),
        item.body.as_deref().map(Arc::from),
        item.published,
        RelationSets {
            authors: item.authors.clone(),
            tags: item.tags.clone(),
            enclosures: item.enclosures.clone(),
        },
        status,
    )
}
