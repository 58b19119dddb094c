use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::article::{Article, ArticleStatus, FeedId};
use crate::storage::StoredArticle;
use crate::store::FeedStore;

// ============================================================================
// Query Service
// ============================================================================

impl FeedStore {
    /// Articles of one feed that pass the display filter (not user-deleted,
    /// and starred or newer than the display cutoff), routed through the
    /// identity cache: a second fetch while the first result is still held
    /// returns the same instances.
    pub async fn fetch_articles(&mut self, feed_id: &FeedId) -> Result<Vec<Arc<Article>>> {
        let window = self.policy.window_at(Utc::now());
        let stored = self
            .queue
            .fetch_articles(feed_id.clone(), Some(window.display_cutoff))
            .await?;
        Ok(self.instantiate(stored))
    }

    /// Everything stored for one feed, including currently-hidden articles.
    /// This is the variant merge cycles use as their classification
    /// reference; most callers want [`FeedStore::fetch_articles`].
    pub async fn fetch_articles_unfiltered(
        &mut self,
        feed_id: &FeedId,
    ) -> Result<Vec<Arc<Article>>> {
        let stored = self.queue.fetch_articles(feed_id.clone(), None).await?;
        Ok(self.instantiate(stored))
    }

    /// Unread, displayed articles across a set of feeds.
    pub async fn fetch_unread_articles(
        &mut self,
        feed_ids: &[FeedId],
    ) -> Result<Vec<Arc<Article>>> {
        let window = self.policy.window_at(Utc::now());
        let stored = self
            .queue
            .fetch_unread(feed_ids.to_vec(), window.display_cutoff)
            .await?;
        Ok(self.instantiate(stored))
    }

    /// Per-feed unread counts over exactly the display predicate: the count
    /// for a feed equals the number of unread articles a display fetch
    /// would return. Feeds with nothing unread come back as zero.
    pub async fn fetch_unread_counts(
        &mut self,
        feed_ids: &[FeedId],
    ) -> Result<HashMap<FeedId, i64>> {
        let window = self.policy.window_at(Utc::now());
        self.queue
            .unread_counts(feed_ids.to_vec(), window.display_cutoff)
            .await
    }

    /// Turn fetched rows into live articles through the identity cache.
    /// Rows for an id that is already live resolve to the existing instance
    /// — whose in-memory state may be fresher than the row, since queued
    /// writes land asynchronously. That substitution is what makes stale
    /// reads harmless.
    fn instantiate(&mut self, stored: Vec<StoredArticle>) -> Vec<Arc<Article>> {
        let candidates = stored
            .into_iter()
            .map(|row| Arc::new(article_from_stored(row)))
            .collect();
        self.cache.uniqued(candidates)
    }
}

fn article_from_stored(row: StoredArticle) -> Article {
    let status = Arc::new(ArticleStatus::new(
        row.status.article_id,
        row.status.read,
        row.status.starred,
        row.status.user_deleted,
        row.status.date_arrived,
    ));
    Article::new(
        row.article_id,
        row.feed_id,
        Arc::from(row.guid),
        row.title.map(Arc::from),
        row.url.map(Arc::from),
        row.summary.map(Arc::from),
        row.body.map(Arc::from),
        row.published,
        row.relations,
        status,
    )
}
