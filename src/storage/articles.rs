use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{ArticleJoinedRow, StoredArticle};
use crate::article::{ArticleSnapshot, FeedId};

// ============================================================================
// Batch Size Constants
// ============================================================================

/// Batch size for article row inserts: 8 columns * 100 rows = 800 bind
/// parameters, under SQLite's 999 limit.
const INSERT_BATCH: usize = 100;

/// Chunk size for id IN (...) lists, under the 999 parameter limit with
/// room for the non-list binds.
pub(crate) const ID_BATCH: usize = 900;

/// Shared SELECT prefix for article + status joined reads.
const ARTICLE_SELECT: &str = r#"SELECT a.article_id, a.feed_id, a.guid, a.title, a.url, a.summary, a.body, a.published,
       s.read, s.starred, s.user_deleted, s.date_arrived
FROM articles a
JOIN statuses s ON s.article_id = a.article_id
"#;

impl Database {
    // ========================================================================
    // Article Writes
    // ========================================================================

    /// Insert base article rows, silently skipping ids that already exist.
    /// Duplicate-key inserts are not errors: concurrent merge cycles may
    /// race on the same items, and whoever loses the race has nothing left
    /// to do. Returns the number of rows actually inserted.
    pub(crate) async fn insert_articles(&self, articles: &[ArticleSnapshot]) -> Result<u64> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted: u64 = 0;

        for chunk in articles.chunks(INSERT_BATCH) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO articles (article_id, feed_id, guid, title, url, summary, body, published) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(article.article_id.as_str())
                    .push_bind(article.feed_id.as_str())
                    .push_bind(&*article.guid)
                    .push_bind(article.title.as_deref())
                    .push_bind(article.url.as_deref())
                    .push_bind(article.summary.as_deref())
                    .push_bind(article.body.as_deref())
                    .push_bind(article.published.map(|p| p.timestamp()));
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Delete article and relation rows that fall outside the retention
    /// policy: user-deleted, or non-starred and older than the retention
    /// cutoff. Status rows are kept so purged ids remain classifiable as
    /// ignorable on later refreshes. Returns the number of articles removed.
    pub(crate) async fn purge_expired(&self, retention_cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = retention_cutoff.timestamp();
        let mut tx = self.pool.begin().await?;

        // Relation rows first, while the doomed ids are still selectable.
        for table in ["article_authors", "article_tags", "article_enclosures"] {
            let sql = format!(
                "DELETE FROM {table} WHERE article_id IN (
                     SELECT article_id FROM statuses
                     WHERE user_deleted = 1 OR (starred = 0 AND date_arrived < ?))"
            );
            sqlx::query(&sql).bind(cutoff).execute(&mut *tx).await?;
        }

        let result = sqlx::query(
            "DELETE FROM articles WHERE article_id IN (
                 SELECT article_id FROM statuses
                 WHERE user_deleted = 1 OR (starred = 0 AND date_arrived < ?))",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Article Reads
    // ========================================================================

    /// All articles of one feed, joined with status and with relation sets
    /// attached. `display_cutoff = None` returns everything including
    /// currently-hidden articles (the merge classification reference);
    /// `Some(cutoff)` applies the display filter in SQL.
    ///
    /// The SQL filter must stay in lockstep with
    /// `VisibilityWindow::is_displayed`.
    pub(crate) async fn fetch_articles_for_feed(
        &self,
        feed_id: &FeedId,
        display_cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredArticle>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(ARTICLE_SELECT);
        builder.push("WHERE a.feed_id = ");
        builder.push_bind(feed_id.as_str());

        if let Some(cutoff) = display_cutoff {
            builder.push(" AND s.user_deleted = 0 AND (s.starred = 1 OR s.date_arrived > ");
            builder.push_bind(cutoff.timestamp());
            builder.push(")");
        }

        builder.push(" ORDER BY a.published DESC, s.date_arrived DESC");

        let rows: Vec<ArticleJoinedRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let mut articles: Vec<StoredArticle> =
            rows.into_iter().map(ArticleJoinedRow::into_stored).collect();
        self.attach_related(&mut articles).await?;
        Ok(articles)
    }

    /// Unread, displayed articles across a set of feeds.
    pub(crate) async fn fetch_unread_for_feeds(
        &self,
        feed_ids: &[FeedId],
        display_cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredArticle>> {
        if feed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut articles = Vec::new();
        for chunk in feed_ids.chunks(ID_BATCH) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(ARTICLE_SELECT);
            builder.push("WHERE s.read = 0 AND s.user_deleted = 0 AND (s.starred = 1 OR s.date_arrived > ");
            builder.push_bind(display_cutoff.timestamp());
            builder.push(") AND a.feed_id IN (");

            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(") ORDER BY a.published DESC");

            let rows: Vec<ArticleJoinedRow> =
                builder.build_query_as().fetch_all(&self.pool).await?;
            articles.extend(rows.into_iter().map(ArticleJoinedRow::into_stored));
        }

        self.attach_related(&mut articles).await?;
        Ok(articles)
    }

    /// Per-feed count of unread, displayed articles in one grouped query.
    /// Counts exactly what `fetch_unread_for_feeds` would enumerate; feeds
    /// with no qualifying articles come back as zero.
    pub(crate) async fn unread_counts(
        &self,
        feed_ids: &[FeedId],
        display_cutoff: DateTime<Utc>,
    ) -> Result<HashMap<FeedId, i64>> {
        let mut counts: HashMap<FeedId, i64> =
            feed_ids.iter().map(|id| (id.clone(), 0)).collect();
        if feed_ids.is_empty() {
            return Ok(counts);
        }

        for chunk in feed_ids.chunks(ID_BATCH) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                r#"SELECT a.feed_id, COUNT(*)
                   FROM articles a
                   JOIN statuses s ON s.article_id = a.article_id
                   WHERE s.read = 0 AND s.user_deleted = 0 AND (s.starred = 1 OR s.date_arrived > "#,
            );
            builder.push_bind(display_cutoff.timestamp());
            builder.push(") AND a.feed_id IN (");

            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(") GROUP BY a.feed_id");

            let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
            for (feed_id, count) in rows {
                counts.insert(FeedId::new(feed_id), count);
            }
        }

        Ok(counts)
    }
}
