use std::collections::HashMap;

use anyhow::Result;
use sqlx::QueryBuilder;

use super::articles::ID_BATCH;
use super::schema::Database;
use super::types::StatusRow;
use crate::article::{ArticleId, StatusFlag, StatusSnapshot};

/// Batch size for status inserts: 5 columns * 150 rows = 750 bind
/// parameters, under SQLite's 999 limit.
const STATUS_BATCH: usize = 150;

impl Database {
    // ========================================================================
    // Status Operations
    // ========================================================================

    /// Create-if-absent for status rows (INSERT OR IGNORE). Existing rows
    /// keep their flags untouched: a status may predate its article and may
    /// carry user state (read/starred) that a re-arriving item must not
    /// reset.
    pub(crate) async fn ensure_statuses(&self, statuses: &[StatusSnapshot]) -> Result<()> {
        if statuses.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in statuses.chunks(STATUS_BATCH) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO statuses (article_id, read, starred, user_deleted, date_arrived) ",
            );

            builder.push_values(chunk, |mut b, status| {
                b.push_bind(status.article_id.as_str())
                    .push_bind(status.read)
                    .push_bind(status.starred)
                    .push_bind(status.user_deleted)
                    .push_bind(status.date_arrived.timestamp());
            });

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Bulk-load statuses for the given ids. Ids with no status row are
    /// simply absent from the result map.
    pub(crate) async fn fetch_statuses(
        &self,
        article_ids: &[ArticleId],
    ) -> Result<HashMap<ArticleId, StatusSnapshot>> {
        let mut statuses = HashMap::with_capacity(article_ids.len());
        if article_ids.is_empty() {
            return Ok(statuses);
        }

        for chunk in article_ids.chunks(ID_BATCH) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "SELECT article_id, read, starred, user_deleted, date_arrived FROM statuses WHERE article_id IN (",
            );

            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<StatusRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            for row in rows {
                let snapshot = row.into_snapshot();
                statuses.insert(snapshot.article_id.clone(), snapshot);
            }
        }

        Ok(statuses)
    }

    /// Set one flag for a batch of articles. The `column != value` guard
    /// makes the operation idempotent: rows already at the target value are
    /// not rewritten, and the returned count reflects only actual changes.
    pub(crate) async fn mark_flags(
        &self,
        article_ids: &[ArticleId],
        flag: StatusFlag,
        value: bool,
    ) -> Result<u64> {
        if article_ids.is_empty() {
            return Ok(0);
        }

        let column = flag.column();
        let mut changed: u64 = 0;

        for chunk in article_ids.chunks(ID_BATCH) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new(format!("UPDATE statuses SET {column} = "));
            builder.push_bind(value);
            builder.push(format!(" WHERE {column} != "));
            builder.push_bind(value);
            builder.push(" AND article_id IN (");

            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let result = builder.build().execute(&self.pool).await?;
            changed += result.rows_affected();
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::FeedId;
    use chrono::Utc;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn status(guid: &str) -> StatusSnapshot {
        StatusSnapshot {
            article_id: ArticleId::derived(&FeedId::new("feed"), guid),
            read: false,
            starred: false,
            user_deleted: false,
            date_arrived: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ensure_then_fetch() {
        let db = test_db().await;
        let statuses = [status("a"), status("b")];
        db.ensure_statuses(&statuses).await.unwrap();

        let ids: Vec<ArticleId> = statuses.iter().map(|s| s.article_id.clone()).collect();
        let loaded = db.fetch_statuses(&ids).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(!loaded[&ids[0]].read);
    }

    #[tokio::test]
    async fn test_ensure_preserves_existing_flags() {
        let db = test_db().await;
        let s = status("a");
        db.ensure_statuses(std::slice::from_ref(&s)).await.unwrap();
        db.mark_flags(&[s.article_id.clone()], StatusFlag::Starred, true)
            .await
            .unwrap();

        // Re-ensuring with default flags must not reset the star.
        db.ensure_statuses(std::slice::from_ref(&s)).await.unwrap();
        let loaded = db.fetch_statuses(&[s.article_id.clone()]).await.unwrap();
        assert!(loaded[&s.article_id].starred);
    }

    #[tokio::test]
    async fn test_fetch_skips_unknown_ids() {
        let db = test_db().await;
        let known = status("known");
        db.ensure_statuses(std::slice::from_ref(&known))
            .await
            .unwrap();

        let unknown = ArticleId::derived(&FeedId::new("feed"), "unknown");
        let loaded = db
            .fetch_statuses(&[known.article_id.clone(), unknown.clone()])
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded.contains_key(&unknown));
    }

    #[tokio::test]
    async fn test_mark_flags_counts_only_changes() {
        let db = test_db().await;
        let a = status("a");
        let b = status("b");
        db.ensure_statuses(&[a.clone(), b.clone()]).await.unwrap();
        db.mark_flags(&[a.article_id.clone()], StatusFlag::Read, true)
            .await
            .unwrap();

        // a is already read; only b changes.
        let changed = db
            .mark_flags(
                &[a.article_id.clone(), b.article_id.clone()],
                StatusFlag::Read,
                true,
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let changed = db
            .mark_flags(
                &[a.article_id.clone(), b.article_id.clone()],
                StatusFlag::Read,
                true,
            )
            .await
            .unwrap();
        assert_eq!(changed, 0);
    }
}
