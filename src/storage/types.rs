use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::article::{ArticleId, FeedId, RelationSets, StatusSnapshot};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has the article store locked
    #[error("Another process appears to be using this article store. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Article store migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// Article row joined 1:1 with its status row (used by sqlx FromRow).
/// Converts to `StoredArticle` via `into_stored()`; relation sets are
/// attached afterwards by `attach_related`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleJoinedRow {
    pub article_id: String,
    pub feed_id: String,
    pub guid: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub published: Option<i64>,
    pub read: bool,
    pub starred: bool,
    pub user_deleted: bool,
    pub date_arrived: i64,
}

impl ArticleJoinedRow {
    pub(crate) fn into_stored(self) -> StoredArticle {
        let article_id = ArticleId::from_raw(self.article_id);
        StoredArticle {
            status: StatusSnapshot {
                article_id: article_id.clone(),
                read: self.read,
                starred: self.starred,
                user_deleted: self.user_deleted,
                date_arrived: timestamp(self.date_arrived),
            },
            article_id,
            feed_id: FeedId::new(self.feed_id),
            guid: self.guid,
            title: self.title,
            url: self.url,
            summary: self.summary,
            body: self.body,
            published: self.published.map(timestamp),
            relations: RelationSets::default(),
        }
    }
}

/// Status row (used by sqlx FromRow for bulk status loads).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StatusRow {
    pub article_id: String,
    pub read: bool,
    pub starred: bool,
    pub user_deleted: bool,
    pub date_arrived: i64,
}

impl StatusRow {
    pub(crate) fn into_snapshot(self) -> StatusSnapshot {
        StatusSnapshot {
            article_id: ArticleId::from_raw(self.article_id),
            read: self.read,
            starred: self.starred,
            user_deleted: self.user_deleted,
            date_arrived: timestamp(self.date_arrived),
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

// ============================================================================
// Stored Article
// ============================================================================

/// One article as loaded from storage: base row, status, and (after
/// `attach_related`) the three relation sets. The coordinating context
/// converts these into live `Article` instances through the identity cache.
#[derive(Debug)]
pub(crate) struct StoredArticle {
    pub article_id: ArticleId,
    pub feed_id: FeedId,
    pub guid: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub relations: RelationSets,
    pub status: StatusSnapshot,
}
