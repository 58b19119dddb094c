use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::article::{
    ArticleId, ArticleSnapshot, FeedId, RelationKind, StatusFlag, StatusSnapshot,
};
use crate::storage::{Database, StoredArticle};

// ============================================================================
// Storage Jobs
// ============================================================================

/// One unit of storage work. Jobs are executed strictly in submission order
/// by the worker task, which is the FIFO guarantee everything else leans on:
/// a read queued after a write observes that write.
pub(crate) enum Job {
    EnsureStatuses {
        statuses: Vec<StatusSnapshot>,
    },
    InsertArticles {
        articles: Vec<ArticleSnapshot>,
    },
    SaveRelations {
        kind: RelationKind,
        articles: Vec<ArticleSnapshot>,
    },
    MarkFlags {
        article_ids: Vec<ArticleId>,
        flag: StatusFlag,
        value: bool,
    },
    PurgeExpired {
        retention_cutoff: DateTime<Utc>,
    },
    FetchArticles {
        feed_id: FeedId,
        display_cutoff: Option<DateTime<Utc>>,
        reply: oneshot::Sender<Result<Vec<StoredArticle>>>,
    },
    FetchUnread {
        feed_ids: Vec<FeedId>,
        display_cutoff: DateTime<Utc>,
        reply: oneshot::Sender<Result<Vec<StoredArticle>>>,
    },
    FetchStatuses {
        article_ids: Vec<ArticleId>,
        reply: oneshot::Sender<Result<HashMap<ArticleId, StatusSnapshot>>>,
    },
    UnreadCounts {
        feed_ids: Vec<FeedId>,
        display_cutoff: DateTime<Utc>,
        reply: oneshot::Sender<Result<HashMap<FeedId, i64>>>,
    },
    /// Barrier: replied to once every previously queued job has completed.
    Flush {
        reply: oneshot::Sender<()>,
    },
}

// ============================================================================
// Storage Queue
// ============================================================================

/// Handle for submitting jobs to the storage worker.
pub(crate) struct StorageQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl StorageQueue {
    /// Spawn the worker task that owns the database connection pool.
    pub(crate) fn spawn(db: Database) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(db, rx));
        (Self { tx }, handle)
    }

    /// Enqueue a write, fire and forget. A failed batch is logged by the
    /// worker and produces no downstream state; there is no retry.
    pub(crate) fn submit(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!("storage worker is gone; dropping queued job");
        }
    }

    pub(crate) async fn fetch_articles(
        &self,
        feed_id: FeedId,
        display_cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredArticle>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::FetchArticles {
            feed_id,
            display_cutoff,
            reply,
        });
        await_reply(rx).await
    }

    pub(crate) async fn fetch_unread(
        &self,
        feed_ids: Vec<FeedId>,
        display_cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredArticle>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::FetchUnread {
            feed_ids,
            display_cutoff,
            reply,
        });
        await_reply(rx).await
    }

    pub(crate) async fn fetch_statuses(
        &self,
        article_ids: Vec<ArticleId>,
    ) -> Result<HashMap<ArticleId, StatusSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::FetchStatuses { article_ids, reply });
        await_reply(rx).await
    }

    pub(crate) async fn unread_counts(
        &self,
        feed_ids: Vec<FeedId>,
        display_cutoff: DateTime<Utc>,
    ) -> Result<HashMap<FeedId, i64>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::UnreadCounts {
            feed_ids,
            display_cutoff,
            reply,
        });
        await_reply(rx).await
    }

    /// Wait until every job queued before this call has completed.
    pub(crate) async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Flush { reply });
        rx.await
            .map_err(|_| anyhow!("storage worker stopped before flush completed"))
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await
        .map_err(|_| anyhow!("storage worker dropped the reply"))?
}

// ============================================================================
// Worker Loop
// ============================================================================

/// Serialized storage I/O. Write failures are logged and otherwise dropped:
/// callers observe them only as the absence of expected state.
async fn run_worker(db: Database, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::EnsureStatuses { statuses } => {
                if let Err(e) = db.ensure_statuses(&statuses).await {
                    tracing::warn!(error = %e, count = statuses.len(), "status ensure batch failed");
                }
            }
            Job::InsertArticles { articles } => {
                if let Err(e) = db.insert_articles(&articles).await {
                    tracing::warn!(error = %e, count = articles.len(), "article insert batch failed");
                }
            }
            Job::SaveRelations { kind, articles } => {
                if let Err(e) = db.replace_related(kind, &articles).await {
                    tracing::warn!(error = %e, kind = %kind, count = articles.len(), "relation save batch failed");
                }
            }
            Job::MarkFlags {
                article_ids,
                flag,
                value,
            } => {
                if let Err(e) = db.mark_flags(&article_ids, flag, value).await {
                    tracing::warn!(error = %e, count = article_ids.len(), "mark batch failed");
                }
            }
            Job::PurgeExpired { retention_cutoff } => match db.purge_expired(retention_cutoff).await
            {
                Ok(purged) if purged > 0 => {
                    tracing::debug!(purged, "purged expired articles");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "retention purge failed");
                }
            },
            Job::FetchArticles {
                feed_id,
                display_cutoff,
                reply,
            } => {
                let result = db.fetch_articles_for_feed(&feed_id, display_cutoff).await;
                let _ = reply.send(result);
            }
            Job::FetchUnread {
                feed_ids,
                display_cutoff,
                reply,
            } => {
                let result = db.fetch_unread_for_feeds(&feed_ids, display_cutoff).await;
                let _ = reply.send(result);
            }
            Job::FetchStatuses { article_ids, reply } => {
                let result = db.fetch_statuses(&article_ids).await;
                let _ = reply.send(result);
            }
            Job::UnreadCounts {
                feed_ids,
                display_cutoff,
                reply,
            } => {
                let result = db.unread_counts(&feed_ids, display_cutoff).await;
                let _ = reply.send(result);
            }
            Job::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }
    tracing::debug!("storage worker stopped");
}
