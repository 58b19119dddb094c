use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::article::{Article, ArticleId, StatusFlag};
use crate::cache::IdentityCache;
use crate::policy::RetentionPolicy;
use crate::storage::{Database, DatabaseError};
use crate::worker::{Job, StorageQueue};

// ============================================================================
// Feed Store
// ============================================================================

/// The engine facade: owns the identity cache and retention policy on the
/// coordinating side, and the storage worker on the I/O side.
///
/// Every method that touches the cache or mutates articles takes
/// `&mut self` — the borrow checker is what enforces the single
/// coordinating context. Clones of articles handed out by fetches are
/// `Arc`s onto the canonical instances; holding them is what keeps cache
/// entries alive.
pub struct FeedStore {
    pub(crate) account_id: Arc<str>,
    pub(crate) policy: RetentionPolicy,
    pub(crate) cache: IdentityCache,
    pub(crate) queue: StorageQueue,
    worker: JoinHandle<()>,
}

impl FeedStore {
    /// Open the backing store at `path` (`":memory:"` for tests) and start
    /// the storage worker. The owning account id is required up front; the
    /// engine cannot run ownerless.
    pub async fn open(
        account_id: impl Into<Arc<str>>,
        path: &str,
        policy: RetentionPolicy,
    ) -> Result<Self, DatabaseError> {
        let account_id = account_id.into();
        let db = Database::open(path).await?;
        let (queue, worker) = StorageQueue::spawn(db);
        tracing::debug!(account_id = %account_id, path = %path, "feed store opened");
        Ok(Self {
            account_id,
            policy,
            cache: IdentityCache::new(),
            queue,
            worker,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Set one status flag across a batch of articles. Articles already at
    /// the target value are skipped entirely; if nothing needs to change, no
    /// storage call is made at all. In-memory state changes immediately, the
    /// storage write is queued behind any earlier work.
    ///
    /// Returns the number of articles that actually changed.
    pub fn mark(&mut self, articles: &[Arc<Article>], flag: StatusFlag, value: bool) -> usize {
        let changed: Vec<ArticleId> = articles
            .iter()
            .filter(|article| article.status.set_flag(flag, value))
            .map(|article| article.article_id.clone())
            .collect();

        if changed.is_empty() {
            return 0;
        }

        let count = changed.len();
        self.queue.submit(Job::MarkFlags {
            article_ids: changed,
            flag,
            value,
        });
        count
    }

    /// Queue a retention sweep: drop stored articles that are user-deleted
    /// or non-starred past the retention cutoff. Their status rows survive,
    /// which is what keeps expired ids out of future merge candidate sets.
    pub fn purge_expired(&mut self) {
        let window = self.policy.window_at(Utc::now());
        self.queue.submit(Job::PurgeExpired {
            retention_cutoff: window.retention_cutoff,
        });
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Wait until every storage job queued before this call has completed.
    /// Mostly useful for orderly shutdown and for tests that assert on
    /// persisted state.
    pub async fn flush(&self) -> Result<()> {
        self.queue.flush().await
    }

    /// Flush outstanding work and stop the storage worker.
    pub async fn close(self) -> Result<()> {
        self.queue.flush().await?;
        drop(self.queue);
        self.worker.await?;
        Ok(())
    }
}
