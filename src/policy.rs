use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::article::StatusSnapshot;

// ============================================================================
// Retention Policy
// ============================================================================

/// Rejected retention configuration.
#[derive(Debug, Error)]
#[error("retention window ({retention_days} days) must be longer than display window ({display_days} days)")]
pub struct InvalidPolicy {
    pub display_days: i64,
    pub retention_days: i64,
}

/// Two-tier time/starred visibility configuration.
///
/// Non-starred articles older than the display window are hidden from
/// queries; older than the retention window they are dropped from storage
/// entirely. The gap between the two is intentional: articles age out of
/// the UI before they are permanently discarded, so a feed that briefly
/// re-publishes an old item does not resurrect it as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub display_days: i64,
    pub retention_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            display_days: 90,
            retention_days: 180,
        }
    }
}

impl RetentionPolicy {
    /// The retention window must be strictly longer than the display window.
    pub fn new(display_days: i64, retention_days: i64) -> Result<Self, InvalidPolicy> {
        if retention_days <= display_days || display_days < 0 {
            return Err(InvalidPolicy {
                display_days,
                retention_days,
            });
        }
        Ok(Self {
            display_days,
            retention_days,
        })
    }

    /// Resolve the sliding cutoffs against a concrete `now`.
    pub fn window_at(&self, now: DateTime<Utc>) -> VisibilityWindow {
        VisibilityWindow {
            display_cutoff: now - Duration::days(self.display_days),
            retention_cutoff: now - Duration::days(self.retention_days),
        }
    }
}

// ============================================================================
// Visibility Window
// ============================================================================

/// Resolved cutoff pair for one point in time. `display_cutoff` is always
/// the more recent of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityWindow {
    pub display_cutoff: DateTime<Utc>,
    pub retention_cutoff: DateTime<Utc>,
}

impl VisibilityWindow {
    /// An ignorable item is dropped from merge input before classification:
    /// user-deleted always, otherwise non-starred and older than the
    /// retention cutoff. Starred articles are never ignorable.
    pub fn is_ignorable(&self, status: &StatusSnapshot) -> bool {
        if status.user_deleted {
            return true;
        }
        if status.starred {
            return false;
        }
        status.date_arrived < self.retention_cutoff
    }

    /// Display predicate for every user-facing query. Must stay in lockstep
    /// with the SQL filter in `storage::articles` — the unread-count query
    /// counts exactly what a display fetch would enumerate.
    pub fn is_displayed(&self, status: &StatusSnapshot) -> bool {
        !status.user_deleted && (status.starred || status.date_arrived > self.display_cutoff)
    }

    /// Storage retention predicate: the complement drives `purge_expired`.
    pub fn is_retained(&self, status: &StatusSnapshot) -> bool {
        !status.user_deleted && (status.starred || status.date_arrived > self.retention_cutoff)
    }
}
