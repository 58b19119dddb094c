//! Article storage and sync engine for feed readers.
//!
//! The engine reconciles freshly parsed feed entries against previously
//! persisted article records ([`FeedStore::update`]), enforces a two-tier
//! time/starred visibility and retention policy ([`policy`]), guarantees a
//! single live in-memory instance per logical article ([`cache`]), and
//! persists relation state (authors, tags, enclosures) with minimal diffs
//! ([`diff`]).
//!
//! Mutating state lives on a single coordinating context — every method
//! that touches the identity cache or article state takes `&mut FeedStore`
//! — while storage I/O runs serialized on a background worker task. Reads
//! queue behind writes, so anything fetched reflects all previously
//! enqueued work.

pub mod article;
pub mod cache;
pub mod diff;
mod merge;
pub mod parsed;
pub mod policy;
mod query;
pub mod storage;
mod store;
mod worker;

pub use article::{
    Article, ArticleId, ArticleSnapshot, ArticleStatus, Author, Enclosure, FeedId, RelationKind,
    RelationSets, StatusFlag, StatusSnapshot, Tag,
};
pub use cache::IdentityCache;
pub use diff::{diff_relations, RelationChanges};
pub use merge::MergeSummary;
pub use parsed::{ParsedFeed, ParsedItem};
pub use policy::{InvalidPolicy, RetentionPolicy, VisibilityWindow};
pub use storage::{Database, DatabaseError};
pub use store::FeedStore;
