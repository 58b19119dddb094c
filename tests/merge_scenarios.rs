//! Integration tests for the merge protocol: classification, visibility
//! filtering, relation diffing, identity uniquing, and mark batching.
//!
//! Each test opens its own in-memory store. `flush()` is awaited before
//! asserting on persisted state — `update` completing only means the
//! cycle's storage work has been classified and enqueued.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use newsrack::{
    ArticleId, Author, Enclosure, FeedId, FeedStore, ParsedFeed, ParsedItem, RetentionPolicy,
    StatusFlag, Tag,
};

async fn test_store() -> FeedStore {
    // RUST_LOG=debug surfaces worker-side batch logging when a test fails.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    FeedStore::open("test-account", ":memory:", RetentionPolicy::default())
        .await
        .unwrap()
}

fn feed() -> FeedId {
    FeedId::new("https://example.com/feed.xml")
}

fn item(guid: &str, tags: &[&str]) -> ParsedItem {
    item_aged(guid, tags, None)
}

/// A parsed item published `age_days` ago (None = no publish date).
fn item_aged(guid: &str, tags: &[&str], age_days: Option<i64>) -> ParsedItem {
    ParsedItem {
        article_id: ArticleId::derived(&feed(), guid),
        guid: Arc::from(guid),
        title: Some(format!("Article {guid}")),
        url: Some(format!("https://example.com/{guid}")),
        summary: Some("Summary".to_string()),
        body: None,
        published: age_days.map(|d| Utc::now() - Duration::days(d)),
        authors: HashSet::new(),
        tags: tags.iter().map(|t| Tag::new(*t)).collect(),
        enclosures: HashSet::new(),
    }
}

fn parsed(items: Vec<ParsedItem>) -> ParsedFeed {
    ParsedFeed {
        feed_id: feed(),
        items: items
            .into_iter()
            .map(|i| (i.article_id.clone(), i))
            .collect(),
    }
}

// ============================================================================
// Scenario A: Empty Input
// ============================================================================

#[tokio::test]
async fn test_empty_parsed_feed_completes_immediately() {
    let mut store = test_store().await;

    let summary = store.update(&feed(), &parsed(vec![])).await.unwrap();
    assert_eq!(summary.new_articles, 0);
    assert_eq!(summary.updated_articles, 0);
    assert_eq!(summary.ignored, 0);

    store.close().await.unwrap();
}

// ============================================================================
// Scenario B: New Item
// ============================================================================

#[tokio::test]
async fn test_new_item_creates_status_and_article() {
    let mut store = test_store().await;
    let before = Utc::now();

    let summary = store
        .update(&feed(), &parsed(vec![item("x", &["a"])]))
        .await
        .unwrap();
    assert_eq!(summary.new_articles, 1);

    store.flush().await.unwrap();
    let articles = store.fetch_articles(&feed()).await.unwrap();
    assert_eq!(articles.len(), 1);

    let article = &articles[0];
    assert_eq!(article.title.as_deref(), Some("Article x"));
    assert_eq!(article.tags(), [Tag::new("a")].into_iter().collect());

    // Default status: unread, unstarred, not deleted, arrived "now" when
    // the item carried no publish date.
    assert!(!article.status.read());
    assert!(!article.status.starred());
    assert!(!article.status.user_deleted());
    assert!(article.status.date_arrived >= before - Duration::seconds(1));
}

#[tokio::test]
async fn test_new_item_persists_all_relation_kinds() {
    let mut store = test_store().await;

    let mut rich = item("x", &["a", "b"]);
    rich.authors = [Author::new(Some("Jane Doe"), None, None).unwrap()]
        .into_iter()
        .collect();
    rich.enclosures = [Enclosure {
        url: Arc::from("https://example.com/x.mp3"),
        mime_type: Some(Arc::from("audio/mpeg")),
        size_bytes: Some(2048),
    }]
    .into_iter()
    .collect();

    store.update(&feed(), &parsed(vec![rich])).await.unwrap();
    store.flush().await.unwrap();

    // Drop cached instances so the next fetch rebuilds from rows.
    let articles = store.fetch_articles(&feed()).await.unwrap();
    drop(articles);
    let articles = store.fetch_articles(&feed()).await.unwrap();

    let article = &articles[0];
    assert_eq!(article.tags().len(), 2);
    assert_eq!(article.authors().len(), 1);
    assert_eq!(article.enclosures().len(), 1);
}

// ============================================================================
// Scenario C: Relation Diff on Existing Item
// ============================================================================

#[tokio::test]
async fn test_grown_tag_set_updates_in_memory_and_storage() {
    let mut store = test_store().await;

    store
        .update(&feed(), &parsed(vec![item("x", &["a"])]))
        .await
        .unwrap();

    // Hold the live instance across the second cycle.
    let held = store.fetch_articles(&feed()).await.unwrap();

    let summary = store
        .update(&feed(), &parsed(vec![item("x", &["a", "b"])]))
        .await
        .unwrap();
    assert_eq!(summary.new_articles, 0);
    assert_eq!(summary.updated_articles, 1);

    // The held instance was mutated in place.
    let expected: HashSet<Tag> = [Tag::new("a"), Tag::new("b")].into_iter().collect();
    assert_eq!(held[0].tags(), expected);
    assert!(held[0].authors().is_empty());

    // And storage converged after the queued relation write.
    store.flush().await.unwrap();
    drop(held);
    let reloaded = store.fetch_articles(&feed()).await.unwrap();
    assert_eq!(reloaded[0].tags(), expected);
    assert!(reloaded[0].authors().is_empty());
    assert!(reloaded[0].enclosures().is_empty());
}

#[tokio::test]
async fn test_unchanged_relations_issue_no_update() {
    let mut store = test_store().await;
    let input = parsed(vec![item("x", &["a", "b"]), item("y", &[])]);

    store.update(&feed(), &input).await.unwrap();
    let summary = store.update(&feed(), &input).await.unwrap();

    // Identical relation sets: no article counts as updated, which means
    // zero relation writes were enqueued for existing articles.
    assert_eq!(summary.new_articles, 0);
    assert_eq!(summary.updated_articles, 0);
}

// ============================================================================
// Scenario D: User-Deleted Item Dropped Before Classification
// ============================================================================

#[tokio::test]
async fn test_user_deleted_item_is_ignored() {
    let mut store = test_store().await;

    store
        .update(&feed(), &parsed(vec![item("y", &["a"])]))
        .await
        .unwrap();

    let articles = store.fetch_articles(&feed()).await.unwrap();
    store.mark(&articles, StatusFlag::UserDeleted, true);
    drop(articles);

    // Re-parse with different content and tags: the item must be dropped
    // before classification, with no create or update.
    let summary = store
        .update(&feed(), &parsed(vec![item("y", &["a", "b", "c"])]))
        .await
        .unwrap();
    assert_eq!(summary.ignored, 1);
    assert_eq!(summary.new_articles, 0);
    assert_eq!(summary.updated_articles, 0);

    store.flush().await.unwrap();
    let articles = store.fetch_articles(&feed()).await.unwrap();
    assert!(articles.is_empty(), "deleted article must not be displayed");
}

// ============================================================================
// Scenario E: Mark Batching
// ============================================================================

#[tokio::test]
async fn test_mark_skips_articles_already_at_value() {
    let mut store = test_store().await;

    store
        .update(&feed(), &parsed(vec![item("a", &[]), item("b", &[])]))
        .await
        .unwrap();
    let articles = store.fetch_articles(&feed()).await.unwrap();
    let a = articles
        .iter()
        .find(|x| &*x.guid == "a")
        .cloned()
        .unwrap();
    let b = articles
        .iter()
        .find(|x| &*x.guid == "b")
        .cloned()
        .unwrap();

    // Pre-star A, then mark both: only B changes.
    store.mark(std::slice::from_ref(&a), StatusFlag::Starred, true);
    let changed = store.mark(&[a.clone(), b.clone()], StatusFlag::Starred, true);
    assert_eq!(changed, 1);
    assert!(a.status.starred());
    assert!(b.status.starred());

    // Marking again is a full no-op.
    let changed = store.mark(&[a, b], StatusFlag::Starred, true);
    assert_eq!(changed, 0);

    // Storage converged to both starred.
    store.flush().await.unwrap();
    let articles = store.fetch_articles(&feed()).await.unwrap();
    drop(articles);
    let articles = store.fetch_articles(&feed()).await.unwrap();
    assert!(articles.iter().all(|x| x.status.starred()));
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_merge_is_idempotent() {
    let mut store = test_store().await;
    let input = parsed(vec![item("x", &["a"]), item("y", &["b", "c"])]);

    let first = store.update(&feed(), &input).await.unwrap();
    assert_eq!(first.new_articles, 2);

    let second = store.update(&feed(), &input).await.unwrap();
    assert_eq!(second.new_articles, 0);
    assert_eq!(second.updated_articles, 0);

    store.flush().await.unwrap();
    let articles = store.fetch_articles(&feed()).await.unwrap();
    assert_eq!(articles.len(), 2);
}

// ============================================================================
// Identity Uniqueness
// ============================================================================

#[tokio::test]
async fn test_two_fetches_share_instances() {
    let mut store = test_store().await;
    store
        .update(&feed(), &parsed(vec![item("x", &[]), item("y", &[])]))
        .await
        .unwrap();

    let first = store.fetch_articles(&feed()).await.unwrap();
    let second = store.fetch_articles(&feed()).await.unwrap();
    assert_eq!(first.len(), second.len());

    for article in &first {
        let twin = second
            .iter()
            .find(|a| a.article_id == article.article_id)
            .unwrap();
        assert!(
            Arc::ptr_eq(article, twin),
            "same article id must resolve to the same live instance"
        );
    }
}

#[tokio::test]
async fn test_mark_through_one_handle_visible_through_other() {
    let mut store = test_store().await;
    store
        .update(&feed(), &parsed(vec![item("x", &[])]))
        .await
        .unwrap();

    let first = store.fetch_articles(&feed()).await.unwrap();
    let second = store.fetch_articles(&feed()).await.unwrap();

    store.mark(&first, StatusFlag::Read, true);
    assert!(second[0].status.read());
}

// ============================================================================
// Visibility Partition
// ============================================================================

#[tokio::test]
async fn test_aged_article_retained_but_hidden() {
    let mut store = test_store().await;

    // Published 120 days ago: past the 90-day display window, inside the
    // 180-day retention window.
    store
        .update(&feed(), &parsed(vec![item_aged("aged", &[], Some(120))]))
        .await
        .unwrap();
    store.flush().await.unwrap();

    let displayed = store.fetch_articles(&feed()).await.unwrap();
    assert!(displayed.is_empty());

    let all = store.fetch_articles_unfiltered(&feed()).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_hidden_article_not_recreated_as_new() {
    let mut store = test_store().await;
    let aged = parsed(vec![item_aged("aged", &[], Some(120))]);

    let first = store.update(&feed(), &aged).await.unwrap();
    assert_eq!(first.new_articles, 1);

    // Hidden from display, but the merge classification reference bypasses
    // the display filter, so the item classifies as existing.
    let second = store.update(&feed(), &aged).await.unwrap();
    assert_eq!(second.new_articles, 0);
}

#[tokio::test]
async fn test_expired_item_never_persisted() {
    let mut store = test_store().await;

    // Published 400 days ago: past the 180-day retention cutoff.
    let ancient = parsed(vec![item_aged("ancient", &["a"], Some(400))]);
    let summary = store.update(&feed(), &ancient).await.unwrap();
    assert_eq!(summary.new_articles, 0);
    assert_eq!(summary.ignored, 1);

    store.flush().await.unwrap();
    let all = store.fetch_articles_unfiltered(&feed()).await.unwrap();
    assert!(all.is_empty(), "expired item must never gain an article row");

    // Its status row exists, so future cycles drop it at the filter step
    // instead of reclassifying it as new.
    let again = store.update(&feed(), &ancient).await.unwrap();
    assert_eq!(again.new_articles, 0);
    assert_eq!(again.ignored, 1);
}

#[tokio::test]
async fn test_starred_aged_article_remains_displayed() {
    let mut store = test_store().await;

    store
        .update(&feed(), &parsed(vec![item_aged("keeper", &[], Some(120))]))
        .await
        .unwrap();
    let all = store.fetch_articles_unfiltered(&feed()).await.unwrap();
    store.mark(&all, StatusFlag::Starred, true);
    drop(all);

    store.purge_expired();
    store.flush().await.unwrap();

    // Starred: displayed regardless of age, and retained by the purge.
    let displayed = store.fetch_articles(&feed()).await.unwrap();
    assert_eq!(displayed.len(), 1);
}

#[tokio::test]
async fn test_purge_drops_user_deleted_articles() {
    let mut store = test_store().await;

    store
        .update(&feed(), &parsed(vec![item("gone", &[]), item("kept", &[])]))
        .await
        .unwrap();
    let articles = store.fetch_articles(&feed()).await.unwrap();
    let gone: Vec<_> = articles
        .iter()
        .filter(|a| &*a.guid == "gone")
        .cloned()
        .collect();
    store.mark(&gone, StatusFlag::UserDeleted, true);
    drop((articles, gone));

    store.purge_expired();
    store.flush().await.unwrap();

    let all = store.fetch_articles_unfiltered(&feed()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(&*all[0].guid, "kept");
}

// ============================================================================
// Unread Counts
// ============================================================================

#[tokio::test]
async fn test_unread_counts_match_displayed_unread_enumeration() {
    let mut store = test_store().await;
    let other = FeedId::new("https://other.example.com/feed.xml");

    store
        .update(
            &feed(),
            &parsed(vec![
                item("a", &[]),
                item("b", &[]),
                item_aged("hidden", &[], Some(120)),
            ]),
        )
        .await
        .unwrap();
    let articles = store.fetch_articles(&feed()).await.unwrap();
    let read: Vec<_> = articles
        .iter()
        .filter(|a| &*a.guid == "a")
        .cloned()
        .collect();
    store.mark(&read, StatusFlag::Read, true);
    drop((articles, read));
    store.flush().await.unwrap();

    let counts = store
        .fetch_unread_counts(&[feed(), other.clone()])
        .await
        .unwrap();
    // "b" is unread and displayed; "hidden" is unread but outside the
    // display window and must not count.
    assert_eq!(counts[&feed()], 1);
    assert_eq!(counts[&other], 0);

    let unread = store.fetch_unread_articles(&[feed(), other]).await.unwrap();
    let expected: HashMap<FeedId, i64> = counts;
    assert_eq!(unread.len() as i64, expected[&feed()]);
    assert_eq!(&*unread[0].guid, "b");
}
