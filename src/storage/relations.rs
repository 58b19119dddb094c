use std::collections::HashMap;

use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::articles::ID_BATCH;
use super::schema::Database;
use super::types::StoredArticle;
use crate::article::{ArticleSnapshot, Author, Enclosure, RelationKind, Tag};

/// Batch size for relation row inserts: the widest table binds 5 columns,
/// so 100 rows stays well under SQLite's 999 parameter limit.
const RELATION_BATCH: usize = 100;

impl RelationKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            RelationKind::Authors => "article_authors",
            RelationKind::Tags => "article_tags",
            RelationKind::Enclosures => "article_enclosures",
        }
    }
}

impl Database {
    // ========================================================================
    // Relation Writes
    // ========================================================================

    /// Replace the persisted relation state of one kind for the given
    /// articles: delete their existing rows, insert the snapshots' current
    /// sets. Runs in one transaction, so a kind-level batch either lands
    /// fully or not at all. An article whose set is empty simply ends up
    /// with no rows.
    pub(crate) async fn replace_related(
        &self,
        kind: RelationKind,
        articles: &[ArticleSnapshot],
    ) -> Result<()> {
        if articles.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in articles.chunks(ID_BATCH) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("DELETE FROM {} WHERE article_id IN (", kind.table()));

            let mut separated = builder.separated(", ");
            for article in chunk {
                separated.push_bind(article.article_id.as_str());
            }
            separated.push_unseparated(")");

            builder.build().execute(&mut *tx).await?;
        }

        match kind {
            RelationKind::Authors => insert_author_rows(&mut tx, articles).await?,
            RelationKind::Tags => insert_tag_rows(&mut tx, articles).await?,
            RelationKind::Enclosures => insert_enclosure_rows(&mut tx, articles).await?,
        }

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Relation Reads
    // ========================================================================

    /// Populate the relation sets of freshly fetched articles, one batched
    /// query per kind.
    pub(crate) async fn attach_related(&self, articles: &mut [StoredArticle]) -> Result<()> {
        if articles.is_empty() {
            return Ok(());
        }

        let index: HashMap<String, usize> = articles
            .iter()
            .enumerate()
            .map(|(i, a)| (a.article_id.as_str().to_string(), i))
            .collect();
        let ids: Vec<String> = index.keys().cloned().collect();

        for chunk in ids.chunks(ID_BATCH) {
            let rows: Vec<(String, String, Option<String>, Option<String>, Option<String>)> =
                in_query(
                    "SELECT article_id, author_id, name, url, email FROM article_authors WHERE article_id IN (",
                    chunk,
                )
                .build_query_as()
                .fetch_all(&self.pool)
                .await?;
            for (article_id, author_id, name, url, email) in rows {
                if let Some(&i) = index.get(&article_id) {
                    articles[i]
                        .relations
                        .authors
                        .insert(Author::from_stored(author_id, name, url, email));
                }
            }

            let rows: Vec<(String, String)> = in_query(
                "SELECT article_id, tag FROM article_tags WHERE article_id IN (",
                chunk,
            )
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
            for (article_id, tag) in rows {
                if let Some(&i) = index.get(&article_id) {
                    articles[i].relations.tags.insert(Tag::new(tag));
                }
            }

            let rows: Vec<(String, String, Option<String>, Option<i64>)> = in_query(
                "SELECT article_id, url, mime_type, size_bytes FROM article_enclosures WHERE article_id IN (",
                chunk,
            )
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
            for (article_id, url, mime_type, size_bytes) in rows {
                if let Some(&i) = index.get(&article_id) {
                    articles[i].relations.enclosures.insert(Enclosure {
                        url: url.into(),
                        mime_type: mime_type.map(Into::into),
                        size_bytes,
                    });
                }
            }
        }

        Ok(())
    }
}

fn in_query<'a>(prefix: &str, ids: &'a [String]) -> QueryBuilder<'a, Sqlite> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(prefix);
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.as_str());
    }
    separated.push_unseparated(")");
    builder
}

// ============================================================================
// Per-Kind Row Binders
// ============================================================================

async fn insert_author_rows(
    tx: &mut Transaction<'_, Sqlite>,
    articles: &[ArticleSnapshot],
) -> Result<()> {
    let rows: Vec<(&str, &Author)> = articles
        .iter()
        .flat_map(|a| a.authors.iter().map(move |author| (a.article_id.as_str(), author)))
        .collect();

    for chunk in rows.chunks(RELATION_BATCH) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO article_authors (article_id, author_id, name, url, email) ",
        );
        builder.push_values(chunk, |mut b, (article_id, author)| {
            b.push_bind(*article_id)
                .push_bind(&*author.author_id)
                .push_bind(author.name.as_deref())
                .push_bind(author.url.as_deref())
                .push_bind(author.email.as_deref());
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_tag_rows(
    tx: &mut Transaction<'_, Sqlite>,
    articles: &[ArticleSnapshot],
) -> Result<()> {
    let rows: Vec<(&str, &Tag)> = articles
        .iter()
        .flat_map(|a| a.tags.iter().map(move |tag| (a.article_id.as_str(), tag)))
        .collect();

    for chunk in rows.chunks(RELATION_BATCH) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO article_tags (article_id, tag) ");
        builder.push_values(chunk, |mut b, (article_id, tag)| {
            b.push_bind(*article_id).push_bind(tag.as_str());
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_enclosure_rows(
    tx: &mut Transaction<'_, Sqlite>,
    articles: &[ArticleSnapshot],
) -> Result<()> {
    let rows: Vec<(&str, &Enclosure)> = articles
        .iter()
        .flat_map(|a| a.enclosures.iter().map(move |e| (a.article_id.as_str(), e)))
        .collect();

    for chunk in rows.chunks(RELATION_BATCH) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO article_enclosures (article_id, url, mime_type, size_bytes) ",
        );
        builder.push_values(chunk, |mut b, (article_id, enclosure)| {
            b.push_bind(*article_id)
                .push_bind(&*enclosure.url)
                .push_bind(enclosure.mime_type.as_deref())
                .push_bind(enclosure.size_bytes);
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}
