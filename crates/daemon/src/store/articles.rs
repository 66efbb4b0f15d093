// articles / tags / article_tags table access.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shelf_common::types::{Article, Tag};

/// Fields of an article fetched from the server, before it has a local row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub article_id: i64,
    pub url: String,
    pub origin_url: Option<String>,
    pub title: String,
    pub archived: bool,
    pub favorite: bool,
}

impl NewArticle {
    pub fn new(article_id: i64, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            article_id,
            url: url.into(),
            origin_url: None,
            title: title.into(),
            archived: false,
            favorite: false,
        }
    }
}

/// CRUD operations for `articles`.
pub struct ArticleStore;

impl ArticleStore {
    /// Insert a new article row. Returns the local row id.
    pub fn insert(conn: &Connection, article: &NewArticle, now: DateTime<Utc>) -> Result<i64> {
        conn.execute(
            "INSERT INTO articles \
             (article_id, url, origin_url, title, archived, favorite, progress, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                article.article_id,
                article.url,
                article.origin_url,
                article.title,
                article.archived,
                article.favorite,
                now.to_rfc3339(),
            ],
        )
        .context("failed to insert article row")?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch an article by its server id.
    pub fn get_by_article_id(conn: &Connection, article_id: i64) -> Result<Option<Article>> {
        conn.query_row(
            "SELECT id, article_id, url, origin_url, title, archived, favorite, progress, \
                    updated_at \
             FROM articles \
             WHERE article_id = ?1",
            params![article_id],
            row_to_article,
        )
        .optional()
        .context("failed to query article by article_id")
    }

    /// Write every mutable field of `article` back to its row.
    pub fn update(conn: &Connection, article: &Article) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE articles \
                 SET url = ?1, origin_url = ?2, title = ?3, archived = ?4, favorite = ?5, \
                     progress = ?6, updated_at = ?7 \
                 WHERE id = ?8",
                params![
                    article.url,
                    article.origin_url,
                    article.title,
                    article.archived,
                    article.favorite,
                    article.progress,
                    article.updated_at.to_rfc3339(),
                    article.id,
                ],
            )
            .context("failed to update article row")?;
        Ok(changed > 0)
    }

    /// Delete an article. Tag links, annotations and their ranges go with it.
    pub fn delete(conn: &Connection, local_id: i64) -> Result<bool> {
        let changed = conn
            .execute("DELETE FROM articles WHERE id = ?1", params![local_id])
            .context("failed to delete article row")?;
        Ok(changed > 0)
    }
}

fn row_to_article(row: &rusqlite::Row<'_>) -> rusqlite::Result<Article> {
    let updated_str: String = row.get(8)?;
    Ok(Article {
        id: row.get(0)?,
        article_id: row.get(1)?,
        url: row.get(2)?,
        origin_url: row.get(3)?,
        title: row.get(4)?,
        archived: row.get(5)?,
        favorite: row.get(6)?,
        progress: row.get(7)?,
        updated_at: updated_str.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

/// Operations on `tags` and the `article_tags` join table.
pub struct TagStore;

impl TagStore {
    /// Tags linked to an article, ordered by label.
    pub fn for_article(conn: &Connection, article_local_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.tag_id, t.label \
                 FROM tags t \
                 JOIN article_tags j ON j.tag_local_id = t.id \
                 WHERE j.article_local_id = ?1 \
                 ORDER BY t.label ASC",
            )
            .context("failed to prepare tags by article query")?;

        let rows = stmt
            .query_map(params![article_local_id], row_to_tag)
            .context("failed to query tags by article")?;

        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect article tags")
    }

    pub fn find_by_label(conn: &Connection, label: &str) -> Result<Option<Tag>> {
        conn.query_row(
            "SELECT id, tag_id, label FROM tags WHERE label = ?1",
            params![label],
            row_to_tag,
        )
        .optional()
        .context("failed to query tag by label")
    }

    /// Insert a tag. `tag_id` is `None` for tags created offline.
    pub fn insert(conn: &Connection, label: &str, tag_id: Option<i64>) -> Result<Tag> {
        conn.execute("INSERT INTO tags (tag_id, label) VALUES (?1, ?2)", params![tag_id, label])
            .context("failed to insert tag row")?;
        Ok(Tag { id: conn.last_insert_rowid(), tag_id, label: label.to_string() })
    }

    pub fn link(conn: &Connection, article_local_id: i64, tag_local_id: i64) -> Result<bool> {
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO article_tags (article_local_id, tag_local_id) \
                 VALUES (?1, ?2)",
                params![article_local_id, tag_local_id],
            )
            .context("failed to link tag to article")?;
        Ok(changed > 0)
    }

    pub fn unlink(conn: &Connection, article_local_id: i64, tag_local_id: i64) -> Result<bool> {
        let changed = conn
            .execute(
                "DELETE FROM article_tags WHERE article_local_id = ?1 AND tag_local_id = ?2",
                params![article_local_id, tag_local_id],
            )
            .context("failed to unlink tag from article")?;
        Ok(changed > 0)
    }
}

fn row_to_tag(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag { id: row.get(0)?, tag_id: row.get(1)?, label: row.get(2)? })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::LocalDb;

    fn seeded() -> (LocalDb, i64) {
        let db = LocalDb::open_in_memory().expect("database should open");
        let id = ArticleStore::insert(
            db.connection(),
            &NewArticle::new(42, "https://example.com/a", "A title"),
            Utc::now(),
        )
        .expect("insert should succeed");
        (db, id)
    }

    #[test]
    fn insert_and_read_back_by_article_id() {
        let (db, local_id) = seeded();
        let article = ArticleStore::get_by_article_id(db.connection(), 42)
            .expect("query should succeed")
            .expect("article should exist");

        assert_eq!(article.id, local_id);
        assert_eq!(article.url, "https://example.com/a");
        assert_eq!(article.title, "A title");
        assert!(!article.archived);
        assert!(!article.favorite);
    }

    #[test]
    fn missing_article_is_none() {
        let (db, _) = seeded();
        assert!(ArticleStore::get_by_article_id(db.connection(), 7).expect("query").is_none());
    }

    #[test]
    fn update_persists_flags() {
        let (db, _) = seeded();
        let mut article =
            ArticleStore::get_by_article_id(db.connection(), 42).expect("query").expect("row");
        article.archived = true;
        article.favorite = true;
        article.title = "Renamed".into();
        assert!(ArticleStore::update(db.connection(), &article).expect("update"));

        let reloaded =
            ArticleStore::get_by_article_id(db.connection(), 42).expect("query").expect("row");
        assert!(reloaded.archived);
        assert!(reloaded.favorite);
        assert_eq!(reloaded.title, "Renamed");
    }

    #[test]
    fn delete_cascades_tag_links() {
        let (db, local_id) = seeded();
        let tag = TagStore::insert(db.connection(), "rust", Some(3)).expect("tag insert");
        TagStore::link(db.connection(), local_id, tag.id).expect("link");

        assert!(ArticleStore::delete(db.connection(), local_id).expect("delete"));

        let links: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM article_tags", [], |row| row.get(0))
            .expect("count");
        assert_eq!(links, 0);
        // The tag itself survives; it may be linked to other articles.
        assert!(TagStore::find_by_label(db.connection(), "rust").expect("query").is_some());
    }

    #[test]
    fn tags_for_article_are_sorted_by_label() {
        let (db, local_id) = seeded();
        for label in ["zeta", "alpha", "mid"] {
            let tag = TagStore::insert(db.connection(), label, None).expect("tag insert");
            TagStore::link(db.connection(), local_id, tag.id).expect("link");
        }

        let labels: Vec<String> = TagStore::for_article(db.connection(), local_id)
            .expect("query")
            .into_iter()
            .map(|tag| tag.label)
            .collect();
        assert_eq!(labels, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn link_is_idempotent_and_unlink_reports_change() {
        let (db, local_id) = seeded();
        let tag = TagStore::insert(db.connection(), "rust", None).expect("tag insert");

        assert!(TagStore::link(db.connection(), local_id, tag.id).expect("first link"));
        assert!(!TagStore::link(db.connection(), local_id, tag.id).expect("second link"));
        assert!(TagStore::unlink(db.connection(), local_id, tag.id).expect("unlink"));
        assert!(!TagStore::unlink(db.connection(), local_id, tag.id).expect("second unlink"));
    }
}
