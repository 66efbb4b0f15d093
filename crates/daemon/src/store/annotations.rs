// annotations / annotation_ranges table access.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use shelf_common::types::{Annotation, AnnotationRange, NewAnnotation};

pub struct AnnotationStore;

impl AnnotationStore {
    /// Insert an annotation and its ranges. Returns the local annotation id.
    pub fn insert(
        conn: &Connection,
        article_local_id: i64,
        annotation: &NewAnnotation,
    ) -> Result<i64> {
        conn.execute(
            "INSERT INTO annotations (annotation_id, article_local_id, text, quote) \
             VALUES (NULL, ?1, ?2, ?3)",
            params![article_local_id, annotation.text, annotation.quote],
        )
        .context("failed to insert annotation row")?;
        let local_id = conn.last_insert_rowid();

        for range in &annotation.ranges {
            conn.execute(
                "INSERT INTO annotation_ranges \
                 (annotation_local_id, range_start, range_end, start_offset, end_offset) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![local_id, range.start, range.end, range.start_offset, range.end_offset],
            )
            .context("failed to insert annotation range row")?;
        }

        Ok(local_id)
    }

    pub fn get(conn: &Connection, local_id: i64) -> Result<Option<Annotation>> {
        let annotation = conn
            .query_row(
                "SELECT id, annotation_id, article_local_id, text, quote \
                 FROM annotations WHERE id = ?1",
                params![local_id],
                |row| {
                    Ok(Annotation {
                        id: row.get(0)?,
                        annotation_id: row.get(1)?,
                        article_local_id: row.get(2)?,
                        text: row.get(3)?,
                        quote: row.get(4)?,
                        ranges: Vec::new(),
                    })
                },
            )
            .optional()
            .context("failed to query annotation by id")?;

        let Some(mut annotation) = annotation else {
            return Ok(None);
        };
        annotation.ranges = ranges_for(conn, local_id)?;
        Ok(Some(annotation))
    }

    pub fn update_text(conn: &Connection, local_id: i64, text: &str) -> Result<bool> {
        let changed = conn
            .execute("UPDATE annotations SET text = ?1 WHERE id = ?2", params![text, local_id])
            .context("failed to update annotation text")?;
        Ok(changed > 0)
    }

    /// Record the server id assigned when the annotation was uploaded.
    pub fn set_remote_id(conn: &Connection, local_id: i64, remote_id: i64) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE annotations SET annotation_id = ?1 WHERE id = ?2",
                params![remote_id, local_id],
            )
            .context("failed to store annotation remote id")?;
        Ok(changed > 0)
    }

    /// Delete an annotation; its ranges go with it.
    pub fn delete(conn: &Connection, local_id: i64) -> Result<bool> {
        let changed = conn
            .execute("DELETE FROM annotations WHERE id = ?1", params![local_id])
            .context("failed to delete annotation row")?;
        Ok(changed > 0)
    }
}

fn ranges_for(conn: &Connection, local_id: i64) -> Result<Vec<AnnotationRange>> {
    let mut stmt = conn
        .prepare(
            "SELECT range_start, range_end, start_offset, end_offset \
             FROM annotation_ranges \
             WHERE annotation_local_id = ?1 \
             ORDER BY id ASC",
        )
        .context("failed to prepare annotation ranges query")?;

    let rows = stmt
        .query_map(params![local_id], |row| {
            Ok(AnnotationRange {
                start: row.get(0)?,
                end: row.get(1)?,
                start_offset: row.get(2)?,
                end_offset: row.get(3)?,
            })
        })
        .context("failed to query annotation ranges")?;

    rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect annotation ranges")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::articles::{ArticleStore, NewArticle};
    use crate::store::db::LocalDb;
    use chrono::Utc;

    fn sample() -> NewAnnotation {
        NewAnnotation {
            text: "note".into(),
            quote: Some("quoted words".into()),
            ranges: vec![AnnotationRange {
                start: "/p[1]".into(),
                end: "/p[1]".into(),
                start_offset: 3,
                end_offset: 15,
            }],
        }
    }

    fn seeded() -> (LocalDb, i64) {
        let db = LocalDb::open_in_memory().expect("database should open");
        let article_local_id = ArticleStore::insert(
            db.connection(),
            &NewArticle::new(1, "https://example.com", "t"),
            Utc::now(),
        )
        .expect("article insert");
        (db, article_local_id)
    }

    #[test]
    fn insert_and_read_back_with_ranges() {
        let (db, article_local_id) = seeded();
        let id = AnnotationStore::insert(db.connection(), article_local_id, &sample())
            .expect("annotation insert");

        let annotation = AnnotationStore::get(db.connection(), id).expect("query").expect("row");
        assert_eq!(annotation.annotation_id, None);
        assert_eq!(annotation.article_local_id, article_local_id);
        assert_eq!(annotation.text, "note");
        assert_eq!(annotation.ranges, sample().ranges);
    }

    #[test]
    fn remote_id_and_text_updates_persist() {
        let (db, article_local_id) = seeded();
        let id = AnnotationStore::insert(db.connection(), article_local_id, &sample())
            .expect("annotation insert");

        assert!(AnnotationStore::set_remote_id(db.connection(), id, 900).expect("set remote id"));
        assert!(AnnotationStore::update_text(db.connection(), id, "edited").expect("update"));

        let annotation = AnnotationStore::get(db.connection(), id).expect("query").expect("row");
        assert_eq!(annotation.annotation_id, Some(900));
        assert_eq!(annotation.text, "edited");
    }

    #[test]
    fn deleting_article_removes_annotations_and_ranges() {
        let (db, article_local_id) = seeded();
        let id = AnnotationStore::insert(db.connection(), article_local_id, &sample())
            .expect("annotation insert");

        ArticleStore::delete(db.connection(), article_local_id).expect("article delete");

        assert!(AnnotationStore::get(db.connection(), id).expect("query").is_none());
        let ranges: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM annotation_ranges", [], |row| row.get(0))
            .expect("count");
        assert_eq!(ranges, 0);
    }
}
