// Offline queue: durable, coalesced record of local mutations awaiting replay.
//
// Items flow through a small state machine:
//   pending → (replayed) → removed      (happy path, via `dequeue`)
//   pending → pending                   (soft failure, attempts += 1)
//   pending → dead                      (after `max` soft failures)
//   dead    → pending                   (`requeue_dead`, or an ArticleChange
//                                        merged into it)
//
// Queue position is the AUTOINCREMENT row id. Coalescing rewrites a payload in
// place, so a merged record keeps the position of its first enqueue.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shelf_common::change::{ArticleChangeType, ChangeKind, ChangeRecord, ChangeSet};

/// Lifecycle state of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Dead,
}

impl ItemState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dead => "dead",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A change record together with its queue bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: i64,
    pub record: ChangeRecord,
    pub state: ItemState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Offline queue backed by the `queue_items` table.
///
/// Borrows a connection (or a transaction, which derefs to one) so every
/// queue change shares the atomic unit of the entity mutation it accompanies.
pub struct OfflineQueue<'a> {
    conn: &'a Connection,
}

impl<'a> OfflineQueue<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Merge `change_type` into the article's `ArticleChange` record, creating
    /// one if none exists. A dead record for the article is revived. Returns
    /// whether the pending length changed.
    pub fn enqueue_article_change(
        &self,
        article_id: i64,
        change_type: ArticleChangeType,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let existing = self.find(ChangeKind::ArticleChange, Some(article_id), None)?;
        let Some(item) = existing.into_iter().next() else {
            self.insert(
                &ChangeRecord::ArticleChange { article_id, changes: ChangeSet::single(change_type) },
                now,
            )?;
            return Ok(true);
        };

        let ChangeRecord::ArticleChange { mut changes, .. } = item.record else {
            bail!("queue item {} has kind article_change but a different payload", item.id);
        };
        let merged = changes.insert(change_type);
        let revived = item.state == ItemState::Dead;

        if merged || revived {
            self.rewrite(
                item.id,
                &ChangeRecord::ArticleChange { article_id, changes },
                ItemState::Pending,
                now,
            )?;
        }
        if revived {
            tracing::info!(queue_item = item.id, article_id, "revived dead article change");
        }

        Ok(revived)
    }

    /// Append tag ids to the article's `TagsDelete` record, creating one if
    /// none exists. Ids already present are skipped. A dead record for the
    /// article is revived, so there is at most one per article. Returns
    /// whether the pending length changed.
    pub fn enqueue_tags_delete(
        &self,
        article_id: i64,
        tag_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if tag_ids.is_empty() {
            return Ok(false);
        }

        let existing = self.find(ChangeKind::TagsDelete, Some(article_id), None)?;
        let Some(item) = existing.into_iter().next() else {
            let mut unique: Vec<String> = Vec::with_capacity(tag_ids.len());
            for tag_id in tag_ids {
                if !unique.contains(tag_id) {
                    unique.push(tag_id.clone());
                }
            }
            self.insert(&ChangeRecord::TagsDelete { article_id, tag_ids: unique }, now)?;
            return Ok(true);
        };

        let ChangeRecord::TagsDelete { tag_ids: mut queued, .. } = item.record else {
            bail!("queue item {} has kind tags_delete but a different payload", item.id);
        };
        let before = queued.len();
        for tag_id in tag_ids {
            if !queued.contains(tag_id) {
                queued.push(tag_id.clone());
            }
        }
        let revived = item.state == ItemState::Dead;
        if queued.len() != before || revived {
            self.rewrite(
                item.id,
                &ChangeRecord::TagsDelete { article_id, tag_ids: queued },
                ItemState::Pending,
                now,
            )?;
        }
        if revived {
            tracing::info!(queue_item = item.id, article_id, "revived dead tags delete");
        }

        Ok(revived)
    }

    pub fn enqueue_annotation_add(
        &self,
        article_id: i64,
        local_annotation_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.insert(&ChangeRecord::AnnotationAdd { article_id, local_annotation_id }, now)?;
        Ok(true)
    }

    /// No-op when a pending add or update for the same local annotation is
    /// already queued: both replay the annotation's current text.
    pub fn enqueue_annotation_update(
        &self,
        article_id: i64,
        local_annotation_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        for kind in [ChangeKind::AnnotationAdd, ChangeKind::AnnotationUpdate] {
            let covered = self
                .find(kind, Some(article_id), Some(ItemState::Pending))?
                .iter()
                .any(|item| match &item.record {
                    ChangeRecord::AnnotationAdd { local_annotation_id: id, .. }
                    | ChangeRecord::AnnotationUpdate { local_annotation_id: id, .. } => {
                        *id == local_annotation_id
                    }
                    _ => false,
                });
            if covered {
                tracing::debug!(
                    article_id,
                    local_annotation_id,
                    "annotation update already covered by a queued record"
                );
                return Ok(false);
            }
        }

        self.insert(&ChangeRecord::AnnotationUpdate { article_id, local_annotation_id }, now)?;
        Ok(true)
    }

    pub fn enqueue_annotation_delete(
        &self,
        article_id: i64,
        remote_annotation_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.insert(&ChangeRecord::AnnotationDelete { article_id, remote_annotation_id }, now)?;
        Ok(true)
    }

    pub fn enqueue_link(
        &self,
        url: &str,
        origin_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.insert(
            &ChangeRecord::AddLink {
                url: url.to_string(),
                origin_url: origin_url.map(str::to_string),
            },
            now,
        )?;
        Ok(true)
    }

    pub fn enqueue_article_delete(&self, article_id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.insert(&ChangeRecord::ArticleDelete { article_id }, now)?;
        Ok(true)
    }

    /// Drop every record (pending or dead) for the article except its
    /// `ArticleDelete`. Used when the article itself is deleted locally.
    pub fn drop_article_records(&self, article_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM queue_items WHERE article_id = ?1 AND kind != ?2",
                params![article_id, ChangeKind::ArticleDelete.as_str()],
            )
            .context("failed to drop queued records for article")
    }

    /// Drop the add and update records (pending or dead) of one local
    /// annotation. Used when the annotation is deleted locally.
    pub fn drop_annotation_records(
        &self,
        article_id: i64,
        local_annotation_id: i64,
    ) -> Result<usize> {
        let mut dropped = 0;
        for kind in [ChangeKind::AnnotationAdd, ChangeKind::AnnotationUpdate] {
            for item in self.find(kind, Some(article_id), None)? {
                let matches = match &item.record {
                    ChangeRecord::AnnotationAdd { local_annotation_id: id, .. }
                    | ChangeRecord::AnnotationUpdate { local_annotation_id: id, .. } => {
                        *id == local_annotation_id
                    }
                    _ => false,
                };
                if matches {
                    self.dequeue(&[item.id])?;
                    dropped += 1;
                }
            }
        }
        Ok(dropped)
    }

    /// Remove exactly the given items.
    ///
    /// A missing id means another writer touched the queue, which the
    /// single-worker model rules out. It is reported as an error so the
    /// enclosing transaction rolls back.
    pub fn dequeue(&self, ids: &[i64]) -> Result<()> {
        for id in ids {
            let removed = self
                .conn
                .execute("DELETE FROM queue_items WHERE id = ?1", params![id])
                .context("failed to delete queue item")?;
            if removed == 0 {
                bail!("queue item {id} vanished before dequeue");
            }
        }
        Ok(())
    }

    /// Number of pending items. Dead items are not counted.
    pub fn length(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM queue_items WHERE state = ?1",
                params![ItemState::Pending.as_str()],
                |row| row.get(0),
            )
            .context("failed to count pending queue items")?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Pending items in queue order.
    pub fn items(&self) -> Result<Vec<QueueItem>> {
        self.select_by_state(ItemState::Pending)
    }

    pub fn dead_items(&self) -> Result<Vec<QueueItem>> {
        self.select_by_state(ItemState::Dead)
    }

    /// Record a soft replay failure. The item moves to `dead` once its
    /// attempts reach `max_attempts`. Returns the item's new state.
    pub fn record_soft_failure(
        &self,
        id: i64,
        message: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<ItemState> {
        let attempts: u32 = self
            .conn
            .query_row("SELECT attempts FROM queue_items WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .context("failed to read queue item attempts")?
            .with_context(|| format!("queue item {id} vanished before failure was recorded"))?;

        let attempts = attempts.saturating_add(1);
        let state =
            if attempts >= max_attempts.max(1) { ItemState::Dead } else { ItemState::Pending };

        self.conn
            .execute(
                "UPDATE queue_items SET state = ?1, attempts = ?2, last_error = ?3, \
                 updated_at = ?4 WHERE id = ?5",
                params![state.as_str(), attempts, message, now.to_rfc3339(), id],
            )
            .context("failed to record queue item failure")?;

        Ok(state)
    }

    /// Move every dead item back to pending with a fresh attempt count.
    pub fn requeue_dead(&self, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE queue_items SET state = ?1, attempts = 0, updated_at = ?2 \
                 WHERE state = ?3",
                params![ItemState::Pending.as_str(), now.to_rfc3339(), ItemState::Dead.as_str()],
            )
            .context("failed to requeue dead queue items")
    }

    pub fn discard_dead(&self) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM queue_items WHERE state = ?1",
                params![ItemState::Dead.as_str()],
            )
            .context("failed to discard dead queue items")
    }

    pub fn clear(&self) -> Result<usize> {
        self.conn.execute("DELETE FROM queue_items", []).context("failed to clear queue")
    }

    // ── Internals ───────────────────────────────────────────────────

    fn insert(&self, record: &ChangeRecord, now: DateTime<Utc>) -> Result<i64> {
        let payload = serde_json::to_string(record).context("failed to encode change record")?;
        self.conn
            .execute(
                "INSERT INTO queue_items \
                 (kind, article_id, payload, created_at, state, attempts, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?4)",
                params![
                    record.kind().as_str(),
                    record.article_id(),
                    payload,
                    now.to_rfc3339(),
                    ItemState::Pending.as_str(),
                ],
            )
            .context("failed to insert queue item")?;

        let id = self.conn.last_insert_rowid();
        tracing::debug!(queue_item = id, kind = record.kind().as_str(), "queued change");
        Ok(id)
    }

    fn rewrite(
        &self,
        id: i64,
        record: &ChangeRecord,
        state: ItemState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let payload = serde_json::to_string(record).context("failed to encode change record")?;
        // A dead item coming back to pending starts a fresh retry budget.
        self.conn
            .execute(
                "UPDATE queue_items SET payload = ?1, updated_at = ?2, \
                 attempts = CASE WHEN state = 'dead' AND ?3 = 'pending' THEN 0 ELSE attempts END, \
                 state = ?3 WHERE id = ?4",
                params![payload, now.to_rfc3339(), state.as_str(), id],
            )
            .context("failed to rewrite queue item")?;
        Ok(())
    }

    fn find(
        &self,
        kind: ChangeKind,
        article_id: Option<i64>,
        state: Option<ItemState>,
    ) -> Result<Vec<QueueItem>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, payload, state, attempts, last_error, created_at \
                 FROM queue_items \
                 WHERE kind = ?1 AND article_id IS ?2 AND (?3 IS NULL OR state = ?3) \
                 ORDER BY id ASC",
            )
            .context("failed to prepare queue lookup query")?;

        let rows = stmt
            .query_map(
                params![kind.as_str(), article_id, state.map(ItemState::as_str)],
                row_to_item,
            )
            .context("failed to query queue items by kind")?;

        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect queue items")
    }

    fn select_by_state(&self, state: ItemState) -> Result<Vec<QueueItem>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, payload, state, attempts, last_error, created_at \
                 FROM queue_items \
                 WHERE state = ?1 \
                 ORDER BY id ASC",
            )
            .context("failed to prepare queue items query")?;

        let rows = stmt
            .query_map(params![state.as_str()], row_to_item)
            .context("failed to query queue items")?;

        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect queue items")
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let payload: String = row.get(1)?;
    let record = serde_json::from_str::<ChangeRecord>(&payload).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(error))
    })?;
    let state_str: String = row.get(2)?;
    let created_str: String = row.get(5)?;

    Ok(QueueItem {
        id: row.get(0)?,
        record,
        state: ItemState::parse(&state_str).unwrap_or(ItemState::Pending),
        attempts: row.get(3)?,
        last_error: row.get(4)?,
        created_at: created_str.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::LocalDb;

    fn setup() -> LocalDb {
        LocalDb::open_in_memory().expect("database should open")
    }

    fn records(q: &OfflineQueue<'_>) -> Vec<ChangeRecord> {
        q.items().expect("items").into_iter().map(|item| item.record).collect()
    }

    // ── Article change coalescing ───────────────────────────────────

    #[test]
    fn article_changes_for_same_article_merge_into_one_record() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        assert!(q.enqueue_article_change(5, ArticleChangeType::Archive, now).expect("first"));
        assert!(!q.enqueue_article_change(5, ArticleChangeType::Favorite, now).expect("second"));
        assert!(!q.enqueue_article_change(5, ArticleChangeType::Archive, now).expect("repeat"));

        assert_eq!(q.length().expect("length"), 1);
        assert_eq!(
            records(&q),
            vec![ChangeRecord::ArticleChange {
                article_id: 5,
                changes: [ArticleChangeType::Archive, ArticleChangeType::Favorite]
                    .into_iter()
                    .collect(),
            }]
        );
    }

    #[test]
    fn merged_article_change_keeps_original_position() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue_article_change(1, ArticleChangeType::Title, now).expect("a1");
        q.enqueue_article_delete(2, now).expect("delete 2");
        q.enqueue_article_change(1, ArticleChangeType::Tags, now).expect("a1 again");

        let kinds: Vec<ChangeKind> = records(&q).iter().map(ChangeRecord::kind).collect();
        assert_eq!(kinds, vec![ChangeKind::ArticleChange, ChangeKind::ArticleDelete]);
    }

    #[test]
    fn article_change_revives_dead_record() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue_article_change(9, ArticleChangeType::Archive, now).expect("enqueue");
        let id = q.items().expect("items")[0].id;
        assert_eq!(q.record_soft_failure(id, "gone", 1, now).expect("fail"), ItemState::Dead);
        assert_eq!(q.length().expect("length"), 0);

        assert!(q.enqueue_article_change(9, ArticleChangeType::Title, now).expect("revive"));

        let items = q.items().expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].attempts, 0);
        assert!(q.dead_items().expect("dead").is_empty());
    }

    // ── Tag deletion ────────────────────────────────────────────────

    #[test]
    fn tags_delete_appends_without_duplicates() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        assert!(q
            .enqueue_tags_delete(3, &["1".to_string(), "2".to_string(), "1".to_string()], now)
            .expect("first"));
        assert!(!q
            .enqueue_tags_delete(3, &["2".to_string(), "7".to_string()], now)
            .expect("second"));

        assert_eq!(
            records(&q),
            vec![ChangeRecord::TagsDelete {
                article_id: 3,
                tag_ids: vec!["1".into(), "2".into(), "7".into()],
            }]
        );
    }

    #[test]
    fn tags_delete_revives_dead_record_instead_of_duplicating() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue_tags_delete(3, &["1".to_string()], now).expect("first");
        let id = q.items().expect("items")[0].id;
        q.record_soft_failure(id, "rejected", 1, now).expect("fail");
        assert_eq!(q.length().expect("length"), 0);

        assert!(q.enqueue_tags_delete(3, &["2".to_string()], now).expect("second"));
        assert_eq!(q.requeue_dead(now).expect("requeue"), 0);

        let items = q.items().expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].attempts, 0);
        assert_eq!(
            items[0].record,
            ChangeRecord::TagsDelete { article_id: 3, tag_ids: vec!["1".into(), "2".into()] }
        );
    }

    #[test]
    fn empty_tags_delete_queues_nothing() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());

        assert!(!q.enqueue_tags_delete(3, &[], Utc::now()).expect("enqueue"));
        assert_eq!(q.length().expect("length"), 0);
    }

    // ── Annotations ─────────────────────────────────────────────────

    #[test]
    fn annotation_update_after_pending_add_collapses() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        assert!(q.enqueue_annotation_add(4, 10, now).expect("add"));
        assert!(!q.enqueue_annotation_update(4, 10, now).expect("update"));
        // A different annotation on the same article is not covered.
        assert!(q.enqueue_annotation_update(4, 11, now).expect("other update"));
        assert!(!q.enqueue_annotation_update(4, 11, now).expect("repeat update"));

        assert_eq!(q.length().expect("length"), 2);
    }

    #[test]
    fn annotation_deletes_are_plain_appends() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        assert!(q.enqueue_annotation_delete(4, 100, now).expect("first"));
        assert!(q.enqueue_annotation_delete(4, 100, now).expect("second"));
        assert_eq!(q.length().expect("length"), 2);
    }

    #[test]
    fn dropping_annotation_records_leaves_other_annotations() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue_annotation_add(4, 10, now).expect("add 10");
        q.enqueue_annotation_update(4, 11, now).expect("update 11");
        q.enqueue_annotation_delete(4, 500, now).expect("delete remote");
        let dead = q.items().expect("items")[1].id;
        q.record_soft_failure(dead, "gone", 1, now).expect("fail");

        assert_eq!(q.drop_annotation_records(4, 11).expect("drop 11"), 1);
        assert!(q.dead_items().expect("dead").is_empty());
        assert_eq!(q.drop_annotation_records(4, 10).expect("drop 10"), 1);
        assert_eq!(
            records(&q),
            vec![ChangeRecord::AnnotationDelete { article_id: 4, remote_annotation_id: 500 }]
        );
    }

    // ── Links and deletes ───────────────────────────────────────────

    #[test]
    fn dropping_article_records_keeps_its_delete_and_other_articles() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue_article_change(6, ArticleChangeType::Title, now).expect("change");
        q.enqueue_tags_delete(6, &["3".to_string()], now).expect("tags");
        q.enqueue_annotation_add(6, 1, now).expect("annotation");
        q.enqueue_article_change(7, ArticleChangeType::Archive, now).expect("other article");
        q.enqueue_link("https://a.example", None, now).expect("link");
        q.enqueue_article_delete(6, now).expect("delete");

        assert_eq!(q.drop_article_records(6).expect("drop"), 3);
        assert_eq!(
            records(&q),
            vec![
                ChangeRecord::ArticleChange {
                    article_id: 7,
                    changes: ChangeSet::single(ArticleChangeType::Archive),
                },
                ChangeRecord::AddLink { url: "https://a.example".into(), origin_url: None },
                ChangeRecord::ArticleDelete { article_id: 6 },
            ]
        );
    }

    #[test]
    fn link_record_keeps_origin() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());

        q.enqueue_link("https://a.example", Some("https://from.example"), Utc::now())
            .expect("enqueue");

        assert_eq!(
            records(&q),
            vec![ChangeRecord::AddLink {
                url: "https://a.example".into(),
                origin_url: Some("https://from.example".into()),
            }]
        );
    }

    // ── Dequeue ─────────────────────────────────────────────────────

    #[test]
    fn dequeue_removes_exactly_the_given_items() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        for article_id in 1..=4 {
            q.enqueue_article_delete(article_id, now).expect("enqueue");
        }
        let ids: Vec<i64> = q.items().expect("items").iter().map(|item| item.id).collect();

        q.dequeue(&[ids[0], ids[2]]).expect("dequeue");

        assert_eq!(
            records(&q),
            vec![
                ChangeRecord::ArticleDelete { article_id: 2 },
                ChangeRecord::ArticleDelete { article_id: 4 },
            ]
        );
    }

    #[test]
    fn dequeue_of_missing_item_fails_and_rolls_back() {
        let mut db = setup();
        let now = Utc::now();
        {
            let q = OfflineQueue::new(db.connection());
            q.enqueue_article_delete(1, now).expect("enqueue");
        }
        let id = OfflineQueue::new(db.connection()).items().expect("items")[0].id;

        {
            let tx = db.transaction().expect("transaction");
            let q = OfflineQueue::new(&tx);
            let error = q.dequeue(&[id, id + 100]).expect_err("missing id should fail");
            assert!(error.to_string().contains("vanished"));
        }

        assert_eq!(OfflineQueue::new(db.connection()).length().expect("length"), 1);
    }

    // ── Bounded retry ───────────────────────────────────────────────

    #[test]
    fn soft_failures_move_item_to_dead_after_max_attempts() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue_annotation_add(1, 2, now).expect("enqueue");
        let id = q.items().expect("items")[0].id;

        assert_eq!(q.record_soft_failure(id, "missing", 3, now).expect("1"), ItemState::Pending);
        assert_eq!(q.record_soft_failure(id, "missing", 3, now).expect("2"), ItemState::Pending);
        assert_eq!(q.record_soft_failure(id, "missing", 3, now).expect("3"), ItemState::Dead);

        assert_eq!(q.length().expect("length"), 0);
        let dead = q.dead_items().expect("dead");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].last_error.as_deref(), Some("missing"));
    }

    #[test]
    fn requeue_and_discard_dead_items() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue_article_delete(1, now).expect("enqueue 1");
        q.enqueue_article_delete(2, now).expect("enqueue 2");
        for item in q.items().expect("items") {
            q.record_soft_failure(item.id, "rejected", 1, now).expect("fail");
        }

        assert_eq!(q.requeue_dead(now).expect("requeue"), 2);
        assert_eq!(q.length().expect("length"), 2);
        assert!(q.items().expect("items").iter().all(|item| item.attempts == 0));

        let first = q.items().expect("items")[0].id;
        q.record_soft_failure(first, "rejected", 1, now).expect("fail again");
        assert_eq!(q.discard_dead().expect("discard"), 1);
        assert_eq!(records(&q), vec![ChangeRecord::ArticleDelete { article_id: 2 }]);
    }

    #[test]
    fn clear_empties_the_queue() {
        let db = setup();
        let q = OfflineQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue_link("https://a.example", None, now).expect("enqueue");
        q.enqueue_article_delete(1, now).expect("enqueue");

        assert_eq!(q.clear().expect("clear"), 2);
        assert_eq!(q.length().expect("length"), 0);
    }

    #[test]
    fn item_state_round_trips() {
        for state in [ItemState::Pending, ItemState::Dead] {
            assert_eq!(ItemState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ItemState::parse("acked"), None);
    }
}
