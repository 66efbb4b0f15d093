use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Transaction};

use crate::queue::OfflineQueue;

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE articles (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id      INTEGER NOT NULL UNIQUE,
    url             TEXT NOT NULL,
    origin_url      TEXT NULL,
    title           TEXT NOT NULL DEFAULT '',
    archived        INTEGER NOT NULL DEFAULT 0,
    favorite        INTEGER NOT NULL DEFAULT 0,
    progress        REAL NOT NULL DEFAULT 0,
    updated_at      TEXT NOT NULL
);

CREATE TABLE tags (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tag_id          INTEGER NULL UNIQUE,
    label           TEXT NOT NULL UNIQUE
);

CREATE TABLE article_tags (
    article_local_id    INTEGER NOT NULL REFERENCES articles (id) ON DELETE CASCADE,
    tag_local_id        INTEGER NOT NULL REFERENCES tags (id) ON DELETE CASCADE,
    PRIMARY KEY (article_local_id, tag_local_id)
);

CREATE TABLE annotations (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    annotation_id       INTEGER NULL,
    article_local_id    INTEGER NOT NULL REFERENCES articles (id) ON DELETE CASCADE,
    text                TEXT NOT NULL,
    quote               TEXT NULL
);

CREATE TABLE annotation_ranges (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    annotation_local_id     INTEGER NOT NULL REFERENCES annotations (id) ON DELETE CASCADE,
    range_start             TEXT NOT NULL,
    range_end               TEXT NOT NULL,
    start_offset            INTEGER NOT NULL,
    end_offset              INTEGER NOT NULL
);

CREATE TABLE queue_items (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    kind            TEXT NOT NULL,
    article_id      INTEGER NULL,
    payload         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX queue_items_lookup_idx
    ON queue_items (kind, article_id);
"#;

const MIGRATION_V2_SQL: &str = r#"
ALTER TABLE queue_items ADD COLUMN state TEXT NOT NULL DEFAULT 'pending';
ALTER TABLE queue_items ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE queue_items ADD COLUMN last_error TEXT NULL;
ALTER TABLE queue_items ADD COLUMN updated_at TEXT NULL;

CREATE INDEX queue_items_state_idx
    ON queue_items (state, id);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL)];

/// The local SQLite database: entity tables plus the offline queue.
///
/// Owned by exactly one task runner worker. Every mutation that must be
/// atomic with a queue change goes through [`LocalDb::transaction`].
#[derive(Debug)]
pub struct LocalDb {
    conn: Connection,
}

impl LocalDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at `{}`", path.display()))?;
        Self::init(conn, "WAL")
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init(conn, "MEMORY")
    }

    fn init(mut conn: Connection, journal_mode: &str) -> Result<Self> {
        conn.execute_batch(&format!(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = {journal_mode};
            "
        ))
        .context("failed to configure sqlite pragmas")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Starts an all-or-nothing unit. Dropping the transaction without
    /// committing rolls every statement back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.conn.transaction().context("failed to start database transaction")
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }

    /// Removes every entity row and every queued change.
    pub fn wipe(&mut self) -> Result<()> {
        let tx = self.transaction()?;
        clear_entities(&tx)?;
        OfflineQueue::new(&tx).clear()?;
        tx.commit().context("failed to commit database wipe")
    }
}

/// Removes every entity row. Queued changes are left alone.
pub fn clear_entities(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        DELETE FROM annotation_ranges;
        DELETE FROM annotations;
        DELETE FROM article_tags;
        DELETE FROM tags;
        DELETE FROM articles;
        ",
    )
    .context("failed to clear local entities")
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply database migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}
