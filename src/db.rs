use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result, Row};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        name: "baseline_diary_schema_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    entry_date TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    subpath TEXT NOT NULL,
    file_type TEXT NOT NULL DEFAULT '',
    file_date TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entry_files (
    entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    PRIMARY KEY (entry_id, file_id)
);

CREATE INDEX IF NOT EXISTS idx_entry_files_file ON entry_files(file_id);
"#,
    },
    Migration {
        version: 2,
        name: "file_checksums_v1",
        sql: r#"
ALTER TABLE files ADD COLUMN size INTEGER NOT NULL DEFAULT 0;
ALTER TABLE files ADD COLUMN sha256 TEXT NOT NULL DEFAULT '';

CREATE INDEX IF NOT EXISTS idx_entries_entry_date ON entries(entry_date);
CREATE INDEX IF NOT EXISTS idx_files_sha256 ON files(sha256);
"#,
    },
];

pub fn open_connection(path: &str) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure_for_speed(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure_for_speed(conn: &Connection) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub id: i64,
    pub title: String,
    pub text: String,
    pub entry_date: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct EntryWrite<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub entry_date: &'a str,
}

const ENTRY_COLUMNS: &str = "id, title, text, entry_date, created_at, updated_at";

fn entry_from_row(row: &Row<'_>) -> Result<EntryRecord> {
    Ok(EntryRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        text: row.get(2)?,
        entry_date: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn insert_entry(conn: &Connection, args: &EntryWrite<'_>) -> Result<i64> {
    let now = now_utc_rfc3339();
    conn.execute(
        r#"
INSERT INTO entries (title, text, entry_date, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?4)
"#,
        params![args.title, args.text, args.entry_date, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns the number of rows touched, zero when `id` is unknown.
pub fn update_entry(conn: &Connection, id: i64, args: &EntryWrite<'_>) -> Result<usize> {
    conn.execute(
        r#"
UPDATE entries
SET title = ?2, text = ?3, entry_date = ?4, updated_at = ?5
WHERE id = ?1
"#,
        params![id, args.title, args.text, args.entry_date, now_utc_rfc3339()],
    )
}

pub fn delete_entry(conn: &Connection, id: i64) -> Result<usize> {
    conn.execute("DELETE FROM entries WHERE id = ?1", params![id])
}

pub fn get_entry(conn: &Connection, id: i64) -> Result<Option<EntryRecord>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
        params![id],
        entry_from_row,
    )
    .optional()
}

pub fn list_entries(conn: &Connection) -> Result<Vec<EntryRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries ORDER BY entry_date DESC, id DESC"
    ))?;
    let rows = stmt.query_map([], entry_from_row)?;
    rows.collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub subpath: String,
    pub file_type: String,
    pub file_date: String,
    pub size: i64,
    pub sha256: String,
}

pub struct FileWrite<'a> {
    pub name: &'a str,
    pub subpath: &'a str,
    pub file_type: &'a str,
    pub file_date: &'a str,
    pub size: i64,
    pub sha256: &'a str,
}

const FILE_COLUMNS: &str = "f.id, f.name, f.subpath, f.file_type, f.file_date, f.size, f.sha256";

fn file_from_row(row: &Row<'_>) -> Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        subpath: row.get(2)?,
        file_type: row.get(3)?,
        file_date: row.get(4)?,
        size: row.get(5)?,
        sha256: row.get(6)?,
    })
}

pub fn insert_file(conn: &Connection, args: &FileWrite<'_>) -> Result<i64> {
    conn.execute(
        r#"
INSERT INTO files (name, subpath, file_type, file_date, size, sha256, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
        params![
            args.name,
            args.subpath,
            args.file_type,
            args.file_date,
            args.size,
            args.sha256,
            now_utc_rfc3339()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_file(conn: &Connection, id: i64) -> Result<Option<FileRecord>> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM files f WHERE f.id = ?1"),
        params![id],
        file_from_row,
    )
    .optional()
}

pub fn find_file_by_location(
    conn: &Connection,
    subpath: &str,
    name: &str,
) -> Result<Option<FileRecord>> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM files f WHERE f.subpath = ?1 AND f.name = ?2"),
        params![subpath, name],
        file_from_row,
    )
    .optional()
}

pub fn list_files(conn: &Connection) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FILE_COLUMNS} FROM files f ORDER BY f.file_date DESC, f.id ASC"
    ))?;
    let rows = stmt.query_map([], file_from_row)?;
    rows.collect()
}

pub fn delete_file(conn: &Connection, id: i64) -> Result<usize> {
    conn.execute("DELETE FROM files WHERE id = ?1", params![id])
}

pub fn link_file(conn: &Connection, entry_id: i64, file_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO entry_files (entry_id, file_id) VALUES (?1, ?2)",
        params![entry_id, file_id],
    )?;
    Ok(())
}

pub fn unlink_file(conn: &Connection, entry_id: i64, file_id: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM entry_files WHERE entry_id = ?1 AND file_id = ?2",
        params![entry_id, file_id],
    )
}

pub fn list_files_for_entry(conn: &Connection, entry_id: i64) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(&format!(
        r#"
SELECT {FILE_COLUMNS}
FROM files f
JOIN entry_files ef ON ef.file_id = f.id
WHERE ef.entry_id = ?1
ORDER BY f.id ASC
"#
    ))?;
    let rows = stmt.query_map(params![entry_id], file_from_row)?;
    rows.collect()
}

pub fn list_entry_ids_for_file(conn: &Connection, file_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT entry_id FROM entry_files WHERE file_id = ?1 ORDER BY entry_id")?;
    let rows = stmt.query_map(params![file_id], |row| row.get(0))?;
    rows.collect()
}

pub fn count_file_links(conn: &Connection, file_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM entry_files WHERE file_id = ?1",
        params![file_id],
        |row| row.get(0),
    )
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}
