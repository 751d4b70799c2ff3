use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::{self, EntryRecord, EntryWrite, FileRecord, FileWrite};
use crate::domain::entry::{
    format_date, parse_date, validate_attachment, validate_entry, Attachment, DomainError, Entry,
};
use crate::validity::{guard, Component, InvalidState, RuleSet};

const MEMORY_TARGET: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Memory,
    File(PathBuf),
}

impl DatabaseTarget {
    /// Accepts `:memory:` or a filesystem path. Server URLs are rejected.
    pub fn parse(raw: &str) -> Result<Self, DbError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == MEMORY_TARGET {
            return Ok(DatabaseTarget::Memory);
        }
        if trimmed.contains("://") {
            return Err(DbError::Unsupported(trimmed.to_string()));
        }
        Ok(DatabaseTarget::File(PathBuf::from(trimmed)))
    }

    pub fn display(&self) -> String {
        match self {
            DatabaseTarget::Memory => MEMORY_TARGET.to_string(),
            DatabaseTarget::File(path) => path.display().to_string(),
        }
    }
}

/// Work queued for the next [`DbManager::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pub create: Vec<Entry>,
    pub update: Vec<Entry>,
    pub delete: Vec<i64>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    fn clear(&mut self) {
        self.create.clear();
        self.update.clear();
        self.delete.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub created: Vec<Entry>,
    pub updated: usize,
    pub deleted: usize,
}

/// Diary persistence over SQLite.
///
/// Entry changes are queued and applied together by `commit`. Reads, commits
/// and attachment bookkeeping all require an initialized connection.
#[derive(Debug)]
pub struct DbManager {
    conn: Option<Connection>,
    target: Option<DatabaseTarget>,
    pending: PendingChanges,
    rules: RuleSet<DbManager>,
}

impl Component for DbManager {
    fn rules(&self) -> &RuleSet<Self> {
        &self.rules
    }
}

impl Default for DbManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DbManager {
    pub fn new() -> Self {
        let mut rules = RuleSet::new();
        rules.forbid("engine", |db: &DbManager| db.conn.is_some(), false, false);
        let target = rules.forbid("target", |db: &DbManager| db.target.clone(), None, false);
        Self {
            conn: None,
            target,
            pending: PendingChanges::default(),
            rules,
        }
    }

    pub fn initialize(&mut self, target: DatabaseTarget) -> Result<(), DbError> {
        let conn = match &target {
            DatabaseTarget::Memory => db::open_in_memory()?,
            DatabaseTarget::File(path) => {
                ensure_parent_dir(path)?;
                db::open_connection(&path.display().to_string())?
            }
        };
        info!(target = %target.display(), "database initialized");
        self.conn = Some(conn);
        self.target = Some(target);
        Ok(())
    }

    pub fn target(&self) -> Option<&DatabaseTarget> {
        self.target.as_ref()
    }

    pub fn create(&mut self, entries: impl IntoIterator<Item = Entry>) -> Result<(), DbError> {
        for entry in entries {
            validate_entry(&entry)?;
            if !self.pending.create.contains(&entry) {
                self.pending.create.push(entry);
            }
        }
        Ok(())
    }

    /// Queues entries for update. A later update of the same id replaces the
    /// queued one.
    pub fn update(&mut self, entries: impl IntoIterator<Item = Entry>) -> Result<(), DbError> {
        for entry in entries {
            let id = entry.id.ok_or(DbError::MissingId)?;
            validate_entry(&entry)?;
            match self
                .pending
                .update
                .iter_mut()
                .find(|queued| queued.id == Some(id))
            {
                Some(queued) => *queued = entry,
                None => self.pending.update.push(entry),
            }
        }
        Ok(())
    }

    pub fn delete(&mut self, entries: impl IntoIterator<Item = Entry>) -> Result<(), DbError> {
        for entry in entries {
            let id = entry.id.ok_or(DbError::MissingId)?;
            if !self.pending.delete.contains(&id) {
                self.pending.delete.push(id);
            }
        }
        Ok(())
    }

    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    /// Applies queued creates, then updates, then deletes in one transaction.
    /// On failure nothing is written and the queue is kept.
    pub fn commit(&mut self) -> Result<CommitSummary, DbError> {
        self.ensure_valid()?;
        if self.pending.is_empty() {
            debug!("nothing queued, commit skipped");
            return Ok(CommitSummary {
                created: Vec::new(),
                updated: 0,
                deleted: 0,
            });
        }
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(not_ready()),
        };
        let tx = conn.transaction()?;

        let mut created = Vec::with_capacity(self.pending.create.len());
        for entry in &self.pending.create {
            let date = format_date(entry.date);
            let id = db::insert_entry(&tx, &entry_write(entry, &date))?;
            let mut stored = entry.clone();
            stored.id = Some(id);
            created.push(stored);
        }
        for entry in &self.pending.update {
            let id = entry.id.ok_or(DbError::MissingId)?;
            let date = format_date(entry.date);
            if db::update_entry(&tx, id, &entry_write(entry, &date))? == 0 {
                return Err(DbError::NotFound { kind: "entry", id });
            }
        }
        for id in &self.pending.delete {
            if db::delete_entry(&tx, *id)? == 0 {
                return Err(DbError::NotFound {
                    kind: "entry",
                    id: *id,
                });
            }
        }
        tx.commit()?;

        let summary = CommitSummary {
            created,
            updated: self.pending.update.len(),
            deleted: self.pending.delete.len(),
        };
        self.pending.clear();
        info!(
            created = summary.created.len(),
            updated = summary.updated,
            deleted = summary.deleted,
            "transaction committed"
        );
        Ok(summary)
    }

    pub fn entries(&self) -> Result<Vec<Entry>, DbError> {
        let conn = self.connection()?;
        db::list_entries(conn)?
            .into_iter()
            .map(entry_from_record)
            .collect()
    }

    pub fn entry(&self, id: i64) -> Result<Option<Entry>, DbError> {
        let conn = self.connection()?;
        db::get_entry(conn, id)?.map(entry_from_record).transpose()
    }

    pub fn files(&self) -> Result<Vec<Attachment>, DbError> {
        let conn = self.connection()?;
        db::list_files(conn)?
            .into_iter()
            .map(attachment_from_record)
            .collect()
    }

    pub fn file(&self, id: i64) -> Result<Option<Attachment>, DbError> {
        let conn = self.connection()?;
        db::get_file(conn, id)?
            .map(attachment_from_record)
            .transpose()
    }

    pub fn files_for_entry(&self, entry_id: i64) -> Result<Vec<Attachment>, DbError> {
        let conn = self.connection()?;
        db::list_files_for_entry(conn, entry_id)?
            .into_iter()
            .map(attachment_from_record)
            .collect()
    }

    /// Files not attached to `entry_id`, the candidates for a new link.
    pub fn files_excluding_entry(&self, entry_id: i64) -> Result<Vec<Attachment>, DbError> {
        let linked = self.files_for_entry(entry_id)?;
        let all = self.files()?;
        Ok(all
            .into_iter()
            .filter(|file| !linked.iter().any(|l| l.id == file.id))
            .collect())
    }

    pub fn unlinked_files(&self) -> Result<Vec<Attachment>, DbError> {
        let mut orphans = Vec::new();
        for file in self.files()? {
            if let Some(id) = file.id {
                if self.file_link_count(id)? == 0 {
                    orphans.push(file);
                }
            }
        }
        Ok(orphans)
    }

    pub fn entry_ids_for_file(&self, file_id: i64) -> Result<Vec<i64>, DbError> {
        let conn = self.connection()?;
        Ok(db::list_entry_ids_for_file(conn, file_id)?)
    }

    /// Records a stored file. A row already pointing at the same location is
    /// reused.
    pub fn add_file(&self, attachment: &Attachment) -> Result<Attachment, DbError> {
        let conn = self.connection()?;
        validate_attachment(attachment)?;
        if let Some(existing) =
            db::find_file_by_location(conn, &attachment.subpath, &attachment.name)?
        {
            debug!(file_id = existing.id, "reusing file row");
            return attachment_from_record(existing);
        }
        let date = format_date(attachment.date);
        let id = db::insert_file(
            conn,
            &FileWrite {
                name: &attachment.name,
                subpath: &attachment.subpath,
                file_type: &attachment.file_type,
                file_date: &date,
                size: i64::try_from(attachment.size).unwrap_or(i64::MAX),
                sha256: &attachment.sha256,
            },
        )?;
        let mut stored = attachment.clone();
        stored.id = Some(id);
        Ok(stored)
    }

    pub fn link(&self, entry_id: i64, file_id: i64) -> Result<(), DbError> {
        let conn = self.connection()?;
        if db::get_entry(conn, entry_id)?.is_none() {
            return Err(DbError::NotFound {
                kind: "entry",
                id: entry_id,
            });
        }
        if db::get_file(conn, file_id)?.is_none() {
            return Err(DbError::NotFound {
                kind: "file",
                id: file_id,
            });
        }
        db::link_file(conn, entry_id, file_id)?;
        Ok(())
    }

    pub fn unlink(&self, entry_id: i64, file_id: i64) -> Result<bool, DbError> {
        let conn = self.connection()?;
        Ok(db::unlink_file(conn, entry_id, file_id)? > 0)
    }

    pub fn remove_file(&self, file_id: i64) -> Result<bool, DbError> {
        let conn = self.connection()?;
        Ok(db::delete_file(conn, file_id)? > 0)
    }

    pub fn file_link_count(&self, file_id: i64) -> Result<i64, DbError> {
        let conn = self.connection()?;
        Ok(db::count_file_links(conn, file_id)?)
    }

    pub fn schema_version(&self) -> Result<Option<String>, DbError> {
        let conn = self.connection()?;
        Ok(db::get_meta(conn, "schema_version")?)
    }

    fn connection(&self) -> Result<&Connection, DbError> {
        guard(self, |db| db.conn.as_ref().ok_or_else(not_ready))
    }
}

fn not_ready() -> DbError {
    DbError::InvalidState(InvalidState::new("DbManager"))
}

fn ensure_parent_dir(path: &Path) -> Result<(), DbError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn entry_write<'a>(entry: &'a Entry, date: &'a str) -> EntryWrite<'a> {
    EntryWrite {
        title: &entry.title,
        text: &entry.text,
        entry_date: date,
    }
}

fn entry_from_record(record: EntryRecord) -> Result<Entry, DbError> {
    Ok(Entry {
        id: Some(record.id),
        title: record.title,
        text: record.text,
        date: parse_date(&record.entry_date)?,
    })
}

fn attachment_from_record(record: FileRecord) -> Result<Attachment, DbError> {
    Ok(Attachment {
        id: Some(record.id),
        name: record.name,
        subpath: record.subpath,
        file_type: record.file_type,
        date: parse_date(&record.file_date)?,
        size: u64::try_from(record.size).unwrap_or(0),
        sha256: record.sha256,
    })
}

#[derive(Debug)]
pub enum DbError {
    Io(std::io::Error),
    Db(rusqlite::Error),
    Domain(DomainError),
    InvalidState(InvalidState),
    MissingId,
    NotFound { kind: &'static str, id: i64 },
    Unsupported(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Io(err) => write!(f, "I/O error: {}", err),
            DbError::Db(err) => write!(f, "database error: {}", err),
            DbError::Domain(err) => write!(f, "{}", err),
            DbError::InvalidState(err) => write!(f, "{}: database is not initialized", err),
            DbError::MissingId => write!(f, "entry has no id; create and commit it first"),
            DbError::NotFound { kind, id } => write!(f, "{} {} not found", kind, id),
            DbError::Unsupported(target) => {
                write!(
                    f,
                    "unsupported database target '{}': only SQLite files and :memory:",
                    target
                )
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DbError::Io(err) => Some(err),
            DbError::Db(err) => Some(err),
            DbError::Domain(err) => Some(err),
            DbError::InvalidState(err) => Some(err),
            DbError::MissingId | DbError::NotFound { .. } | DbError::Unsupported(_) => None,
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        DbError::Io(value)
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        DbError::Db(value)
    }
}

impl From<DomainError> for DbError {
    fn from(value: DomainError) -> Self {
        DbError::Domain(value)
    }
}

impl From<InvalidState> for DbError {
    fn from(value: InvalidState) -> Self {
        DbError::InvalidState(value)
    }
}
