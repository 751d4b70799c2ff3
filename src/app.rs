use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ConfigFormat, ConfigManager};
use crate::db_manager::{CommitSummary, DatabaseTarget, DbError, DbManager};
use crate::domain::entry::{format_date, parse_date, today, Attachment, DomainError, Entry};
use crate::storage::{FileInfo, FileManager, StorageError, StoreRequest};
use crate::validity::{Component, InvalidState};

pub const APP_SECTION: &str = "app";
pub const STORAGE_SECTION: &str = "storage";
pub const DATABASE_SECTION: &str = "database";

const DEFAULT_APP_NAME: &str = "diary";
const DEFAULT_STORAGE_ROOT: &str = "storage";
const DEFAULT_DATABASE_FILE: &str = "diary.sqlite";

/// Wires the config, database and storage components together and runs the
/// diary operations on top of them.
pub struct App {
    conf: ConfigManager,
    db: DbManager,
    storage: FileManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Conf,
    Database,
    Storage,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 3] = [
        ComponentKind::Conf,
        ComponentKind::Database,
        ComponentKind::Storage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Conf => "conf",
            ComponentKind::Database => "database",
            ComponentKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "conf" | "config" => Ok(ComponentKind::Conf),
            "database" | "db" => Ok(ComponentKind::Database),
            "storage" => Ok(ComponentKind::Storage),
            _ => Err(AppError::UnknownComponent(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComponentStatus {
    pub component: ComponentKind,
    pub ready: bool,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntryView {
    pub id: i64,
    pub title: String,
    pub text: String,
    pub date: String,
    pub files: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileView {
    pub id: i64,
    pub name: String,
    pub location: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub date: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntryDetail {
    #[serde(flatten)]
    pub entry: EntryView,
    pub attachments: Vec<FileView>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub text: Option<String>,
    pub date: Option<String>,
}

impl EntryPatch {
    fn has_changes(&self) -> bool {
        self.title.is_some() || self.text.is_some() || self.date.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDetail {
    #[serde(flatten)]
    pub info: FileInfo,
    pub entries: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemovalSummary {
    pub id: i64,
    pub removed_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfigValue {
    pub section: String,
    pub key: String,
    pub value: String,
}

impl App {
    pub fn new(conf: ConfigManager, db: DbManager, storage: FileManager) -> Self {
        Self { conf, db, storage }
    }

    /// Loads (or creates) the config at `config_path` and sets up whichever
    /// of storage and database are not ready yet.
    pub fn open(config_path: &Path) -> Result<Self, AppError> {
        let mut app = App::new(
            ConfigManager::with_path(config_path),
            DbManager::new(),
            FileManager::default(),
        );
        if config_path.exists() {
            app.load_conf(None)?;
        } else {
            app.write_default_conf()?;
        }
        app.setup_from_conf()?;
        Ok(app)
    }

    pub fn load_conf(&mut self, path: Option<&Path>) -> Result<(), AppError> {
        if let Some(path) = path {
            self.conf.set_source(Some(path.to_path_buf()), None);
        } else if !self.is_ready(ComponentKind::Conf) {
            return Err(AppError::MissingConfigSource);
        }
        self.conf.load()?;
        debug!("configuration loaded");
        Ok(())
    }

    pub fn is_ready(&self, component: ComponentKind) -> bool {
        match component {
            ComponentKind::Conf => self.conf.is_valid(),
            ComponentKind::Database => self.db.is_valid(),
            ComponentKind::Storage => self.storage.is_valid(),
        }
    }

    pub fn is_ready_by_name(&self, name: &str) -> Result<bool, AppError> {
        Ok(self.is_ready(name.parse()?))
    }

    pub fn readiness(&self) -> Vec<ComponentStatus> {
        ComponentKind::ALL
            .into_iter()
            .map(|component| {
                let violations = match component {
                    ComponentKind::Conf => self.conf.violations(),
                    ComponentKind::Database => self.db.violations(),
                    ComponentKind::Storage => self.storage.violations(),
                };
                ComponentStatus {
                    component,
                    ready: violations.is_empty(),
                    violations: violations.iter().map(ToString::to_string).collect(),
                }
            })
            .collect()
    }

    pub fn setup_database(&mut self, target: DatabaseTarget) -> Result<(), AppError> {
        self.db.initialize(target)?;
        Ok(())
    }

    pub fn setup_storage(&mut self, location: &Path) -> Result<(), AppError> {
        std::fs::create_dir_all(location)?;
        self.storage.set_root(location)?;
        Ok(())
    }

    /// Fails with the first component that is not ready.
    pub fn start(&self) -> Result<(), AppError> {
        self.conf.ensure_valid()?;
        self.db.ensure_valid()?;
        self.storage.ensure_valid()?;
        info!("all components ready");
        Ok(())
    }

    pub fn storage_root(&self) -> Option<&Path> {
        self.storage.root()
    }

    pub fn database_target(&self) -> Option<&DatabaseTarget> {
        self.db.target()
    }

    pub fn schema_version(&self) -> Result<Option<String>, AppError> {
        Ok(self.db.schema_version()?)
    }

    fn write_default_conf(&mut self) -> Result<(), AppError> {
        let defaults = [
            (APP_SECTION, "name", DEFAULT_APP_NAME),
            (STORAGE_SECTION, "root", DEFAULT_STORAGE_ROOT),
            (DATABASE_SECTION, "file", DEFAULT_DATABASE_FILE),
        ];
        for (section, key, value) in defaults {
            if self.conf.get(key, Some(section)).is_err() {
                self.conf.set(key, value, Some(section));
            }
        }
        self.conf.save()?;
        info!("default configuration written");
        Ok(())
    }

    fn setup_from_conf(&mut self) -> Result<(), AppError> {
        let base = self
            .conf
            .path()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();

        if !self.is_ready(ComponentKind::Storage) {
            let root = self
                .conf
                .get_or("root", Some(STORAGE_SECTION), DEFAULT_STORAGE_ROOT)
                .to_string();
            self.setup_storage(&resolve_relative(&base, Path::new(&root)))?;
        }
        if !self.is_ready(ComponentKind::Database) {
            let raw = self
                .conf
                .get_or("file", Some(DATABASE_SECTION), DEFAULT_DATABASE_FILE);
            let target = match DatabaseTarget::parse(raw)? {
                DatabaseTarget::File(path) => DatabaseTarget::File(resolve_relative(&base, &path)),
                DatabaseTarget::Memory => DatabaseTarget::Memory,
            };
            self.setup_database(target)?;
        }
        Ok(())
    }

    pub fn create_entry(
        &mut self,
        title: &str,
        text: Option<&str>,
        date: Option<&str>,
    ) -> Result<EntryView, AppError> {
        let date = match date {
            Some(raw) => parse_date(raw)?,
            None => today(),
        };
        self.db
            .create([Entry::new(title, text.unwrap_or_default(), date)])?;
        let summary = self.commit()?;
        let created = summary
            .created
            .into_iter()
            .next()
            .ok_or_else(|| AppError::InvalidArgument("entry was not created".to_string()))?;
        info!(id = ?created.id, "entry created");
        self.entry_view(created)
    }

    pub fn update_entry(&mut self, id: i64, patch: EntryPatch) -> Result<EntryView, AppError> {
        if !patch.has_changes() {
            return Err(AppError::InvalidArgument(
                "edit needs at least one of --title, --text, --date".to_string(),
            ));
        }
        let mut entry = self.require_entry(id)?;
        if let Some(title) = patch.title {
            entry.title = title.trim().to_string();
        }
        if let Some(text) = patch.text {
            entry.text = text;
        }
        if let Some(raw) = patch.date {
            entry.date = parse_date(&raw)?;
        }
        self.db.update([entry.clone()])?;
        self.commit()?;
        info!(id, "entry updated");
        self.entry_view(entry)
    }

    /// Deletes the entry and any attachment no other entry still uses.
    pub fn delete_entry(&mut self, id: i64) -> Result<RemovalSummary, AppError> {
        let entry = self.require_entry(id)?;
        let attached = self.db.files_for_entry(id)?;
        self.db.delete([entry])?;
        self.commit()?;

        let mut removed_files = Vec::new();
        for file in attached {
            if self.remove_if_orphaned(&file)? {
                removed_files.push(file.relative_path());
            }
        }
        info!(id, removed = removed_files.len(), "entry deleted");
        Ok(RemovalSummary { id, removed_files })
    }

    pub fn list_entries(&self) -> Result<Vec<EntryView>, AppError> {
        self.db
            .entries()?
            .into_iter()
            .map(|entry| self.entry_view(entry))
            .collect()
    }

    pub fn show_entry(&self, id: i64) -> Result<Option<EntryDetail>, AppError> {
        let Some(entry) = self.db.entry(id)? else {
            return Ok(None);
        };
        let attachments = self
            .db
            .files_for_entry(id)?
            .into_iter()
            .map(file_view)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(EntryDetail {
            entry: self.entry_view(entry)?,
            attachments,
        }))
    }

    pub fn attach_file(
        &mut self,
        entry_id: i64,
        source: &Path,
        request: StoreRequest,
    ) -> Result<FileView, AppError> {
        self.require_entry(entry_id)?;
        let stored = self.storage.store(source, request)?;
        let recorded = self.db.add_file(&stored)?;
        let view = file_view(recorded)?;
        self.db.link(entry_id, view.id)?;
        info!(entry_id, file_id = view.id, "file attached");
        Ok(view)
    }

    /// Returns whether the stored file was removed because nothing else
    /// references it.
    pub fn detach_file(&mut self, entry_id: i64, file_id: i64) -> Result<bool, AppError> {
        let file = self
            .db
            .file(file_id)?
            .ok_or(AppError::NotFound {
                kind: "file",
                id: file_id,
            })?;
        if !self.db.unlink(entry_id, file_id)? {
            return Err(AppError::InvalidArgument(format!(
                "file {} is not attached to entry {}",
                file_id, entry_id
            )));
        }
        let removed = self.remove_if_orphaned(&file)?;
        info!(entry_id, file_id, removed, "file detached");
        Ok(removed)
    }

    pub fn list_files(
        &self,
        entry: Option<i64>,
        unlinked: bool,
    ) -> Result<Vec<FileView>, AppError> {
        let files = match (entry, unlinked) {
            (Some(id), true) => self.db.files_excluding_entry(id)?,
            (Some(id), false) => self.db.files_for_entry(id)?,
            (None, true) => self.db.unlinked_files()?,
            (None, false) => self.db.files()?,
        };
        files.into_iter().map(file_view).collect()
    }

    pub fn file_info(&self, file_id: i64) -> Result<FileDetail, AppError> {
        let file = self.db.file(file_id)?.ok_or(AppError::NotFound {
            kind: "file",
            id: file_id,
        })?;
        Ok(FileDetail {
            info: self.storage.get_info(&file)?,
            entries: self.db.entry_ids_for_file(file_id)?,
        })
    }

    pub fn cleanup_storage(&self) -> Result<usize, AppError> {
        Ok(self.storage.cleanup()?)
    }

    pub fn config_get(&self, key: &str, section: Option<&str>) -> Result<String, AppError> {
        Ok(self.conf.get(key, section)?.to_string())
    }

    pub fn config_set(
        &mut self,
        key: &str,
        value: &str,
        section: Option<&str>,
    ) -> Result<(), AppError> {
        self.conf.set(key, value, section);
        self.conf.save()?;
        Ok(())
    }

    pub fn config_unset(&mut self, key: &str, section: Option<&str>) -> Result<String, AppError> {
        let previous = self.conf.delete_key(key, section)?;
        self.conf.save()?;
        Ok(previous)
    }

    pub fn config_remove_section(&mut self, section: &str) -> Result<(), AppError> {
        self.conf.delete_section(section)?;
        self.conf.save()?;
        Ok(())
    }

    /// Renders the current config in `format`, or in the format of the
    /// config file when none is given.
    pub fn config_export(&self, format: Option<&str>) -> Result<String, AppError> {
        let format = match format {
            Some(name) => name.parse::<ConfigFormat>()?,
            None => self.conf.format(),
        };
        let mut out = ConfigManager::with_buffer(format, Vec::new());
        for section in self.conf.sections() {
            for (key, value) in self.conf.entries(section) {
                out.set(key, value, Some(section));
            }
        }
        out.save()?;
        let rendered = String::from_utf8_lossy(out.buffer().unwrap_or_default()).into_owned();
        debug!(format = format.as_str(), "config exported");
        Ok(rendered)
    }

    pub fn config_list(&self) -> Vec<ConfigValue> {
        let mut values = Vec::new();
        for section in self.conf.sections() {
            for (key, value) in self.conf.entries(section) {
                values.push(ConfigValue {
                    section: section.to_string(),
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }
        values
    }

    /// Commits the queued work. On failure the queue is dropped so the
    /// next operation starts clean.
    fn commit(&mut self) -> Result<CommitSummary, AppError> {
        match self.db.commit() {
            Ok(summary) => Ok(summary),
            Err(err) => {
                warn!(error = %err, "commit failed, pending changes discarded");
                self.db.rollback();
                Err(err.into())
            }
        }
    }

    fn require_entry(&self, id: i64) -> Result<Entry, AppError> {
        self.db
            .entry(id)?
            .ok_or(AppError::NotFound { kind: "entry", id })
    }

    fn remove_if_orphaned(&mut self, file: &Attachment) -> Result<bool, AppError> {
        let Some(file_id) = file.id else {
            return Ok(false);
        };
        if self.db.file_link_count(file_id)? > 0 {
            return Ok(false);
        }
        if self.storage.exists(file)? {
            self.storage.delete(file)?;
        } else {
            warn!(path = %file.relative_path(), "stored file already missing");
        }
        self.db.remove_file(file_id)?;
        Ok(true)
    }

    fn entry_view(&self, entry: Entry) -> Result<EntryView, AppError> {
        let id = entry.id.ok_or(AppError::InvalidArgument(
            "entry has not been stored yet".to_string(),
        ))?;
        let files = self
            .db
            .files_for_entry(id)?
            .into_iter()
            .filter_map(|file| file.id)
            .collect();
        Ok(EntryView {
            id,
            title: entry.title,
            text: entry.text,
            date: format_date(entry.date),
            files,
        })
    }
}

fn file_view(file: Attachment) -> Result<FileView, AppError> {
    let id = file.id.ok_or(AppError::InvalidArgument(
        "file has not been recorded yet".to_string(),
    ))?;
    Ok(FileView {
        id,
        location: file.subpath,
        name: file.name,
        file_type: file.file_type,
        date: format_date(file.date),
        size: file.size,
        sha256: file.sha256,
    })
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    Config(ConfigError),
    Db(DbError),
    Storage(StorageError),
    Domain(DomainError),
    InvalidState(InvalidState),
    UnknownComponent(String),
    MissingConfigSource,
    InvalidArgument(String),
    NotFound { kind: &'static str, id: i64 },
    Json(serde_json::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Db(err) => write!(f, "{}", err),
            AppError::Storage(err) => write!(f, "{}", err),
            AppError::Domain(err) => write!(f, "{}", err),
            AppError::InvalidState(err) => write!(f, "{}", err),
            AppError::UnknownComponent(name) => {
                write!(f, "app has no component named '{}'", name)
            }
            AppError::MissingConfigSource => {
                write!(f, "config path not set, configuration cannot be loaded")
            }
            AppError::InvalidArgument(message) => write!(f, "{}", message),
            AppError::NotFound { kind, id } => write!(f, "{} {} not found", kind, id),
            AppError::Json(err) => write!(f, "JSON output error: {}", err),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Config(err) => Some(err),
            AppError::Db(err) => Some(err),
            AppError::Storage(err) => Some(err),
            AppError::Domain(err) => Some(err),
            AppError::InvalidState(err) => Some(err),
            AppError::Json(err) => Some(err),
            AppError::UnknownComponent(_)
            | AppError::MissingConfigSource
            | AppError::InvalidArgument(_)
            | AppError::NotFound { .. } => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::Json(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<DbError> for AppError {
    fn from(value: DbError) -> Self {
        AppError::Db(value)
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        AppError::Storage(value)
    }
}

impl From<DomainError> for AppError {
    fn from(value: DomainError) -> Self {
        AppError::Domain(value)
    }
}

impl From<InvalidState> for AppError {
    fn from(value: InvalidState) -> Self {
        AppError::InvalidState(value)
    }
}
