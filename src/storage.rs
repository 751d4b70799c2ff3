use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use tracing::{debug, info};

use crate::domain::entry::{today, validate_attachment, Attachment, DomainError};
use crate::validity::{Component, InvalidState, RuleSet};

#[derive(Debug, Clone, Default)]
pub struct StoreRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub file_type: Option<String>,
    pub date: Option<Date>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<String>,
    pub sha256: String,
}

/// Attachment files kept under a single root directory.
#[derive(Debug)]
pub struct FileManager {
    root: Option<PathBuf>,
    rules: RuleSet<FileManager>,
}

impl Component for FileManager {
    fn rules(&self) -> &RuleSet<Self> {
        &self.rules
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FileManager {
    /// A root that is not an existing directory is ignored.
    pub fn new(root: Option<&Path>) -> Self {
        let mut rules = RuleSet::new();
        let unset = rules.forbid("root", |s: &FileManager| s.root.clone(), None, false);
        rules.require(
            "root_on_disk",
            |s: &FileManager| s.root.as_deref().is_some_and(Path::is_dir),
            true,
            false,
        );
        Self {
            root: root.filter(|path| path.is_dir()).map(Path::to_path_buf).or(unset),
            rules,
        }
    }

    pub fn set_root(&mut self, root: &Path) -> Result<(), StorageError> {
        if !root.is_dir() {
            return Err(StorageError::NotADirectory(root.to_path_buf()));
        }
        info!(root = %root.display(), "storage root set");
        self.root = Some(root.to_path_buf());
        Ok(())
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Copies `source` into the store and describes the stored copy.
    ///
    /// The copy lands at `<root>/<location>/<name>`. Location defaults to the
    /// `YYYY/MM` of the request date and name to the source file name.
    pub fn store(&self, source: &Path, request: StoreRequest) -> Result<Attachment, StorageError> {
        let root = self.require_root()?;
        if !source.is_file() {
            return Err(StorageError::NotFound(source.to_path_buf()));
        }

        let date = request.date.unwrap_or_else(today);
        let name = match request.name {
            Some(name) => name,
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let name = checked_name(&name)?;
        let location = match request.location {
            Some(location) => normalize_subpath(&location)?,
            None => format!("{:04}/{:02}", date.year(), date.month() as u8),
        };
        let file_type = request.file_type.unwrap_or_else(|| {
            source
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default()
        });

        let mut attachment = Attachment {
            id: None,
            name,
            subpath: location,
            file_type,
            date,
            size: 0,
            sha256: sha256_file(source)?,
        };
        validate_attachment(&attachment)?;

        let destination = root.join(&attachment.subpath).join(&attachment.name);
        if destination.exists() {
            if sha256_file(&destination)? != attachment.sha256 {
                return Err(StorageError::Conflict(destination));
            }
            debug!(path = %destination.display(), "identical file already stored");
        } else {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(source, &destination)?;
            info!(path = %destination.display(), "file stored");
        }
        attachment.size = std::fs::metadata(&destination)?.len();
        Ok(attachment)
    }

    pub fn exists(&self, item: &Attachment) -> Result<bool, StorageError> {
        Ok(self.resolve(item)?.is_file())
    }

    pub fn retrieve(&self, item: &Attachment) -> Result<PathBuf, StorageError> {
        let path = self.resolve(item)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(path));
        }
        Ok(path)
    }

    /// Removes the stored file and any directories left empty above it.
    pub fn delete(&self, item: &Attachment) -> Result<(), StorageError> {
        let root = self.require_root()?;
        let path = self.retrieve(item)?;
        std::fs::remove_file(&path)?;
        info!(path = %path.display(), "file deleted");

        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
            debug!(dir = %dir.display(), "pruned empty directory");
            current = dir.parent();
        }
        Ok(())
    }

    pub fn get_info(&self, item: &Attachment) -> Result<FileInfo, StorageError> {
        let path = self.retrieve(item)?;
        let metadata = std::fs::metadata(&path)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|at| OffsetDateTime::from(at).format(&Rfc3339).ok());
        Ok(FileInfo {
            sha256: sha256_file(&path)?,
            size: metadata.len(),
            modified,
            path,
        })
    }

    /// Removes every empty directory below the root. The root itself stays.
    pub fn cleanup(&self) -> Result<usize, StorageError> {
        let root = self.require_root()?;
        let mut removed = 0usize;
        remove_empty_dirs(root, &mut removed)?;
        info!(removed, "storage cleanup finished");
        Ok(removed)
    }

    fn require_root(&self) -> Result<&Path, StorageError> {
        self.ensure_valid()?;
        self.root
            .as_deref()
            .ok_or(StorageError::InvalidState(InvalidState::new("FileManager")))
    }

    fn resolve(&self, item: &Attachment) -> Result<PathBuf, StorageError> {
        let root = self.require_root()?;
        let subpath = normalize_subpath(&item.subpath)?;
        let name = checked_name(&item.name)?;
        Ok(root.join(subpath).join(name))
    }
}

/// Returns true when `dir` ended up empty.
fn remove_empty_dirs(dir: &Path, removed: &mut usize) -> Result<bool, StorageError> {
    let mut empty = true;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let path = entry.path();
            if remove_empty_dirs(&path, removed)? {
                std::fs::remove_dir(&path)?;
                *removed += 1;
            } else {
                empty = false;
            }
        } else {
            empty = false;
        }
    }
    Ok(empty)
}

fn normalize_subpath(raw: &str) -> Result<String, StorageError> {
    if raw.starts_with('/') || raw.starts_with('\\') || raw.contains(':') {
        return Err(StorageError::InvalidPath(raw.to_string()));
    }
    let mut parts = Vec::new();
    for part in raw.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return Err(StorageError::InvalidPath(raw.to_string())),
            part => parts.push(part),
        }
    }
    Ok(parts.join("/"))
}

fn checked_name(raw: &str) -> Result<String, StorageError> {
    let name = raw.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidPath(raw.to_string()));
    }
    Ok(name.to_string())
}

fn sha256_file(path: &Path) -> Result<String, StorageError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{:02x}", byte);
    }
    Ok(out)
}

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    InvalidState(InvalidState),
    NotADirectory(PathBuf),
    NotFound(PathBuf),
    InvalidPath(String),
    Conflict(PathBuf),
    Domain(DomainError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(err) => write!(f, "storage I/O error: {}", err),
            StorageError::InvalidState(err) => write!(f, "{}: storage root is not set", err),
            StorageError::NotADirectory(path) => {
                write!(f, "'{}' is not a directory", path.display())
            }
            StorageError::NotFound(path) => write!(f, "file '{}' not found", path.display()),
            StorageError::InvalidPath(raw) => {
                write!(f, "'{}' is not a valid path inside the store", raw)
            }
            StorageError::Conflict(path) => write!(
                f,
                "'{}' already exists with different content",
                path.display()
            ),
            StorageError::Domain(err) => write!(f, "{}", err),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            StorageError::InvalidState(err) => Some(err),
            StorageError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<DomainError> for StorageError {
    fn from(value: DomainError) -> Self {
        StorageError::Domain(value)
    }
}

impl From<InvalidState> for StorageError {
    fn from(value: InvalidState) -> Self {
        StorageError::InvalidState(value)
    }
}
