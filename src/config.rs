use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::validity::{guard_mut, Component, InvalidState, RuleSet};

pub const DEFAULT_SECTION: &str = "DEFAULT";

type Sections = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    fn encode(self, data: &Sections) -> Result<String, ConfigError> {
        match self {
            ConfigFormat::Toml => Ok(toml::to_string(data)?),
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(data)?),
        }
    }

    fn decode(self, raw: &str) -> Result<Sections, ConfigError> {
        match self {
            ConfigFormat::Toml => Ok(toml::from_str(raw)?),
            ConfigFormat::Json => Ok(serde_json::from_str(raw)?),
        }
    }
}

/// Sectioned key/value settings persisted to a file or an in-memory buffer.
///
/// Loading and saving need a source. With neither a path nor a buffer set
/// the manager is invalid and both operations are refused.
#[derive(Debug)]
pub struct ConfigManager {
    path: Option<PathBuf>,
    buffer: Option<Vec<u8>>,
    format: ConfigFormat,
    data: Sections,
    rules: RuleSet<ConfigManager>,
}

impl Component for ConfigManager {
    fn rules(&self) -> &RuleSet<Self> {
        &self.rules
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new(ConfigFormat::Toml)
    }
}

impl ConfigManager {
    pub fn new(format: ConfigFormat) -> Self {
        let mut rules = RuleSet::new();
        let path = rules.forbid("path", |c: &ConfigManager| c.path.clone(), None, true);
        rules.forbid("buffer", |c: &ConfigManager| c.buffer.is_some(), false, true);
        Self {
            path,
            buffer: None,
            format,
            data: empty_sections(),
            rules,
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let mut manager = Self::default();
        manager.set_source(Some(path.into()), None);
        manager
    }

    pub fn with_buffer(format: ConfigFormat, buffer: Vec<u8>) -> Self {
        let mut manager = Self::new(format);
        manager.set_source(None, Some(buffer));
        manager
    }

    pub fn format(&self) -> ConfigFormat {
        self.format
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    /// Replaces whichever parts of the source are given. A new path also
    /// selects the format from its extension.
    pub fn set_source(&mut self, path: Option<PathBuf>, buffer: Option<Vec<u8>>) {
        if let Some(path) = path {
            self.format = ConfigFormat::from_path(&path);
            self.path = Some(path);
        }
        if let Some(buffer) = buffer {
            self.buffer = Some(buffer);
        }
    }

    pub fn set(&mut self, key: &str, value: &str, section: Option<&str>) {
        let section = section.unwrap_or(DEFAULT_SECTION);
        self.data
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str, section: Option<&str>) -> Result<&str, ConfigError> {
        let section = section.unwrap_or(DEFAULT_SECTION);
        let values = self
            .data
            .get(section)
            .ok_or_else(|| ConfigError::MissingSection(section.to_string()))?;
        values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingKey {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    pub fn get_or<'a>(&'a self, key: &str, section: Option<&str>, fallback: &'a str) -> &'a str {
        self.get(key, section).unwrap_or(fallback)
    }

    pub fn delete_key(&mut self, key: &str, section: Option<&str>) -> Result<String, ConfigError> {
        let section = section.unwrap_or(DEFAULT_SECTION);
        let values = self
            .data
            .get_mut(section)
            .ok_or_else(|| ConfigError::MissingSection(section.to_string()))?;
        values.remove(key).ok_or_else(|| ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
    }

    pub fn delete_section(&mut self, section: &str) -> Result<(), ConfigError> {
        self.data
            .remove(section)
            .map(|_| ())
            .ok_or_else(|| ConfigError::MissingSection(section.to_string()))
    }

    pub fn sections(&self) -> Vec<&str> {
        self.data.keys().map(String::as_str).collect()
    }

    pub fn entries(&self, section: &str) -> Vec<(&str, &str)> {
        self.data
            .get(section)
            .map(|values| {
                values
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn save(&mut self) -> Result<(), ConfigError> {
        self.ensure_valid()?;
        let rendered = self.format.encode(&self.data)?;
        match self.path.as_deref() {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, rendered)?;
                debug!(path = %path.display(), "config saved");
            }
            None => {
                self.buffer = Some(rendered.into_bytes());
                debug!("config saved to buffer");
            }
        }
        Ok(())
    }

    pub fn load(&mut self) -> Result<(), ConfigError> {
        guard_mut(self, |conf| -> Result<(), ConfigError> {
            let raw = match (conf.path.as_deref(), conf.buffer.as_deref()) {
                (Some(path), _) => std::fs::read_to_string(path)?,
                (None, Some(bytes)) => String::from_utf8(bytes.to_vec())?,
                (None, None) => return Err(InvalidState::new(conf.component_name()).into()),
            };
            let mut data = conf.format.decode(&raw)?;
            data.entry(DEFAULT_SECTION.to_string()).or_default();
            debug!(sections = data.len(), "config loaded");
            conf.data = data;
            Ok(())
        })
    }
}

fn empty_sections() -> Sections {
    let mut data = Sections::new();
    data.insert(DEFAULT_SECTION.to_string(), BTreeMap::new());
    data
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    TomlRead(toml::de::Error),
    TomlWrite(toml::ser::Error),
    Json(serde_json::Error),
    Encoding(std::string::FromUtf8Error),
    InvalidState(InvalidState),
    MissingSection(String),
    MissingKey { section: String, key: String },
    UnknownFormat(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config I/O error: {}", err),
            ConfigError::TomlRead(err) => write!(f, "config TOML parse error: {}", err),
            ConfigError::TomlWrite(err) => write!(f, "config TOML write error: {}", err),
            ConfigError::Json(err) => write!(f, "config JSON error: {}", err),
            ConfigError::Encoding(err) => write!(f, "config buffer is not UTF-8: {}", err),
            ConfigError::InvalidState(err) => {
                write!(f, "{}: no config path or buffer set", err)
            }
            ConfigError::MissingSection(section) => {
                write!(f, "config section '{}' not found", section)
            }
            ConfigError::MissingKey { section, key } => {
                write!(f, "config key '{}' not found in section '{}'", key, section)
            }
            ConfigError::UnknownFormat(name) => {
                write!(f, "unknown config format '{}' (expected toml or json)", name)
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::TomlRead(err) => Some(err),
            ConfigError::TomlWrite(err) => Some(err),
            ConfigError::Json(err) => Some(err),
            ConfigError::Encoding(err) => Some(err),
            ConfigError::InvalidState(err) => Some(err),
            ConfigError::MissingSection(_)
            | ConfigError::MissingKey { .. }
            | ConfigError::UnknownFormat(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::TomlRead(value)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(value: toml::ser::Error) -> Self {
        ConfigError::TomlWrite(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        ConfigError::Json(value)
    }
}

impl From<std::string::FromUtf8Error> for ConfigError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        ConfigError::Encoding(value)
    }
}

impl From<InvalidState> for ConfigError {
    fn from(value: InvalidState) -> Self {
        ConfigError::InvalidState(value)
    }
}
