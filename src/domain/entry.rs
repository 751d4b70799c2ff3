use std::error::Error;
use std::fmt;

use time::macros::format_description;
use time::{Date, OffsetDateTime};

pub const TITLE_MAX_CHARS: usize = 80;
pub const FILE_NAME_MAX_CHARS: usize = 80;
pub const SUBPATH_MAX_CHARS: usize = 120;
pub const FILE_TYPE_MAX_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: Option<i64>,
    pub title: String,
    pub text: String,
    pub date: Date,
}

impl Entry {
    pub fn new(title: &str, text: &str, date: Date) -> Self {
        Self {
            id: None,
            title: title.trim().to_string(),
            text: text.to_string(),
            date,
        }
    }
}

/// A file kept in storage, addressed by `subpath/name` under the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: Option<i64>,
    pub name: String,
    pub subpath: String,
    pub file_type: String,
    pub date: Date,
    pub size: u64,
    pub sha256: String,
}

impl Attachment {
    pub fn relative_path(&self) -> String {
        if self.subpath.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subpath.trim_end_matches('/'), self.name)
        }
    }
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

pub fn parse_date(raw: &str) -> Result<Date, DomainError> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| DomainError::InvalidDate(raw.to_string()))
}

pub fn format_date(date: Date) -> String {
    date.to_string()
}

pub fn validate_entry(entry: &Entry) -> Result<(), DomainError> {
    if entry.title.trim().is_empty() {
        return Err(DomainError::EmptyField("title"));
    }
    check_length("title", &entry.title, TITLE_MAX_CHARS)
}

pub fn validate_attachment(attachment: &Attachment) -> Result<(), DomainError> {
    if attachment.name.trim().is_empty() {
        return Err(DomainError::EmptyField("name"));
    }
    check_length("name", &attachment.name, FILE_NAME_MAX_CHARS)?;
    check_length("subpath", &attachment.subpath, SUBPATH_MAX_CHARS)?;
    check_length("type", &attachment.file_type, FILE_TYPE_MAX_CHARS)
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<(), DomainError> {
    let chars = value.chars().count();
    if chars > max {
        return Err(DomainError::TooLong { field, max, chars });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    InvalidDate(String),
    EmptyField(&'static str),
    TooLong {
        field: &'static str,
        max: usize,
        chars: usize,
    },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::InvalidDate(value) => {
                write!(f, "invalid date '{}', expected YYYY-MM-DD", value)
            }
            DomainError::EmptyField(field) => write!(f, "{} must not be empty", field),
            DomainError::TooLong { field, max, chars } => {
                write!(f, "{} is {} characters long, limit is {}", field, chars, max)
            }
        }
    }
}

impl Error for DomainError {}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::{
        format_date, parse_date, validate_attachment, validate_entry, Attachment, DomainError,
        Entry,
    };

    fn attachment(name: &str, subpath: &str, file_type: &str) -> Attachment {
        Attachment {
            id: None,
            name: name.to_string(),
            subpath: subpath.to_string(),
            file_type: file_type.to_string(),
            date: date!(2024 - 03 - 09),
            size: 0,
            sha256: String::new(),
        }
    }

    #[test]
    fn parses_and_formats_iso_dates() {
        let parsed = parse_date(" 2024-03-09 ").expect("date should parse");
        assert_eq!(parsed, date!(2024 - 03 - 09));
        assert_eq!(format_date(parsed), "2024-03-09");
    }

    #[test]
    fn rejects_malformed_dates() {
        let err = parse_date("09.03.2024").expect_err("dotted date should be rejected");
        assert_eq!(err, DomainError::InvalidDate("09.03.2024".to_string()));
        assert!(parse_date("2024-02-30").is_err());
    }

    #[test]
    fn entry_title_is_trimmed_and_limited() {
        let entry = Entry::new("  Morning walk ", "sunny", date!(2024 - 03 - 09));
        assert_eq!(entry.title, "Morning walk");
        assert!(entry.id.is_none());
        assert!(validate_entry(&entry).is_ok());

        let long = Entry::new(&"x".repeat(81), "", date!(2024 - 03 - 09));
        let err = validate_entry(&long).expect_err("81 chars should be too long");
        assert!(err.to_string().contains("limit is 80"));

        let blank = Entry::new("   ", "", date!(2024 - 03 - 09));
        assert_eq!(
            validate_entry(&blank),
            Err(DomainError::EmptyField("title"))
        );
    }

    #[test]
    fn attachment_limits_apply_per_field() {
        assert!(validate_attachment(&attachment("photo.jpg", "2024/03", "jpg")).is_ok());
        let err = validate_attachment(&attachment("a", "", "extremelylong"))
            .expect_err("type over 10 chars should fail");
        assert!(matches!(err, DomainError::TooLong { field: "type", .. }));
    }

    #[test]
    fn relative_path_joins_subpath_and_name() {
        assert_eq!(
            attachment("photo.jpg", "2024/03/", "jpg").relative_path(),
            "2024/03/photo.jpg"
        );
        assert_eq!(attachment("notes.txt", "", "txt").relative_path(), "notes.txt");
    }
}
