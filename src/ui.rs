use std::io::{self, IsTerminal};

use crate::app::{ComponentStatus, ConfigValue, EntryDetail, EntryView, FileDetail, FileView};

pub fn print_entry_list(entries: &[EntryView]) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Entries"));
    if entries.is_empty() {
        println!("{}", palette.dim("no entries yet"));
        return;
    }
    for entry in entries {
        println!("{}", format_entry_row(entry, &palette));
    }
    println!("{}", palette.dim(&format!("{} entry(ies)", entries.len())));
}

pub fn print_entry_detail(detail: &EntryDetail) {
    let palette = Palette::auto();
    for line in format_entry_detail(detail, &palette) {
        println!("{line}");
    }
}

pub fn print_file_list(files: &[FileView]) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Files"));
    if files.is_empty() {
        println!("{}", palette.dim("no files matched"));
        return;
    }
    for file in files {
        println!("{}", format_file_row(file, &palette));
    }
    println!("{}", palette.dim(&format!("{} file(s)", files.len())));
}

pub fn print_file_info(detail: &FileDetail) {
    let palette = Palette::auto();
    let info = &detail.info;
    println!("{}", palette.heading(&info.path.display().to_string()));
    println!("size: {} bytes", info.size);
    if let Some(modified) = info.modified.as_deref() {
        println!("modified: {modified}");
    }
    println!("sha256: {}", palette.dim(&info.sha256));
    println!("entries: {}", format_entry_refs(&detail.entries, &palette));
}

fn format_entry_refs(ids: &[i64], palette: &Palette) -> String {
    if ids.is_empty() {
        return palette.dim("none");
    }
    ids.iter()
        .map(|id| palette.id(&format!("#{id}")))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn print_status(statuses: &[ComponentStatus]) {
    let palette = Palette::auto();
    for status in statuses {
        for line in format_status(status, &palette) {
            println!("{line}");
        }
    }
}

pub fn print_config(values: &[ConfigValue]) {
    let mut current: Option<&str> = None;
    let palette = Palette::auto();
    for value in values {
        if current != Some(value.section.as_str()) {
            println!("{}", palette.heading(&format!("[{}]", value.section)));
            current = Some(value.section.as_str());
        }
        println!("{} = {}", value.key, value.value);
    }
}

fn format_entry_row(entry: &EntryView, palette: &Palette) -> String {
    let mut line = format!(
        "{} {} {}",
        palette.id(&format!("#{}", entry.id)),
        palette.date(&entry.date),
        entry.title
    );
    if !entry.files.is_empty() {
        line.push(' ');
        line.push_str(&palette.dim(&format!("[{} file(s)]", entry.files.len())));
    }
    line
}

fn format_entry_detail(detail: &EntryDetail, palette: &Palette) -> Vec<String> {
    let entry = &detail.entry;
    let mut lines = vec![format!(
        "{} {} {}",
        palette.id(&format!("#{}", entry.id)),
        palette.date(&entry.date),
        palette.heading(&entry.title)
    )];
    if !entry.text.is_empty() {
        lines.push(String::new());
        lines.extend(entry.text.lines().map(str::to_string));
    }
    if !detail.attachments.is_empty() {
        lines.push(String::new());
        lines.push(palette.dim("attachments:"));
        for file in &detail.attachments {
            lines.push(format!("  {}", format_file_row(file, palette)));
        }
    }
    lines
}

fn format_file_row(file: &FileView, palette: &Palette) -> String {
    format!(
        "{} {} {} {}",
        palette.id(&format!("#{}", file.id)),
        palette.date(&file.date),
        join_location(&file.location, &file.name),
        palette.dim(&format!("({}, {} bytes)", file.file_type, file.size))
    )
}

fn join_location(location: &str, name: &str) -> String {
    if location.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", location.trim_end_matches('/'), name)
    }
}

fn format_status(status: &ComponentStatus, palette: &Palette) -> Vec<String> {
    let label = if status.ready {
        palette.paint("32", "[READY]")
    } else {
        palette.paint("31", "[NOT READY]")
    };
    let mut lines = vec![format!("{} {}", status.component, label)];
    for violation in &status.violations {
        lines.push(palette.dim(&format!("  {violation}")));
    }
    lines
}

struct Palette {
    enabled: bool,
}

impl Palette {
    fn auto() -> Self {
        let enabled = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal();
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        self.paint("1;36", text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    fn id(&self, text: &str) -> String {
        self.paint("1;94", text)
    }

    fn date(&self, text: &str) -> String {
        self.paint("33", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ComponentKind;

    const PLAIN: Palette = Palette { enabled: false };

    fn file(id: i64, location: &str) -> FileView {
        FileView {
            id,
            name: "photo.jpg".to_string(),
            location: location.to_string(),
            file_type: "jpg".to_string(),
            date: "2024-03-01".to_string(),
            size: 12,
            sha256: "ab".repeat(32),
        }
    }

    #[test]
    fn entry_row_mentions_attachment_count() {
        let entry = EntryView {
            id: 4,
            title: "Beach day".to_string(),
            text: String::new(),
            date: "2024-03-01".to_string(),
            files: vec![1, 2],
        };
        assert_eq!(
            format_entry_row(&entry, &PLAIN),
            "#4 2024-03-01 Beach day [2 file(s)]"
        );
    }

    #[test]
    fn file_row_joins_location_and_name() {
        assert_eq!(
            format_file_row(&file(7, "2024/03/"), &PLAIN),
            "#7 2024-03-01 2024/03/photo.jpg (jpg, 12 bytes)"
        );
        assert_eq!(join_location("", "a.txt"), "a.txt");
    }

    #[test]
    fn detail_lists_text_then_attachments() {
        let detail = EntryDetail {
            entry: EntryView {
                id: 1,
                title: "Notes".to_string(),
                text: "line one\nline two".to_string(),
                date: "2024-03-02".to_string(),
                files: vec![7],
            },
            attachments: vec![file(7, "2024/03")],
        };
        let lines = format_entry_detail(&detail, &PLAIN);
        assert_eq!(lines[0], "#1 2024-03-02 Notes");
        assert_eq!(lines[2], "line one");
        assert_eq!(lines[3], "line two");
        assert_eq!(lines[5], "attachments:");
        assert!(lines[6].starts_with("  #7 "));
    }

    #[test]
    fn status_shows_violations_when_not_ready() {
        let status = ComponentStatus {
            component: ComponentKind::Storage,
            ready: false,
            violations: vec!["root holds a forbidden value".to_string()],
        };
        let lines = format_status(&status, &PLAIN);
        assert_eq!(lines[0], "storage [NOT READY]");
        assert_eq!(lines[1], "  root holds a forbidden value");
    }

    #[test]
    fn entry_refs_join_ids_or_say_none() {
        assert_eq!(format_entry_refs(&[3, 5], &PLAIN), "#3, #5");
        assert_eq!(format_entry_refs(&[], &PLAIN), "none");
    }

    #[test]
    fn palette_wraps_codes_only_when_enabled() {
        let colored = Palette { enabled: true };
        assert_eq!(colored.dim("x"), "\x1b[2mx\x1b[0m");
        assert_eq!(PLAIN.dim("x"), "x");
    }
}
