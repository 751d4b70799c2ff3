use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

pub fn styled_command() -> clap::Command {
    Cli::command()
}

#[derive(Debug, Parser)]
#[command(name = "diary")]
#[command(bin_name = "diary")]
#[command(version)]
#[command(about = "A local diary with file attachments")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'c',
        long,
        env = "DIARY_CONFIG",
        default_value = ".diary/config.toml",
        global = true,
        help = "Path to the diary config file."
    )]
    pub config: PathBuf,

    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase log output (-v info, -vv debug). DIARY_LOG overrides."
    )]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Create the config, database, and storage directory.")]
    Init,
    #[command(about = "Write a new entry.")]
    New(NewArgs),
    #[command(about = "List entries.")]
    Ls(ListArgs),
    #[command(about = "Show one entry with its attachments.")]
    Show(ShowArgs),
    #[command(about = "Change the title, text, or date of an entry.")]
    Edit(EditArgs),
    #[command(about = "Delete an entry and any files only it referenced.")]
    Rm(RemoveArgs),
    #[command(about = "Store a file and attach it to an entry.")]
    Attach(AttachArgs),
    #[command(about = "Detach a file from an entry.")]
    Detach(DetachArgs),
    #[command(about = "List stored files.")]
    Files(FilesArgs),
    #[command(about = "Show on-disk details for a stored file.")]
    FileInfo(FileInfoArgs),
    #[command(about = "Read and write config values.")]
    Config(ConfigArgs),
    #[command(about = "Report whether each component is ready.")]
    Status(StatusArgs),
    #[command(about = "Remove empty directories from storage.")]
    Cleanup,
    #[command(about = "Generate or install shell completions.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct NewArgs {
    #[arg(help = "Entry title (at most 80 characters).")]
    pub title: String,

    #[arg(short = 't', long, help = "Entry body text.")]
    pub text: Option<String>,

    #[arg(short = 'd', long, help = "Entry date as YYYY-MM-DD (defaults to today).")]
    pub date: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(help = "Entry id.")]
    pub id: i64,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    #[arg(help = "Entry id.")]
    pub id: i64,

    #[arg(long, help = "Set title.")]
    pub title: Option<String>,

    #[arg(short = 't', long, help = "Set body text.")]
    pub text: Option<String>,

    #[arg(short = 'd', long, help = "Set date as YYYY-MM-DD.")]
    pub date: Option<String>,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    #[arg(help = "Entry id.")]
    pub id: i64,
}

#[derive(Debug, Args)]
pub struct AttachArgs {
    #[arg(help = "Entry id.")]
    pub entry_id: i64,

    #[arg(help = "File to copy into storage.")]
    pub path: PathBuf,

    #[arg(short = 'n', long, help = "Stored file name (defaults to the source name).")]
    pub name: Option<String>,

    #[arg(
        short = 'l',
        long,
        help = "Storage subdirectory (defaults to YYYY/MM of the date)."
    )]
    pub location: Option<String>,

    #[arg(long = "type", help = "File type label (defaults to the extension).")]
    pub file_type: Option<String>,

    #[arg(short = 'd', long, help = "File date as YYYY-MM-DD (defaults to today).")]
    pub date: Option<String>,
}

#[derive(Debug, Args)]
pub struct DetachArgs {
    #[arg(help = "Entry id.")]
    pub entry_id: i64,

    #[arg(help = "File id.")]
    pub file_id: i64,
}

#[derive(Debug, Args)]
pub struct FilesArgs {
    #[arg(short = 'e', long, help = "Only files attached to this entry.")]
    pub entry: Option<i64>,

    #[arg(
        short = 'u',
        long,
        help = "Files not attached (to --entry when given, otherwise to anything)."
    )]
    pub unlinked: bool,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FileInfoArgs {
    #[arg(help = "File id.")]
    pub id: i64,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommands {
    #[command(about = "Print one value.")]
    Get(ConfigKeyArgs),
    #[command(about = "Set one value and save.")]
    Set(ConfigSetArgs),
    #[command(about = "Remove one value and save.")]
    Unset(ConfigKeyArgs),
    #[command(about = "Remove a whole section and save.")]
    RemoveSection(ConfigSectionArgs),
    #[command(about = "Print the whole config as TOML or JSON.")]
    Export(ConfigExportArgs),
    #[command(about = "Print every section and value.")]
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct ConfigSectionArgs {
    #[arg(help = "Section name.")]
    pub section: String,
}

#[derive(Debug, Args)]
pub struct ConfigExportArgs {
    #[arg(
        short = 'f',
        long,
        help = "Output format: toml or json (defaults to the config file's format)."
    )]
    pub format: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigKeyArgs {
    #[arg(help = "Key name.")]
    pub key: String,

    #[arg(short = 's', long, help = "Section name (defaults to DEFAULT).")]
    pub section: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigSetArgs {
    #[arg(help = "Key name.")]
    pub key: String,

    #[arg(help = "Value.")]
    pub value: String,

    #[arg(short = 's', long, help = "Section name (defaults to DEFAULT).")]
    pub section: Option<String>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(help = "Component name (conf, database, storage). All when omitted.")]
    pub component: Option<String>,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    #[arg(value_enum, help = "Shell name. Auto-detected from $SHELL if omitted.")]
    pub shell: Option<Shell>,

    #[arg(
        short = 'i',
        long = "install",
        help = "Write completions to the canonical path for the shell."
    )]
    pub install: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_attach_with_options() {
        let cli = Cli::try_parse_from([
            "diary", "attach", "3", "photo.jpg", "--name", "beach.jpg", "--type", "jpg",
        ])
        .expect("attach should parse");
        match cli.command {
            Commands::Attach(args) => {
                assert_eq!(args.entry_id, 3);
                assert_eq!(args.path, PathBuf::from("photo.jpg"));
                assert_eq!(args.name.as_deref(), Some("beach.jpg"));
                assert_eq!(args.file_type.as_deref(), Some("jpg"));
                assert!(args.location.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_flag_and_verbosity_are_global() {
        let cli = Cli::try_parse_from(["diary", "ls", "-vv", "--config", "/tmp/d.toml"])
            .expect("ls should parse");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("/tmp/d.toml"));
    }

    #[test]
    fn config_set_takes_section() {
        let cli = Cli::try_parse_from(["diary", "config", "set", "name", "mine", "-s", "app"])
            .expect("config set should parse");
        match cli.command {
            Commands::Config(ConfigArgs {
                command: ConfigSubcommands::Set(args),
            }) => {
                assert_eq!(args.key, "name");
                assert_eq!(args.value, "mine");
                assert_eq!(args.section.as_deref(), Some("app"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn completions_rejects_unknown_shell() {
        assert!(Cli::try_parse_from(["diary", "completions", "tcsh"]).is_err());
    }
}
