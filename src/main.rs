mod app;
mod cli;
mod completions;
mod config;
mod db;
mod db_manager;
mod domain;
mod logging;
mod storage;
mod ui;
mod validity;

use std::path::Path;

use tracing::debug;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), app::AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// An app that has only its config source set, so `status` can report on a
/// diary that was never initialized without creating anything.
fn unopened_app(config_path: &Path) -> app::App {
    app::App::new(
        config::ConfigManager::with_path(config_path),
        db_manager::DbManager::new(),
        storage::FileManager::default(),
    )
}

fn run() -> Result<(), app::AppError> {
    use app::EntryPatch;
    use clap::Parser;
    use cli::{Commands, ConfigSubcommands};

    let cli = cli::Cli::parse();
    logging::init(cli.verbose);
    debug!(config = %cli.config.display(), "starting");

    match &cli.command {
        Commands::Completions(args) => {
            return completions::run_completions_command(args.shell, args.install);
        }
        Commands::Status(args) => {
            let app = if cli.config.exists() {
                app::App::open(&cli.config)?
            } else {
                unopened_app(&cli.config)
            };
            let mut statuses = app.readiness();
            let mut ready = true;
            if let Some(name) = args.component.as_deref() {
                ready = app.is_ready_by_name(name)?;
                let kind: app::ComponentKind = name.parse()?;
                statuses.retain(|status| status.component == kind);
            }
            if args.json {
                print_json(&statuses)?;
            } else {
                ui::print_status(&statuses);
            }
            if !ready {
                std::process::exit(2);
            }
            return Ok(());
        }
        _ => {}
    }

    let mut app = app::App::open(&cli.config)?;
    app.start()?;

    match cli.command {
        Commands::Init => {
            let root = app
                .storage_root()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            println!("diary initialized at {}", cli.config.display());
            println!("storage: {root}");
            if let Some(target) = app.database_target() {
                println!("database: {}", target.display());
            }
            if let Some(version) = app.schema_version()? {
                println!("schema version: {version}");
            }
        }
        Commands::New(args) => {
            let entry = app.create_entry(&args.title, args.text.as_deref(), args.date.as_deref())?;
            println!("created entry #{}: {}", entry.id, entry.title);
        }
        Commands::Ls(args) => {
            let entries = app.list_entries()?;
            if args.json {
                print_json(&entries)?;
            } else {
                ui::print_entry_list(&entries);
            }
        }
        Commands::Show(args) => {
            let detail = app.show_entry(args.id)?.ok_or(app::AppError::NotFound {
                kind: "entry",
                id: args.id,
            })?;
            if args.json {
                print_json(&detail)?;
            } else {
                ui::print_entry_detail(&detail);
            }
        }
        Commands::Edit(args) => {
            let entry = app.update_entry(
                args.id,
                EntryPatch {
                    title: args.title,
                    text: args.text,
                    date: args.date,
                },
            )?;
            println!("updated entry #{}: {}", entry.id, entry.title);
        }
        Commands::Rm(args) => {
            let summary = app.delete_entry(args.id)?;
            println!("deleted entry #{}", summary.id);
            for path in &summary.removed_files {
                println!("removed {path}");
            }
        }
        Commands::Attach(args) => {
            let date = args
                .date
                .as_deref()
                .map(domain::entry::parse_date)
                .transpose()?;
            let file = app.attach_file(
                args.entry_id,
                &args.path,
                storage::StoreRequest {
                    name: args.name,
                    location: args.location,
                    file_type: args.file_type,
                    date,
                },
            )?;
            println!(
                "attached file #{} ({}/{}) to entry #{}",
                file.id, file.location, file.name, args.entry_id
            );
        }
        Commands::Detach(args) => {
            let removed = app.detach_file(args.entry_id, args.file_id)?;
            println!(
                "detached file #{} from entry #{}",
                args.file_id, args.entry_id
            );
            if removed {
                println!("file #{} was no longer referenced and was removed", args.file_id);
            }
        }
        Commands::Files(args) => {
            let files = app.list_files(args.entry, args.unlinked)?;
            if args.json {
                print_json(&files)?;
            } else {
                ui::print_file_list(&files);
            }
        }
        Commands::FileInfo(args) => {
            let info = app.file_info(args.id)?;
            if args.json {
                print_json(&info)?;
            } else {
                ui::print_file_info(&info);
            }
        }
        Commands::Config(args) => match args.command {
            ConfigSubcommands::Get(args) => {
                println!("{}", app.config_get(&args.key, args.section.as_deref())?);
            }
            ConfigSubcommands::Set(args) => {
                app.config_set(&args.key, &args.value, args.section.as_deref())?;
                println!("{} = {}", args.key, args.value);
            }
            ConfigSubcommands::Unset(args) => {
                let previous = app.config_unset(&args.key, args.section.as_deref())?;
                println!("removed {} (was {})", args.key, previous);
            }
            ConfigSubcommands::RemoveSection(args) => {
                app.config_remove_section(&args.section)?;
                println!("removed section [{}]", args.section);
            }
            ConfigSubcommands::Export(args) => {
                print!("{}", app.config_export(args.format.as_deref())?);
            }
            ConfigSubcommands::List(args) => {
                let values = app.config_list();
                if args.json {
                    print_json(&values)?;
                } else {
                    ui::print_config(&values);
                }
            }
        },
        Commands::Cleanup => {
            let removed = app.cleanup_storage()?;
            println!("removed {removed} empty director(ies)");
        }
        Commands::Completions(_) | Commands::Status(_) => {}
    }
    Ok(())
}
