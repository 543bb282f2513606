//! SciStash command-line smoke tool.
//!
//! # Commands
//!
//! - `ping` - Check core linkage and print versions
//! - `list <kind>` - List stored entities of one kind
//! - `show <id>` - Print one stored entity
//! - `add-author <first> <last>` - Store an author
//! - `delete <id>` - Delete an entity, optionally with its dependents

use clap::{Parser, Subcommand};
use log::error;
use scistash_core::{
    close_db, init_from_config, open_stash, Author, CascadeAll, CascadeNone, CascadePolicy,
    Connection, EntityId, EntityKind, SqliteStashRepository, StashConfig, StashSession,
};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

/// Personal bibliography stash.
#[derive(Parser)]
#[command(name = "scistash")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the stash database
    #[arg(global = true, long, default_value = "scistash.db")]
    db: PathBuf,

    /// Create the stash if it does not exist
    #[arg(global = true, long)]
    create: bool,

    /// Work on an in-memory stash; nothing is written to disk
    #[arg(global = true, long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(global = true, long)]
    log_level: Option<String>,

    /// Absolute directory for log files; logging is off without it
    #[arg(global = true, long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check core linkage and print versions
    Ping,

    /// List stored entities of one kind
    List {
        /// authors, articles, annotations, tags, files or refs
        kind: String,
    },

    /// Print one stored entity
    Show { id: EntityId },

    /// Store an author
    AddAuthor { first: String, last: String },

    /// Delete an entity
    Delete {
        id: EntityId,

        /// Also delete attached entities, incoming references and links
        #[arg(long)]
        cascade: bool,
    },
}

impl Cli {
    fn config(&self) -> StashConfig {
        let mut config = StashConfig::new(&self.db).with_create(self.create);
        config.dry_run = self.dry_run;
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        config.log_dir = self.log_dir.clone();
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Commands::Ping = cli.command {
        println!("scistash_core ping={}", scistash_core::ping());
        println!("scistash_core version={}", scistash_core::core_version());
        return ExitCode::SUCCESS;
    }

    let config = cli.config();
    if let Err(err) = init_from_config(&config) {
        eprintln!("warning: {err}");
    }

    let mut conn = match open_stash(&config) {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&cli.command, &config, &mut conn);
    let closed = close_db(conn);

    match (outcome, closed) {
        (Ok(()), Ok(())) => ExitCode::SUCCESS,
        (Err(err), _) => {
            error!("event=cli_command module=cli status=error error={}", err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
        (Ok(()), Err(err)) => {
            eprintln!("error: closing stash failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    command: &Commands,
    config: &StashConfig,
    conn: &mut Connection,
) -> Result<(), Box<dyn Error>> {
    let repo = SqliteStashRepository::try_new(conn)?;
    let mut session = StashSession::from_config(repo, config)?;

    match command {
        Commands::Ping => {}
        Commands::List { kind } => {
            let kind = EntityKind::parse(kind).ok_or_else(|| format!("unknown kind `{kind}`"))?;
            for line in session.list_all(kind)? {
                println!("{line}");
            }
        }
        Commands::Show { id } => {
            println!("{}", session.checkout(*id)?);
            session.discard()?;
        }
        Commands::AddAuthor { first, last } => {
            session.begin(Author::new(first.as_str(), last.as_str()))?;
            let report = session.save()?;
            println!("{}", report.id);
        }
        Commands::Delete { id, cascade } => {
            let mut policy: Box<dyn CascadePolicy> = if *cascade {
                Box::new(CascadeAll)
            } else {
                Box::new(CascadeNone)
            };
            let report = session.delete(*id, policy.as_mut())?;
            for (removed, kind) in &report.removed {
                println!("deleted {kind} {removed}");
            }
        }
    }

    session.finish();
    Ok(())
}
