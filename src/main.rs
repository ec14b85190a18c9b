use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use bioverify::configuration::config::Config;
use bioverify::session_management::session_manager::SessionManager;
use bioverify::session_management::SessionStatus;
use bioverify::storage::database_storage::DatabaseStorage;
use bioverify::storage::file_storage::ArtifactStore;
use bioverify::storage::types::SessionFilter;
use chrono::{Duration, Utc};
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "bioverify")]
#[command(version = "0.1.0")]
#[command(about = "Operator tool for the identity verification store")]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long, env = "BIOVERIFY_CONFIG")]
    config_file: Option<PathBuf>,

    #[arg(long, env = "DB_URL")]
    database_url: Option<String>,

    #[arg(long, env = "UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Accepts true/false, yes/no, on/off and 1/0 in any case
    #[arg(long, env = "DEBUG", value_parser = BoolishValueParser::new())]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema and upload directories
    Init,
    /// Print a session with its results and artifacts
    Show {
        #[arg(long)]
        token: String,
    },
    /// List sessions
    Sessions {
        #[arg(long)]
        user: Option<i64>,
        /// pending, in_progress, completed or failed
        #[arg(long)]
        status: Option<String>,
    },
    /// Remove finished sessions and their uploaded files
    Purge {
        #[arg(long, default_value_t = 30)]
        older_than_days: i64,
    },
}

fn load_config(args: &Args) -> Result<Config, Box<dyn Error>> {
    let config = match &args.config_file {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_overrides(args.database_url.clone(), args.upload_dir.clone());
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;
    info!("Configuration imported successfully");

    let storage = Arc::new(DatabaseStorage::connect(&config.storage)?);
    let artifacts = ArtifactStore::new(&config.uploads)?;
    let manager = SessionManager::from_config(storage, &config);

    match args.command {
        Command::Init => {
            info!(
                "Store ready at {}, uploads at {}",
                config.storage.database_url,
                artifacts.root().display()
            );
        }
        Command::Show { token } => {
            let session = manager.get_session_by_token(&token)?;
            let report = json!({
                "session": session,
                "documents": manager.list_documents(session.id)?,
                "live_images": manager.list_live_images(session.id)?,
                "results": manager.list_results(session.id)?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Sessions { user, status } => {
            let status = match status {
                Some(raw) => Some(
                    SessionStatus::parse(&raw).ok_or_else(|| format!("unknown status: {}", raw))?,
                ),
                None => None,
            };
            let sessions = manager.list_sessions(Some(SessionFilter {
                user_id: user,
                status,
                ..Default::default()
            }))?;
            for s in &sessions {
                println!(
                    "{}\t{}\tuser={}\t{}\t{}",
                    s.id,
                    s.session_token,
                    s.user_id,
                    s.status.as_str(),
                    s.failure_reason.map(|r| r.as_str()).unwrap_or("-")
                );
            }
            info!("{} session(s)", sessions.len());
        }
        Command::Purge { older_than_days } => {
            let cutoff = Utc::now() - Duration::days(older_than_days);
            // collect file paths first, rows are gone after the purge
            let mut files = Vec::new();
            for s in manager.list_sessions(None)? {
                if s.is_terminal() && s.completed_at.is_some_and(|at| at < cutoff) {
                    files.extend(manager.list_documents(s.id)?.into_iter().map(|d| d.file_path));
                    files.extend(manager.list_live_images(s.id)?.into_iter().map(|i| i.file_path));
                }
            }
            let removed = manager.purge_sessions(cutoff)?;
            for path in files {
                if let Err(e) = artifacts.remove(&path) {
                    warn!("Could not remove artifact {}: {}", path, e);
                }
            }
            info!("Purged {} session(s)", removed);
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .parse_default_env()
        .format_target(false)
        .init();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
