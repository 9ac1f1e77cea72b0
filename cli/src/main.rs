use acl::{Acl, AclConfig, AclError};
use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

mod commands;
mod logging;
mod utils;

use commands::{
    access::AccessAction, client::ClientAction, key::KeyAction, role::RoleAction, Context,
};
use utils::env_paths::EnvPaths;

/// ACL CLI - Command line interface for the ACL core
#[derive(Parser)]
#[command(name = "aclctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (json, text)
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    /// ACL database file
    #[arg(long, global = true, env = "ACL_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true, env = "ACL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Write log files to the default logs directory
    #[arg(long, global = true)]
    log_files: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage clients and their direct grants
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },

    /// Manage roles and role inheritance
    Role {
        #[command(subcommand)]
        action: RoleAction,
    },

    /// Manage delegated access keys
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Inspect and rebuild resolved access
    Access {
        #[command(subcommand)]
        action: AccessAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let env_paths = EnvPaths::load()?;

    let log_dir = match (cli.log_dir, cli.log_files) {
        (Some(dir), _) => Some(dir),
        (None, true) => Some(env_paths.logs_path()),
        (None, false) => None,
    };
    let _guard = logging::init_logging(cli.verbose, log_dir.as_deref())?;

    // --database, then ACL_DATABASE_PATH (possibly from .env), then DATA_PATH
    let config = AclConfig::from_env()?;
    let config = match cli.database {
        Some(path) => config.with_database_path(path),
        None if std::env::var_os("ACL_DATABASE_PATH").is_none() => {
            config.with_database_path(env_paths.database_path())
        }
        None => config,
    };
    tracing::debug!("Using database at {}", config.database_path.display());

    let ctx = Context {
        acl: Acl::open(config).await?,
        format: cli.format,
    };

    match cli.command {
        Commands::Client { action } => commands::client::execute(action, &ctx).await,
        Commands::Role { action } => commands::role::execute(action, &ctx).await,
        Commands::Key { action } => commands::key::execute(action, &ctx).await,
        Commands::Access { action } => commands::access::execute(action, &ctx).await,
    }
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<AclError>() {
        Some(acl_error) => {
            eprintln!(
                "{} [{}] {}",
                "Error:".red().bold(),
                acl_error.code().red(),
                acl_error
            );
            for issue in acl_error.issues().unwrap_or_default() {
                eprintln!("  {} {}: {}", issue.code.yellow(), issue.field, issue.message);
            }
        }
        None => eprintln!("{} {:#}", "Error:".red().bold(), error),
    }
}
