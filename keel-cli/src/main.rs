// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keel CLI
//!
//! Drive a storage backend (local directory or S3-compatible bucket) from the shell.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use keel_core::StorageResult;
use keel_providers::{open_backend, S3Config, StorageConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about = "Keel - one filesystem contract over local disks and object stores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Backend configuration file (TOML)
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    /// Backend to use when no configuration file is given; s3 reads the S3_* variables
    #[arg(short, long, global = true, value_enum)]
    backend: Option<BackendKind>,

    /// Root directory of the local backend
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    Local,
    S3,
}

#[derive(Subcommand)]
enum Commands {
    /// Create directories (parents included)
    Mkdir {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// List the immediate children of a directory
    #[command(alias = "dir")]
    Ls {
        path: String,

        /// Mark files and directories
        #[arg(short, long)]
        long: bool,
    },

    /// Remove files
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Remove a directory
    Rmdir {
        path: String,

        /// Remove everything below the directory as well
        #[arg(short, long)]
        recursive: bool,

        /// Succeed if the directory does not exist
        #[arg(short, long)]
        force: bool,
    },

    /// Move a file; never overwrites
    Mv { source: String, dest: String },

    /// Exit successfully if a regular file exists at the path
    Exists { path: String },

    /// Write file contents to stdout
    Cat { path: String },

    /// Upload a local file
    Put {
        /// Local file to read
        file: PathBuf,

        /// Destination path in the backend
        dest: String,
    },

    /// Export files as a store-only zip archive
    Zip {
        /// Local archive to create
        output: PathBuf,

        /// Files to add, as `path` or `path=name-in-archive`
        #[arg(required = true)]
        entries: Vec<String>,
    },

    /// Remove empty directories below a root, keeping the root
    Prune { root: String },

    /// Show storage space information
    Df {
        #[arg(default_value = "library")]
        path: String,
    },

    /// Create the library base directory
    Init {
        #[arg(default_value = "library")]
        base: String,
    },

    /// Delete files, continuing past failures
    Purge {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration file in the platform config directory, if one exists
fn default_config_file() -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "hyperpolymath", "keel")?;
    let path = dirs.config_dir().join("config.toml");
    path.is_file().then_some(path)
}

/// `--config`, then `--backend`, then the default config file, then the local root.
fn storage_config(cli: &Cli) -> StorageResult<StorageConfig> {
    if let Some(path) = &cli.config {
        return StorageConfig::load(path);
    }
    match cli.backend {
        Some(BackendKind::S3) => Ok(StorageConfig::S3(S3Config::from_env()?)),
        Some(BackendKind::Local) => Ok(StorageConfig::Local { root: cli.root.clone() }),
        None => match default_config_file() {
            Some(path) => StorageConfig::load(path),
            None => Ok(StorageConfig::Local { root: cli.root.clone() }),
        },
    }
}

async fn run(cli: Cli) -> StorageResult<()> {
    let config = storage_config(&cli)?;
    let backend = open_backend(&config)?;
    debug!(backend = backend.id(), "backend ready");

    match cli.command {
        Commands::Mkdir { paths } => commands::mkdir(&backend, &paths).await,
        Commands::Ls { path, long } => commands::ls(&backend, &path, long).await,
        Commands::Rm { paths } => commands::rm(&backend, &paths).await,
        Commands::Rmdir { path, recursive, force } => {
            commands::rmdir(&backend, &path, recursive, force).await
        }
        Commands::Mv { source, dest } => commands::mv(&backend, &source, &dest).await,
        Commands::Exists { path } => commands::exists(&backend, &path).await,
        Commands::Cat { path } => commands::cat(&backend, &path).await,
        Commands::Put { file, dest } => commands::put(&backend, &file, &dest).await,
        Commands::Zip { output, entries } => commands::zip(backend, &output, &entries).await,
        Commands::Prune { root } => commands::prune(&backend, &root).await,
        Commands::Df { path } => commands::df(&backend, &path).await,
        Commands::Init { base } => commands::init(backend, &base).await,
        Commands::Purge { paths } => commands::purge(backend, &paths).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", console::style("Error:").red().bold());
            ExitCode::FAILURE
        }
    }
}
