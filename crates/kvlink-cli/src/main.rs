//! kvlink - command-line front end for kvlink stores.
//!
//! One-shot subcommands operate on a single store file. `batch` drives the
//! full handle-based call surface from JSON lines, the same way an embedding
//! host would.

mod batch;
mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::Command;
use kvlink::{DumpPolicy, JournalMode, Registry, StoreOptions};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "kvlink")]
#[command(about = "Inspect and drive kvlink key-value stores")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Use write-ahead journaling for writable stores
    #[arg(long, global = true)]
    wal: bool,

    /// Key dumps warn and write nothing instead of failing
    #[arg(long, global = true)]
    lenient_dump: bool,

    #[command(subcommand)]
    command: Cli,
}

#[derive(Subcommand, Debug)]
enum Cli {
    /// Print the value stored under a key
    Get { db: PathBuf, key: String },
    /// Report whether a key is present
    Check { db: PathBuf, key: String },
    /// Store a value under a key
    Set {
        db: PathBuf,
        key: String,
        value: String,
        /// Keep an existing value instead of replacing it
        #[arg(long)]
        no_overwrite: bool,
        /// Discard all existing records first
        #[arg(long)]
        truncate: bool,
    },
    /// Print the number of keys
    Size { db: PathBuf },
    /// Write every key to a file, one per line
    Dump { db: PathBuf, destination: PathBuf },
    /// Run JSON-line requests from a script or stdin
    Batch {
        /// Read requests from this file instead of stdin
        #[arg(long)]
        script: Option<PathBuf>,
    },
}

impl Args {
    fn store_options(&self) -> StoreOptions {
        let mut options = StoreOptions::default();
        if self.wal {
            options = options.with_journal_mode(JournalMode::Wal);
        }
        if self.lenient_dump {
            options = options.with_dump_policy(DumpPolicy::Lenient);
        }
        options
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Set up logging; stdout carries command output
    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let options = args.store_options();
    debug!("Store options: {:?}", options);
    let mut registry: Registry = Registry::with_options(options);
    let mut stdout = io::stdout().lock();

    let command = match args.command {
        Cli::Batch { script } => {
            let summary = match script {
                Some(path) => {
                    let file = File::open(&path)
                        .with_context(|| format!("opening batch script {}", path.display()))?;
                    batch::run_batch(BufReader::new(file), &mut stdout, &mut registry)?
                }
                None => batch::run_batch(io::stdin().lock(), &mut stdout, &mut registry)?,
            };
            info!(
                "Batch finished: {} succeeded, {} failed",
                summary.succeeded, summary.failed
            );
            return Ok(if summary.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Cli::Get { db, key } => Command::Get { db, key },
        Cli::Check { db, key } => Command::Check { db, key },
        Cli::Set {
            db,
            key,
            value,
            no_overwrite,
            truncate,
        } => Command::Set {
            db,
            key,
            value,
            overwrite: !no_overwrite,
            truncate,
        },
        Cli::Size { db } => Command::Size { db },
        Cli::Dump { db, destination } => Command::Dump { db, destination },
    };

    let positive = commands::run_command(command, &mut registry, &mut stdout)?;
    Ok(if positive {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
