//! CLI for the relup release uploader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relup_core::config;
use std::path::PathBuf;

use commands::{run_checksum, run_config, run_upload, UploadArgs};

/// Top-level CLI for relup.
#[derive(Debug, Parser)]
#[command(name = "relup")]
#[command(about = "relup: publish release files with bounded parallel transfers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Upload files into the release store as one release.
    Upload {
        /// Release version the files belong to (e.g. 1.4.0).
        #[arg(long, value_name = "VERSION")]
        release_version: String,
        /// Target platform (e.g. linux-x86_64).
        #[arg(long)]
        platform: String,
        /// Transfer up to N files at once (default: max_concurrent from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Store root directory (default: store_root from config).
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
        /// Files to upload, queued in the order given.
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },

    /// Compute SHA-256 of a file.
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },

    /// Show the config file path and effective settings.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Upload {
                release_version,
                platform,
                jobs,
                store,
                files,
            } => {
                let args = UploadArgs {
                    release_version,
                    platform,
                    jobs,
                    store,
                    files,
                };
                run_upload(&cfg, args).await?;
            }
            CliCommand::Checksum { path } => run_checksum(&path).await?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
