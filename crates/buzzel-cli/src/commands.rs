//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;

#[derive(Parser)]
#[command(name = "buzzel")]
#[command(author, version, about = "Remote build cache server", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pub log_pretty: Option<bool>,

    /// Address to listen on
    #[arg(long, global = true)]
    pub addr: Option<String>,

    /// In-memory cache capacity in bytes, 0 to disable
    #[arg(long, global = true)]
    pub max: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve objects from a local directory
    Disk {
        /// Cache directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Serve objects from memory
    Mem,

    /// Serve objects from an S3 bucket
    S3 {
        /// Bucket name
        #[arg(long)]
        bucket: Option<String>,

        /// Endpoint of an S3-compatible store
        #[arg(long)]
        endpoint: Option<String>,
    },
}

impl Cli {
    /// Flags that take precedence over the file and environment.
    pub fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            file: self.config.clone(),
            log_level: self.log_level.clone(),
            log_pretty: self.log_pretty,
            addr: self.addr.clone(),
            max: self.max,
            ..Default::default()
        };

        match &self.command {
            Commands::Disk { dir } => overrides.disk_dir = dir.clone(),
            Commands::Mem => {}
            Commands::S3 { bucket, endpoint } => {
                overrides.s3_bucket = bucket.clone();
                overrides.s3_endpoint = endpoint.clone();
            }
        }
        overrides
    }
}
