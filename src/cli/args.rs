//! Command-line argument parsing

use crate::config::DEFAULT_ENVIRONMENT;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "docker-blob-sync")]
#[command(about = "Push and pull Docker images through Azure Blob Storage, one layer at a time")]
#[command(version)]
pub struct Args {
    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long = "env",
        short = 'e',
        default_value = DEFAULT_ENVIRONMENT,
        help = "Configuration environment to use"
    )]
    pub environment: String,

    #[arg(long = "config", help = "Configuration file (default: ~/.docker-blob-sync.toml)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the images stored remotely
    Images,
    /// Upload a local image, skipping layers the remote already has
    Push {
        /// Image name, `name:tag` or id
        image: String,
    },
    /// Download an image and load it into the local engine
    Pull {
        /// `name[:tag]` or a prefix of the image id
        image: String,
    },
}
