//! Runs one command against the configured environment

use crate::cli::args::{Args, Command};
use crate::config::{Backend, Config};
use crate::engine::DockerCli;
use crate::error::{Result, SyncError};
use crate::output::OutputManager;
use crate::sync::Synchronizer;
use std::sync::Arc;
use std::time::Instant;

pub struct Runner {
    args: Args,
    output: OutputManager,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = OutputManager::new(args.verbose);
        Self { args, output }
    }

    /// Loads configuration, builds the store and docker engine, then runs the command.
    pub async fn run(&self) -> Result<()> {
        let config = Config::load(self.args.config.as_deref(), &self.args.environment)?;
        self.describe(&config);

        let store = config.remote_store()?;
        let engine = Arc::new(DockerCli::new(config.transfer.docker_binary.clone()));
        let sync = Synchronizer::new(store, engine, config.staging_root())
            .with_transfer_config(&config.transfer);
        self.run_with(&sync).await
    }

    pub async fn run_with(&self, sync: &Synchronizer) -> Result<()> {
        let start_time = Instant::now();
        match &self.args.command {
            Command::Images => {
                let images = sync.list_images().await?;
                self.output.images(&images);
            }
            Command::Push { image } => {
                self.output.section(&format!("Pushing {image}"));
                let result = sync.push(image).await?;
                if result.refs.is_empty() {
                    self.output
                        .warning(&format!("{image} has no tags; pull it by id"));
                }
                self.output.summary(
                    "Push summary",
                    &[
                        ("Image", result.image_id.short().to_string()),
                        ("Layers uploaded", result.uploaded.len().to_string()),
                        ("Layers already stored", result.skipped.to_string()),
                        ("Transferred", self.output.format_size(result.stats.bytes)),
                        ("Refs", result.refs.join(", ")),
                    ],
                );
                self.output.success(&format!(
                    "Pushed {image} in {}",
                    self.output.format_duration(start_time.elapsed())
                ));
            }
            Command::Pull { image } => {
                self.output.section(&format!("Pulling {image}"));
                let result = sync.pull_into_engine(image).await?;
                if result.layers.is_empty() {
                    self.output.info("every layer was already present locally");
                }
                self.output.summary(
                    "Pull summary",
                    &[
                        ("Image", result.resolved_id.short().to_string()),
                        ("Tagged as", format!("{}:{}", result.repository, result.tag)),
                        ("Layers downloaded", result.layers.len().to_string()),
                        ("Transferred", self.output.format_size(result.stats.bytes)),
                    ],
                );
                self.output.success(&format!(
                    "Pulled {image} in {}",
                    self.output.format_duration(start_time.elapsed())
                ));
            }
        }
        Ok(())
    }

    /// Prints a failure. Resolution errors are shown as they are; everything else gets a prefix.
    pub fn report(&self, err: &SyncError) {
        if err.is_recoverable() {
            self.output.error(&err.root().to_string());
        } else {
            self.output.error(&format!("error: {err}"));
        }
    }

    fn describe(&self, config: &Config) {
        if !self.output.verbose {
            return;
        }
        self.output.section("Configuration");
        self.output.detail(&format!("Environment: {}", config.environment));
        match config.remote.backend {
            Backend::Azure => {
                self.output
                    .detail(&format!("Account: {}", config.remote.storage_account_name));
                self.output.detail(&format!("Container: {}", config.remote.container));
            }
            Backend::Local => {
                if let Some(root) = &config.remote.local_root {
                    self.output.detail(&format!("Local root: {}", root.display()));
                }
            }
        }
        self.output.detail(&format!("Workers: {}", config.transfer.workers));
        self.output
            .detail(&format!("Staging: {}", config.staging_root().display()));
    }
}
