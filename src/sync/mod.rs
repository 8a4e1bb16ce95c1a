//! Push, pull and listing on top of the transfer engine

pub mod images;
pub mod pull;
pub mod push;

pub use images::ImageInfo;
pub use pull::PullResult;
pub use push::PushResult;

use crate::config::TransferConfig;
use crate::engine::ContainerEngine;
use crate::remote::RemoteStore;
use crate::staging::StagingArea;
use crate::transfer::{ChunkedTransfer, Dispatcher, RetryPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_PIPE_CAPACITY: usize = 1024 * 1024;

/// Everything one push or pull needs: the two collaborators and the transfer settings.
#[derive(Clone)]
pub struct Synchronizer {
    store: Arc<dyn RemoteStore>,
    engine: Arc<dyn ContainerEngine>,
    transfer: ChunkedTransfer,
    dispatcher: Dispatcher,
    staging_root: PathBuf,
    pipe_capacity: usize,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        engine: Arc<dyn ContainerEngine>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transfer: ChunkedTransfer::new(Arc::clone(&store)),
            store,
            engine,
            dispatcher: Dispatcher::default(),
            staging_root: staging_root.into(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    /// Applies the `[transfer]` settings of a configuration.
    pub fn with_transfer_config(mut self, config: &TransferConfig) -> Self {
        self.transfer = ChunkedTransfer::new(Arc::clone(&self.store))
            .with_block_size(config.block_size)
            .with_max_blocks(config.max_blocks)
            .with_retry(RetryPolicy::new(
                config.retry_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ));
        self.dispatcher = Dispatcher::new(config.workers);
        self.pipe_capacity = config.pipe_capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.dispatcher = Dispatcher::new(workers);
        self
    }

    pub fn with_transfer(mut self, transfer: ChunkedTransfer) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn pipe_capacity(&self) -> usize {
        self.pipe_capacity
    }

    /// A fresh staging area under the configured root
    pub fn new_staging(&self) -> StagingArea {
        StagingArea::for_operation(&self.staging_root)
    }
}
