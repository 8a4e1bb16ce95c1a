//! Moving files between the staging area and the remote store

pub mod chunked;
pub mod dispatcher;
pub mod retry;

pub use chunked::{BlockPlan, ChunkedTransfer, TransferStats, MAX_BLOCK_ID, MAX_BLOCK_SIZE};
pub use dispatcher::Dispatcher;
pub use retry::RetryPolicy;

use crate::error::Result;
use crate::image::LayerId;
use crate::remote::namespace;
use std::fmt;
use std::path::PathBuf;

/// One independent piece of work for the dispatcher
#[derive(Debug, Clone)]
pub enum TransferUnit {
    Upload { source: PathBuf, key: String },
    Download { layer: LayerId, destination: PathBuf },
}

impl TransferUnit {
    pub async fn perform(self, transfer: &ChunkedTransfer) -> Result<TransferStats> {
        match self {
            TransferUnit::Upload { source, key } => transfer.upload_file(&source, &key).await,
            TransferUnit::Download { layer, destination } => {
                transfer.download_layer(&layer, &destination).await
            }
        }
    }
}

impl fmt::Display for TransferUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferUnit::Upload { key, .. } => f.write_str(key),
            TransferUnit::Download { layer, .. } => f.write_str(&namespace::layer_prefix(layer)),
        }
    }
}

/// Dispatches `units` over `dispatcher`, each performed with a clone of `transfer`.
pub async fn run_units(
    dispatcher: &Dispatcher,
    transfer: &ChunkedTransfer,
    units: Vec<TransferUnit>,
) -> Result<TransferStats> {
    let transfer = transfer.clone();
    let results = dispatcher
        .run(units, move |unit| {
            let transfer = transfer.clone();
            async move { unit.perform(&transfer).await }
        })
        .await?;

    let mut total = TransferStats::default();
    for stats in results {
        total += stats;
    }
    Ok(total)
}
