//! Local container engine contract
//!
//! The synchronizer never touches the engine's storage directly. It exports
//! images as tar streams, imports staged directories the same way, and asks
//! the engine whether an id is already present.

pub mod docker;

pub use docker::DockerCli;

use crate::error::Result;
use crate::image::{ImageId, LayerDescriptor, LayerId};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::io::{AsyncRead, AsyncWrite};

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Writes the `save`-format tar of `name` into `sink`.
    async fn export_image(
        &self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()>;

    /// Loads a `save`-format tar read from `source`.
    async fn import_image(&self, source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()>;

    async fn image_exists(&self, id: &ImageId) -> Result<bool>;

    /// Layer ancestry of `name`, top layer first.
    async fn image_history(&self, name: &str) -> Result<Vec<LayerDescriptor>>;
}

/// Answers "is this id already present locally?" during pull resolution.
#[async_trait]
pub trait LocalCatalog: Send + Sync {
    async fn is_known(&self, id: &LayerId) -> Result<bool>;
}

#[async_trait]
impl LocalCatalog for HashSet<LayerId> {
    async fn is_known(&self, id: &LayerId) -> Result<bool> {
        Ok(self.contains(id))
    }
}

/// Catalog backed by the engine's own image store
pub struct EngineCatalog<'a>(pub &'a dyn ContainerEngine);

#[async_trait]
impl LocalCatalog for EngineCatalog<'_> {
    async fn is_known(&self, id: &LayerId) -> Result<bool> {
        self.0.image_exists(id).await
    }
}
