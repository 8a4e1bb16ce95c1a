//! Pull: resolve a query remotely and stage the layers the local side lacks

use crate::engine::{EngineCatalog, LocalCatalog};
use crate::error::{Result, SyncError};
use crate::image::{archive, ImageId, ImageReference, LayerId, Repositories};
use crate::remote::{self, namespace};
use crate::resolver::{Resolution, ResolvedImage, Resolver};
use crate::staging::StagingArea;
use crate::sync::Synchronizer;
use crate::transfer::{self, TransferStats, TransferUnit};
use std::path::PathBuf;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct PullResult {
    pub resolved_id: ImageId,
    pub repository: String,
    pub tag: String,
    /// Directory laid out for the engine's import
    pub local_path: PathBuf,
    /// Layers downloaded, top first
    pub layers: Vec<LayerId>,
    pub stats: TransferStats,
}

impl Synchronizer {
    /// Pulls `query` against the engine's own image store, imports the
    /// staged result and removes the staging area.
    pub async fn pull_into_engine(&self, query: &str) -> Result<PullResult> {
        let mut staging = self.new_staging();
        let result = self.pull_and_import(query, &mut staging).await;
        let disposed = staging.dispose();
        let result = result?;
        disposed?;
        Ok(result)
    }

    async fn pull_and_import(&self, query: &str, staging: &mut StagingArea) -> Result<PullResult> {
        let catalog = EngineCatalog(self.engine());
        let result = self.pull(query, &catalog, staging).await?;
        archive::import_dir(self.engine(), &result.local_path, self.pipe_capacity()).await?;
        info!(image = %result.resolved_id.short(), "imported into engine");
        Ok(result)
    }

    /// Resolves `query`, downloads the layers `catalog` does not know into
    /// `staging`, and writes the `repositories` document next to them.
    #[instrument(skip_all, fields(image = %query))]
    pub async fn pull(
        &self,
        query: &str,
        catalog: &dyn LocalCatalog,
        staging: &mut StagingArea,
    ) -> Result<PullResult> {
        let resolver = Resolver::new(self.store());
        let resolved = resolver.resolve_image(query).await?;
        let reference = self.display_reference(&resolved).await?;

        let dir = staging.temp_dir(&format!("pull_{}", resolved.id.short()))?;

        let layers = if catalog.is_known(&resolved.id).await? {
            info!(id = %resolved.id.short(), "image already present locally");
            Vec::new()
        } else {
            let manifest = resolver.image_manifest(&resolved.id).await?;
            match manifest.top_layer() {
                Some(top) => resolver.discover_layers(&top, catalog).await?,
                None => Vec::new(),
            }
        };
        info!(layers = layers.len(), "layers to download");

        let units = layers
            .iter()
            .map(|id| TransferUnit::Download {
                layer: id.clone(),
                destination: dir.clone(),
            })
            .collect();
        let stats = transfer::run_units(&self.dispatcher, &self.transfer, units).await?;

        let mut repositories = Repositories::new();
        repositories.insert(&reference, &resolved.id);
        repositories.write_to(&dir)?;
        info!(id = %resolved.id.short(), bytes = stats.bytes, "pull staged");

        Ok(PullResult {
            resolved_id: resolved.id,
            repository: reference.repository,
            tag: reference.tag,
            local_path: dir,
            layers,
            stats,
        })
    }

    /// The name the pulled image is tagged with locally. A hash query takes
    /// the first name recorded with the image; an image with no recorded
    /// names keeps the query.
    async fn display_reference(&self, resolved: &ResolvedImage) -> Result<ImageReference> {
        if resolved.resolution == Resolution::Ref {
            return Ok(resolved.reference.clone());
        }
        let key = namespace::image_key(&resolved.id, namespace::IMAGE_REPOSITORIES);
        let raw = match remote::read_object(self.store(), &key).await {
            Ok(raw) => raw,
            Err(SyncError::NotFound(_)) => {
                debug!(key, "no recorded names for image");
                return Ok(resolved.reference.clone());
            }
            Err(e) => return Err(e),
        };
        let doc = Repositories::from_slice(&raw).map_err(|e| {
            SyncError::Corrupt(format!("{key} is not a valid repositories document: {e}"))
        })?;
        Ok(doc
            .references()
            .into_iter()
            .next()
            .unwrap_or_else(|| resolved.reference.clone()))
    }
}
