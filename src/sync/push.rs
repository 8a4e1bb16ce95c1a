//! Push: export a local image and upload what the remote is missing

use crate::error::{Result, SyncError};
use crate::image::{export, ImageId, ImageReference, LayerId, Manifest, MANIFEST_FILE};
use crate::remote::namespace;
use crate::resolver::Resolver;
use crate::staging::StagingArea;
use crate::sync::Synchronizer;
use crate::transfer::{self, TransferStats, TransferUnit};
use bytes::Bytes;
use std::collections::HashSet;
use std::path::{Component, Path};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct PushResult {
    pub image_id: ImageId,
    /// Layers uploaded by this push, in manifest order
    pub uploaded: Vec<LayerId>,
    /// Manifest layers the remote already had
    pub skipped: usize,
    /// `repository:tag` refs written
    pub refs: Vec<String>,
    pub stats: TransferStats,
}

impl Synchronizer {
    /// Pushes `query` using a staging area of its own, removed before returning.
    pub async fn push(&self, query: &str) -> Result<PushResult> {
        let mut staging = self.new_staging();
        let result = self.push_staged(query, &mut staging).await;
        let disposed = staging.dispose();
        let result = result?;
        disposed?;
        Ok(result)
    }

    /// Pushes `query`, staging exported files under `staging`.
    ///
    /// Layer parts go first, then image metadata, then refs, so a ref never
    /// points at an image whose data is not fully stored.
    #[instrument(skip_all, fields(image = %query))]
    pub async fn push_staged(&self, query: &str, staging: &mut StagingArea) -> Result<PushResult> {
        let resolver = Resolver::new(self.store());

        let history = self.engine().image_history(query).await?;
        let history_ids: Vec<LayerId> = history.into_iter().map(|d| d.id).collect();
        let missing = resolver.missing_layers(&history_ids).await?;
        let missing_set: HashSet<LayerId> = missing.iter().cloned().collect();
        info!(layers = history_ids.len(), missing = missing.len(), "resolved remote state");

        let dir = staging.temp_dir(&format!("push_{query}"))?;
        let report =
            export::stage_missing_layers(self.engine(), query, &dir, &missing_set, self.pipe_capacity())
                .await?;

        let manifest = Manifest::open(&dir)?;
        let image_id = manifest.image_id();
        let known: HashSet<&LayerId> = history_ids.iter().collect();
        let mut upload = Vec::new();
        let mut skipped = 0;
        for id in manifest.layer_ids() {
            if !known.contains(&id) {
                return Err(SyncError::Corrupt(format!(
                    "manifest of {query} lists layer {id} that is not in its history"
                )));
            }
            if !missing_set.contains(&id) {
                skipped += 1;
            } else if !upload.contains(&id) {
                if !report.staged_layers.contains(&id) {
                    return Err(SyncError::Corrupt(format!("export of {query} is missing layer {id}")));
                }
                upload.push(id);
            }
        }

        let layer_units = upload
            .iter()
            .flat_map(|id| {
                let layer_dir = dir.join(id.as_str());
                namespace::LAYER_PARTS.iter().map(move |part| TransferUnit::Upload {
                    source: layer_dir.join(part),
                    key: namespace::layer_key(id, part),
                })
            })
            .collect();
        let mut stats = transfer::run_units(&self.dispatcher, &self.transfer, layer_units).await?;
        info!(layers = upload.len(), bytes = stats.bytes, "layers uploaded");

        stats += transfer::run_units(
            &self.dispatcher,
            &self.transfer,
            metadata_units(&dir, &manifest, &image_id, report.repositories.is_some())?,
        )
        .await?;

        let refs = self.put_refs(&manifest, &image_id).await?;
        info!(image = %image_id.short(), refs = refs.len(), "push complete");

        Ok(PushResult {
            image_id,
            uploaded: upload,
            skipped,
            refs,
            stats,
        })
    }

    async fn put_refs(&self, manifest: &Manifest, image_id: &ImageId) -> Result<Vec<String>> {
        let mut written = Vec::new();
        for repo_tag in manifest.repo_tags() {
            let reference = ImageReference::from_repo_tag(repo_tag);
            let key = namespace::ref_key(&reference);
            self.transfer
                .put_bytes(&key, Bytes::from(image_id.to_string()))
                .await?;
            written.push(reference.to_string());
        }
        Ok(written)
    }
}

fn metadata_units(
    dir: &Path,
    manifest: &Manifest,
    image_id: &ImageId,
    has_repositories: bool,
) -> Result<Vec<TransferUnit>> {
    let relative = Path::new(&manifest.config);
    let config = dir.join(relative);
    let contained = relative.components().all(|c| matches!(c, Component::Normal(_)));
    if !contained || !config.is_file() {
        return Err(SyncError::Corrupt(format!(
            "image config {} is not in the export",
            manifest.config
        )));
    }

    let mut units = vec![
        TransferUnit::Upload {
            source: dir.join(MANIFEST_FILE),
            key: namespace::image_key(image_id, namespace::IMAGE_MANIFEST),
        },
        TransferUnit::Upload {
            source: config,
            key: namespace::image_key(image_id, namespace::IMAGE_CONFIG),
        },
    ];
    if has_repositories {
        units.push(TransferUnit::Upload {
            source: dir.join(namespace::IMAGE_REPOSITORIES),
            key: namespace::image_key(image_id, namespace::IMAGE_REPOSITORIES),
        });
    }
    Ok(units)
}
