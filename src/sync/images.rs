//! Listing the tagged images held by the remote

use crate::error::{Result, SyncError};
use crate::image::ImageId;
use crate::remote::{self, namespace, RemoteStore};
use crate::sync::Synchronizer;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub repository: String,
    pub tag: String,
    pub id: ImageId,
    pub last_modified: DateTime<Utc>,
}

/// Every ref in the store, sorted by repository then tag.
///
/// Keys that do not split into repository and tag, and entries without a
/// modification time, are skipped with a warning.
pub async fn list_images(store: &dyn RemoteStore) -> Result<Vec<ImageInfo>> {
    let entries = store.list(&namespace::refs_prefix()).await?;

    let mut candidates = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(reference) = namespace::parse_ref_key(&entry.name) else {
            warn!(key = %entry.name, "skipping malformed ref");
            continue;
        };
        let Some(last_modified) = entry.last_modified else {
            warn!(key = %entry.name, "skipping ref without modification time");
            continue;
        };
        candidates.push((entry.name, reference, last_modified));
    }

    let mut images = try_join_all(candidates.into_iter().map(|(key, reference, last_modified)| async move {
        let id = remote::read_text(store, &key).await?;
        Ok::<_, SyncError>(ImageInfo {
            repository: reference.repository,
            tag: reference.tag,
            id: ImageId::from(id),
            last_modified,
        })
    }))
    .await?;

    images.sort_by(|a, b| a.repository.cmp(&b.repository).then_with(|| a.tag.cmp(&b.tag)));
    Ok(images)
}

impl Synchronizer {
    pub async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        list_images(self.store()).await
    }
}
