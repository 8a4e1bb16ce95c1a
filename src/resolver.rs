//! Layer graph resolution against the remote store
//!
//! Push asks which of an image's layers the remote lacks. Pull turns a user
//! query into an image id and walks layer ancestry until it reaches something
//! the local side already has.

use crate::engine::LocalCatalog;
use crate::error::{Result, SyncError};
use crate::image::{ImageId, ImageReference, LayerDescriptor, LayerId, Manifest};
use crate::remote::{self, namespace, RemoteStore};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// How a pull query was matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exact `refs/{repository}/{tag}` pointer
    Ref,
    /// Unique prefix of an image id
    Prefix,
}

#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub id: ImageId,
    pub reference: ImageReference,
    pub resolution: Resolution,
}

pub struct Resolver<'a> {
    store: &'a dyn RemoteStore,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn RemoteStore) -> Self {
        Self { store }
    }

    /// Layers of `ids` that the remote does not hold, in the given order.
    ///
    /// A partially present layer is an error, never "missing".
    pub async fn missing_layers(&self, ids: &[LayerId]) -> Result<Vec<LayerId>> {
        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if remote::has_layer(self.store, id).await? {
                debug!(layer = %id.short(), "already in remote");
            } else {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }

    /// Resolves a pull query by exact ref first, then by id prefix.
    pub async fn resolve_image(&self, query: &str) -> Result<ResolvedImage> {
        let reference = ImageReference::parse(query);
        match self.find_by_ref(&reference).await {
            Ok(id) => {
                info!(query, id = %id.short(), "resolved by ref");
                return Ok(ResolvedImage {
                    id,
                    reference,
                    resolution: Resolution::Ref,
                });
            }
            Err(SyncError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let id = self.find_by_prefix(query).await?;
        info!(query, id = %id.short(), "resolved by id prefix");
        Ok(ResolvedImage {
            id,
            reference,
            resolution: Resolution::Prefix,
        })
    }

    pub async fn find_by_ref(&self, reference: &ImageReference) -> Result<ImageId> {
        let key = namespace::ref_key(reference);
        let pointer = remote::read_text(self.store, &key).await?;
        if pointer.is_empty() {
            return Err(SyncError::Corrupt(format!("ref {key} is empty")));
        }
        Ok(ImageId::from(pointer))
    }

    /// Finds the single image whose id starts with the hash in `query`.
    pub async fn find_by_prefix(&self, query: &str) -> Result<ImageId> {
        let first = query.split('/').next().unwrap_or_default();
        let partial = first.strip_prefix("sha256:").unwrap_or(first);
        if partial.is_empty() {
            return Err(SyncError::NotFound(query.to_string()));
        }

        let matches: BTreeSet<ImageId> = self
            .store
            .list(&namespace::image_search_prefix(partial))
            .await?
            .iter()
            .filter_map(|entry| namespace::image_id_from_key(&entry.name))
            .collect();

        let count = matches.len();
        match matches.into_iter().next() {
            None => Err(SyncError::NotFound(query.to_string())),
            Some(id) if count == 1 => Ok(id),
            Some(_) => Err(SyncError::Ambiguous {
                query: query.to_string(),
                matches: count,
            }),
        }
    }

    pub async fn image_manifest(&self, id: &ImageId) -> Result<Manifest> {
        let key = namespace::image_key(id, namespace::IMAGE_MANIFEST);
        let raw = remote::read_object(self.store, &key)
            .await
            .map_err(|e| missing_as_corrupt(e, || format!("image {id} has no manifest")))?;
        Manifest::from_slice(&raw)
    }

    pub async fn layer_descriptor(&self, id: &LayerId) -> Result<LayerDescriptor> {
        let key = namespace::layer_key(id, namespace::LAYER_JSON);
        let raw = remote::read_object(self.store, &key)
            .await
            .map_err(|e| missing_as_corrupt(e, || format!("layer {id} is referenced but not stored")))?;
        let descriptor = LayerDescriptor::from_slice(&raw)?;
        if &descriptor.id != id {
            return Err(SyncError::Corrupt(format!(
                "{key} describes layer {} instead of {id}",
                descriptor.id
            )));
        }
        Ok(descriptor)
    }

    /// Walks parent pointers from `top` and returns the layers to download,
    /// top first, stopping at the first layer `catalog` already knows or at
    /// the root. Revisiting a layer is a `Cycle` error.
    pub async fn discover_layers(&self, top: &LayerId, catalog: &dyn LocalCatalog) -> Result<Vec<LayerId>> {
        let mut visited = HashSet::new();
        let mut pending = Vec::new();
        let mut current = Some(top.clone());

        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                return Err(SyncError::Cycle(id));
            }
            debug!(layer = %id.short(), "examining remote layer");
            let descriptor = self.layer_descriptor(&id).await?;
            if catalog.is_known(&descriptor.id).await? {
                debug!(layer = %id.short(), "known locally, stopping");
                break;
            }
            pending.push(descriptor.id);
            current = descriptor.parent;
        }
        Ok(pending)
    }
}

fn missing_as_corrupt(err: SyncError, message: impl FnOnce() -> String) -> SyncError {
    match err {
        SyncError::NotFound(_) => SyncError::Corrupt(message()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use bytes::Bytes;

    async fn put(store: &MemoryStore, key: &str, data: &str) {
        store
            .put_single_object(key, Bytes::from(data.to_string()))
            .await
            .unwrap();
    }

    async fn put_layer(store: &MemoryStore, id: &str, parent: &str) {
        let layer = LayerId::from(id);
        put(store, &namespace::layer_key(&layer, "VERSION"), "1.0").await;
        put(
            store,
            &namespace::layer_key(&layer, "json"),
            &format!(r#"{{"id":"{id}","parent":"{parent}"}}"#),
        )
        .await;
        put(store, &namespace::layer_key(&layer, "layer.tar"), "tar").await;
    }

    #[tokio::test]
    async fn ref_lookup_wins() {
        let store = MemoryStore::new();
        put(&store, "refs/myrepo/app/1.0", "abc123").await;
        let resolved = Resolver::new(&store).resolve_image("myrepo/app:1.0").await.unwrap();
        assert_eq!(resolved.id, ImageId::from("abc123"));
        assert_eq!(resolved.resolution, Resolution::Ref);
        assert_eq!(resolved.reference, ImageReference::new("myrepo/app", "1.0"));
    }

    #[tokio::test]
    async fn prefix_search_is_unique_or_fails() {
        let store = MemoryStore::new();
        for id in ["abc1aaa", "abc1bbb", "fff000"] {
            put(&store, &format!("images/{id}/manifest.json"), "[]").await;
            put(&store, &format!("images/{id}/json"), "{}").await;
        }
        let resolver = Resolver::new(&store);

        let err = resolver.resolve_image("sha256:abc1").await.unwrap_err();
        assert!(matches!(err, SyncError::Ambiguous { matches: 2, .. }));
        assert!(err.is_recoverable());

        let err = resolver.resolve_image("sha256:0000").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));

        let resolved = resolver.resolve_image("sha256:fff").await.unwrap();
        assert_eq!(resolved.id, ImageId::from("fff000"));
        assert_eq!(resolved.resolution, Resolution::Prefix);
    }

    #[tokio::test]
    async fn push_side_keeps_manifest_order() {
        let store = MemoryStore::new();
        put_layer(&store, "bbb", "aaa").await;
        let ids: Vec<LayerId> = ["ccc", "bbb", "aaa"].into_iter().map(LayerId::from).collect();

        let missing = Resolver::new(&store).missing_layers(&ids).await.unwrap();
        assert_eq!(missing, vec![LayerId::from("ccc"), LayerId::from("aaa")]);
    }

    #[tokio::test]
    async fn partial_layer_aborts_push_resolution() {
        let store = MemoryStore::new();
        put(&store, "layers/aaa/VERSION", "1.0").await;
        let err = Resolver::new(&store)
            .missing_layers(&[LayerId::from("aaa")])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CorruptLayer { found: 1, .. }));
    }

    #[tokio::test]
    async fn walk_stops_at_known_layer() {
        let store = MemoryStore::new();
        put_layer(&store, "l1", "").await;
        put_layer(&store, "l2", "l1").await;
        put_layer(&store, "l3", "l2").await;
        let resolver = Resolver::new(&store);

        let nothing_known: HashSet<LayerId> = HashSet::new();
        let all = resolver.discover_layers(&LayerId::from("l3"), &nothing_known).await.unwrap();
        assert_eq!(all, vec![LayerId::from("l3"), LayerId::from("l2"), LayerId::from("l1")]);

        let known: HashSet<LayerId> = [LayerId::from("l2")].into_iter().collect();
        let some = resolver.discover_layers(&LayerId::from("l3"), &known).await.unwrap();
        assert_eq!(some, vec![LayerId::from("l3")]);
    }

    #[tokio::test]
    async fn ancestry_cycle_is_fatal() {
        let store = MemoryStore::new();
        put_layer(&store, "x", "y").await;
        put_layer(&store, "y", "x").await;
        let err = Resolver::new(&store)
            .discover_layers(&LayerId::from("x"), &HashSet::<LayerId>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cycle(ref id) if id.as_str() == "x"));
    }

    #[tokio::test]
    async fn missing_descriptor_is_corruption_not_a_query_miss() {
        let store = MemoryStore::new();
        put_layer(&store, "top", "gone").await;
        let err = Resolver::new(&store)
            .discover_layers(&LayerId::from("top"), &HashSet::<LayerId>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Corrupt(_)));
        assert!(!err.is_recoverable());
    }
}
