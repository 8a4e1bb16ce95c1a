//! Remote object store contract and the helpers built on it

pub mod azure;
pub mod local;
pub mod memory;
pub mod namespace;

pub use azure::AzureBlobStore;
pub use local::LocalDirStore;
pub use memory::MemoryStore;

use crate::error::{Result, SyncError};
use crate::image::LayerId;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncWriteExt;

pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Flat key/value blob store with staged block uploads.
///
/// Blocks written with `put_block` stay invisible until `commit_block_list`
/// names them, in order. A missing key reads as `SyncError::NotFound`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All objects whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>>;

    async fn get_object(&self, key: &str) -> Result<ObjectStream>;

    async fn put_block(&self, key: &str, block_id: &str, data: Bytes) -> Result<()>;

    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<()>;

    async fn put_single_object(&self, key: &str, data: Bytes) -> Result<()>;
}

/// Whether a complete copy of `id` exists remotely.
///
/// Zero objects under the layer prefix means absent, exactly the three layer
/// parts means present. Anything else is a corrupt layer.
pub async fn has_layer(store: &dyn RemoteStore, id: &LayerId) -> Result<bool> {
    let found = store.list(&namespace::layer_prefix(id)).await?.len();
    match found {
        0 => Ok(false),
        n if n == namespace::LAYER_PARTS.len() => Ok(true),
        n => Err(SyncError::CorruptLayer { id: id.clone(), found: n }),
    }
}

pub async fn read_object(store: &dyn RemoteStore, key: &str) -> Result<Bytes> {
    let mut stream = store.get_object(key).await?;
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Reads a small text object such as a ref pointer. Content after a NUL is ignored.
pub async fn read_text(store: &dyn RemoteStore, key: &str) -> Result<String> {
    let raw = read_object(store, key).await?;
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|e| SyncError::Corrupt(format!("{key} is not valid UTF-8: {e}")))?;
    Ok(text.trim().to_string())
}

/// Streams an object into `path`, returning the number of bytes written.
pub async fn download_to_file(store: &dyn RemoteStore, key: &str, path: &Path) -> Result<u64> {
    let mut stream = store.get_object(key).await?;
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| SyncError::local_io(path.display(), e))?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::local_io(path.display(), e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| SyncError::local_io(path.display(), e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_parts(id: &LayerId, parts: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for part in parts {
            store
                .put_single_object(&namespace::layer_key(id, part), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn layer_completeness_is_all_or_nothing() {
        let id = LayerId::from("abc");

        let empty = store_with_parts(&id, &[]).await;
        assert!(!has_layer(&empty, &id).await.unwrap());

        let full = store_with_parts(&id, &namespace::LAYER_PARTS).await;
        assert!(has_layer(&full, &id).await.unwrap());

        for parts in [&["VERSION"][..], &["VERSION", "json"][..]] {
            let partial = store_with_parts(&id, parts).await;
            let err = has_layer(&partial, &id).await.unwrap_err();
            assert!(matches!(err, SyncError::CorruptLayer { found, .. } if found == parts.len()));
        }

        let extra = store_with_parts(&id, &["VERSION", "json", "layer.tar", "stray"]).await;
        assert!(matches!(
            has_layer(&extra, &id).await,
            Err(SyncError::CorruptLayer { found: 4, .. })
        ));
    }

    #[tokio::test]
    async fn layer_prefix_does_not_match_longer_ids() {
        let store = store_with_parts(&LayerId::from("abcd"), &namespace::LAYER_PARTS).await;
        assert!(!has_layer(&store, &LayerId::from("abc")).await.unwrap());
    }

    #[tokio::test]
    async fn pointer_text_is_trimmed_at_nul() {
        let store = MemoryStore::new();
        store
            .put_single_object("refs/app/1", Bytes::from_static(b"abc123\n\0\0garbage"))
            .await
            .unwrap();
        assert_eq!(read_text(&store, "refs/app/1").await.unwrap(), "abc123");
    }
}
