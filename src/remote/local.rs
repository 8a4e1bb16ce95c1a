//! `RemoteStore` mirrored into a local directory
//!
//! Useful for shared network mounts and for exercising the full transfer
//! path without a cloud account. Staged blocks live under a hidden directory
//! and only become visible when a commit renames the assembled file into place.

use crate::error::{Result, SyncError};
use crate::remote::{BlobEntry, ObjectStream, RemoteStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

const UNCOMMITTED_DIR: &str = ".uncommitted";

#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && !key.starts_with(UNCOMMITTED_DIR)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(SyncError::Corrupt(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    fn block_dir(&self, key: &str) -> PathBuf {
        self.root.join(UNCOMMITTED_DIR).join(hex_name(key))
    }

    /// Writes `data` to a temp file next to the staging area and renames it over `target`.
    async fn publish(&self, target: &Path, chunks: Vec<Bytes>) -> Result<()> {
        let tmp_dir = self.root.join(UNCOMMITTED_DIR);
        fs::create_dir_all(&tmp_dir)
            .await
            .map_err(|e| SyncError::local_io(tmp_dir.display(), e))?;
        let tmp = tmp_dir.join(format!("commit-{}", uuid::Uuid::new_v4().simple()));

        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| SyncError::local_io(tmp.display(), e))?;
        for chunk in chunks {
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::local_io(tmp.display(), e))?;
        }
        file.sync_all().await.map_err(|e| SyncError::local_io(tmp.display(), e))?;
        drop(file);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_io(parent.display(), e))?;
        }
        fs::rename(&tmp, target)
            .await
            .map_err(|e| SyncError::local_io(target.display(), e))
    }
}

#[async_trait]
impl RemoteStore for LocalDirStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(SyncError::local_io(dir.display(), e)),
            };
            while let Some(child) = reader.next_entry().await? {
                let name = child.file_name().to_string_lossy().into_owned();
                if key_prefix.is_empty() && name == UNCOMMITTED_DIR {
                    continue;
                }
                let key = format!("{key_prefix}{name}");
                let meta = child.metadata().await?;
                if meta.is_dir() {
                    // Only descend where the prefix can still match.
                    let dir_key = format!("{key}/");
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push((child.path(), dir_key));
                    }
                } else if key.starts_with(prefix) {
                    entries.push(BlobEntry {
                        name: key,
                        last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                        size: meta.len(),
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn get_object(&self, key: &str) -> Result<ObjectStream> {
        let path = self.object_path(key)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(key.to_string()));
            }
            Err(e) => return Err(SyncError::local_io(path.display(), e)),
        };
        Ok(Box::pin(ReaderStream::new(file).map_err(SyncError::from)))
    }

    async fn put_block(&self, key: &str, block_id: &str, data: Bytes) -> Result<()> {
        self.object_path(key)?;
        let dir = self.block_dir(key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SyncError::local_io(dir.display(), e))?;
        let path = dir.join(hex_name(block_id));
        fs::write(&path, &data)
            .await
            .map_err(|e| SyncError::local_io(path.display(), e))
    }

    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<()> {
        let target = self.object_path(key)?;
        let dir = self.block_dir(key);

        let mut chunks = Vec::with_capacity(block_ids.len());
        for id in block_ids {
            let path = dir.join(hex_name(id));
            let data = fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SyncError::Corrupt(format!("block {id} of {key} was never staged"))
                }
                _ => SyncError::local_io(path.display(), e),
            })?;
            chunks.push(Bytes::from(data));
        }

        self.publish(&target, chunks).await?;
        if let Err(e) = fs::remove_dir_all(&dir).await {
            debug!(key, error = %e, "leftover block directory");
        }
        Ok(())
    }

    async fn put_single_object(&self, key: &str, data: Bytes) -> Result<()> {
        let target = self.object_path(key)?;
        self.publish(&target, vec![data]).await
    }
}

fn hex_name(raw: &str) -> String {
    raw.bytes().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::read_object;

    #[tokio::test]
    async fn committed_blocks_are_concatenated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());
        let key = "layers/abc/layer.tar";

        store.put_block(key, "MTE=", Bytes::from_static(b"second")).await.unwrap();
        store.put_block(key, "MTA=", Bytes::from_static(b"first-")).await.unwrap();
        assert!(store.list("layers/").await.unwrap().is_empty());

        store
            .commit_block_list(key, &["MTA=".to_string(), "MTE=".to_string()])
            .await
            .unwrap();
        assert_eq!(read_object(&store, key).await.unwrap(), "first-second");
        assert!(!store.block_dir(key).exists());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_hides_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());
        for key in ["layers/abc/VERSION", "layers/abd/VERSION", "refs/app/1"] {
            store.put_single_object(key, Bytes::from_static(b"1")).await.unwrap();
        }
        store.put_block("images/x/json", "MTA=", Bytes::from_static(b"{}")).await.unwrap();

        let names: Vec<String> = store
            .list("layers/ab")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["layers/abc/VERSION", "layers/abd/VERSION"]);

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|e| e.last_modified.is_some()));
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());
        let err = store
            .put_single_object("../outside", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Corrupt(_)));
        assert!(matches!(
            store.get_object("refs/none/1").await,
            Err(SyncError::NotFound(_))
        ));
    }
}
