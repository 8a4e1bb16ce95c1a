//! In-process `RemoteStore`

use crate::error::{Result, SyncError};
use crate::remote::{BlobEntry, ObjectStream, RemoteStore};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    entry: BlobEntry,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    uncommitted: HashMap<String, HashMap<String, Bytes>>,
    block_lists: HashMap<String, Vec<String>>,
    single_puts: usize,
}

/// Keeps everything in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Committed block ids of `key`, if it was written in blocks
    pub fn block_list(&self, key: &str) -> Option<Vec<String>> {
        self.lock().block_lists.get(key).cloned()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).map(|o| o.data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn single_put_count(&self) -> usize {
        self.lock().single_puts
    }

    pub fn uncommitted_blocks(&self, key: &str) -> usize {
        self.lock().uncommitted.get(key).map_or(0, HashMap::len)
    }

    fn store(inner: &mut Inner, key: &str, data: Bytes) {
        let entry = BlobEntry {
            name: key.to_string(),
            last_modified: Some(Utc::now()),
            size: data.len() as u64,
        };
        inner.objects.insert(key.to_string(), StoredObject { data, entry });
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        Ok(self
            .lock()
            .objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, o)| o.entry.clone())
            .collect())
    }

    async fn get_object(&self, key: &str) -> Result<ObjectStream> {
        let data = self
            .get(key)
            .ok_or_else(|| SyncError::NotFound(key.to_string()))?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn put_block(&self, key: &str, block_id: &str, data: Bytes) -> Result<()> {
        self.lock()
            .uncommitted
            .entry(key.to_string())
            .or_default()
            .insert(block_id.to_string(), data);
        Ok(())
    }

    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<()> {
        let mut inner = self.lock();
        let staged = inner.uncommitted.remove(key).unwrap_or_default();
        let mut data = BytesMut::new();
        for id in block_ids {
            let block = staged
                .get(id)
                .ok_or_else(|| SyncError::Corrupt(format!("block {id} of {key} was never staged")))?;
            data.extend_from_slice(block);
        }
        Self::store(&mut inner, key, data.freeze());
        inner.block_lists.insert(key.to_string(), block_ids.to_vec());
        Ok(())
    }

    async fn put_single_object(&self, key: &str, data: Bytes) -> Result<()> {
        let mut inner = self.lock();
        Self::store(&mut inner, key, data);
        inner.block_lists.remove(key);
        inner.single_puts += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::read_object;

    #[tokio::test]
    async fn blocks_are_invisible_until_committed() {
        let store = MemoryStore::new();
        store.put_block("k", "b1", Bytes::from_static(b"hello ")).await.unwrap();
        store.put_block("k", "b2", Bytes::from_static(b"world")).await.unwrap();
        assert!(store.list("k").await.unwrap().is_empty());

        store
            .commit_block_list("k", &["b1".to_string(), "b2".to_string()])
            .await
            .unwrap();
        assert_eq!(read_object(&store, "k").await.unwrap(), "hello world");
        assert_eq!(store.uncommitted_blocks("k"), 0);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(store.get_object("nope").await, Err(SyncError::NotFound(_))));
    }
}
