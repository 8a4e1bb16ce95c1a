//! Chunked transfer of single files to and from the block-blob model
//!
//! A file larger than one block is uploaded as a sequence of uncommitted
//! blocks and published by one block-list commit. Block ids are base64 of
//! fixed-width decimal numbers so that the store's string order of the ids
//! equals their numeric order. Nothing becomes visible before the commit.

use crate::error::{Result, SyncError};
use crate::image::LayerId;
use crate::remote::{self, namespace, BlobEntry, RemoteStore};
use crate::transfer::RetryPolicy;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Largest block the store accepts
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;
/// Size of the store's block-id space; `MAX_BLOCK_ID * MAX_BLOCK_SIZE` is 1 TiB.
pub const MAX_BLOCK_ID: u64 = 262_144;

/// How one file maps onto blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    pub file_size: u64,
    pub block_size: u64,
    pub num_blocks: u64,
    pub id_width: usize,
    pub first_id: u64,
}

impl BlockPlan {
    /// Plans the upload of `file_size` bytes. Fails with `TooLarge` when the
    /// file needs more than `max_blocks` blocks.
    pub fn new(key: &str, file_size: u64, block_size: usize, max_blocks: u64) -> Result<Self> {
        let block_size = block_size.max(1) as u64;
        let num_blocks = file_size.div_ceil(block_size);
        if num_blocks > max_blocks {
            return Err(SyncError::TooLarge {
                key: key.to_string(),
                size: file_size,
                limit: max_blocks.saturating_mul(block_size),
            });
        }

        let id_width = decimal_digits(num_blocks.saturating_mul(10));
        let first_id = 10u64.pow(id_width.saturating_sub(1) as u32);
        Ok(Self {
            file_size,
            block_size,
            num_blocks,
            id_width,
            first_id,
        })
    }

    /// Files that fit one block (empty ones included) skip the block protocol.
    pub fn is_single_shot(&self) -> bool {
        self.file_size <= self.block_size
    }

    /// Encoded id of the block at `index`
    pub fn block_id(&self, index: u64) -> String {
        let raw = format!("{:0width$}", self.first_id + index, width = self.id_width);
        BASE64.encode(raw)
    }

    pub fn block_ids(&self) -> Vec<String> {
        (0..self.num_blocks).map(|i| self.block_id(i)).collect()
    }

    /// Byte length of the block at `index`
    pub fn block_len(&self, index: u64) -> u64 {
        let start = index * self.block_size;
        self.block_size.min(self.file_size.saturating_sub(start))
    }
}

fn decimal_digits(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Totals of one transfer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub files: usize,
    pub bytes: u64,
    pub blocks: u64,
}

impl std::ops::AddAssign for TransferStats {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.bytes += other.bytes;
        self.blocks += other.blocks;
    }
}

/// Uploads and downloads whole files against a `RemoteStore`
#[derive(Clone)]
pub struct ChunkedTransfer {
    store: Arc<dyn RemoteStore>,
    block_size: usize,
    max_blocks: u64,
    retry: RetryPolicy,
}

impl ChunkedTransfer {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            block_size: MAX_BLOCK_SIZE,
            max_blocks: MAX_BLOCK_ID,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.clamp(1, MAX_BLOCK_SIZE);
        self
    }

    pub fn with_max_blocks(mut self, max_blocks: u64) -> Self {
        self.max_blocks = max_blocks.clamp(1, MAX_BLOCK_ID);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Uploads `source` to `key`.
    pub async fn upload_file(&self, source: &Path, key: &str) -> Result<TransferStats> {
        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|e| SyncError::local_io(source.display(), e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| SyncError::local_io(source.display(), e))?
            .len();
        let plan = BlockPlan::new(key, size, self.block_size, self.max_blocks)?;

        if plan.is_single_shot() {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data)
                .await
                .map_err(|e| SyncError::local_io(source.display(), e))?;
            if data.len() as u64 != size {
                return Err(changed_while_reading(source));
            }
            let data = Bytes::from(data);
            self.retry
                .run(key, || self.store.put_single_object(key, data.clone()))
                .await?;
            debug!(key, bytes = size, "uploaded single object");
            return Ok(TransferStats {
                files: 1,
                bytes: size,
                blocks: 0,
            });
        }

        let mut ids = Vec::with_capacity(plan.num_blocks as usize);
        for index in 0..plan.num_blocks {
            let mut buf = vec![0u8; plan.block_len(index) as usize];
            file.read_exact(&mut buf)
                .await
                .map_err(|e| SyncError::local_io(source.display(), e))?;
            let id = plan.block_id(index);
            let block = Bytes::from(buf);
            self.retry
                .run(key, || self.store.put_block(key, &id, block.clone()))
                .await?;
            ids.push(id);
        }

        let mut probe = [0u8; 1];
        let extra = file
            .read(&mut probe)
            .await
            .map_err(|e| SyncError::local_io(source.display(), e))?;
        if extra != 0 {
            return Err(changed_while_reading(source));
        }

        self.retry
            .run(key, || self.store.commit_block_list(key, &ids))
            .await?;
        info!(key, bytes = size, blocks = plan.num_blocks, "committed block list");
        Ok(TransferStats {
            files: 1,
            bytes: size,
            blocks: plan.num_blocks,
        })
    }

    /// Writes a small in-memory object such as a ref pointer.
    pub async fn put_bytes(&self, key: &str, data: Bytes) -> Result<()> {
        self.retry
            .run(key, || self.store.put_single_object(key, data.clone()))
            .await
    }

    /// Fetches one complete layer into `{dest_root}/{id}/`.
    pub async fn download_layer(&self, id: &LayerId, dest_root: &Path) -> Result<TransferStats> {
        let entries = self.store.list(&namespace::layer_prefix(id)).await?;
        if entries.len() != namespace::LAYER_PARTS.len() {
            return Err(SyncError::CorruptLayer {
                id: id.clone(),
                found: entries.len(),
            });
        }
        self.download_entries(&entries, &dest_root.join(id.as_str())).await
    }

    async fn download_entries(&self, entries: &[BlobEntry], dest: &Path) -> Result<TransferStats> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| SyncError::local_io(dest.display(), e))?;

        let mut stats = TransferStats::default();
        for entry in entries {
            let target = dest.join(namespace::file_name(&entry.name));
            let bytes = self
                .retry
                .run(&entry.name, || {
                    remote::download_to_file(self.store.as_ref(), &entry.name, &target)
                })
                .await?;
            stats += TransferStats {
                files: 1,
                bytes,
                blocks: 0,
            };
        }
        Ok(stats)
    }
}

fn changed_while_reading(path: &Path) -> SyncError {
    SyncError::local_io(
        path.display(),
        std::io::Error::other("file changed size while it was being uploaded"),
    )
}
