//! Streaming export filter
//!
//! The engine writes its export into one end of a bounded in-memory pipe
//! while a blocking task walks the tar entries on the other end. Only the
//! entries of missing layers reach the disk; everything else is drained.

use crate::engine::ContainerEngine;
use crate::error::{Result, SyncError};
use crate::image::{LayerId, Manifest, Repositories, MANIFEST_FILE, REPOSITORIES_FILE};
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, warn};

/// What the filter materialized from one export
#[derive(Debug, Default, Clone)]
pub struct FilterReport {
    /// Missing layers that had at least one entry in the stream
    pub staged_layers: BTreeSet<LayerId>,
    pub files_written: usize,
    pub bytes_written: u64,
    pub entries_discarded: usize,
    /// Path of the rewritten `repositories` document, when the export carried one
    pub repositories: Option<PathBuf>,
}

/// Exports `image` from the engine and materializes only the `missing` layers under `dest`.
pub async fn stage_missing_layers(
    engine: &dyn ContainerEngine,
    image: &str,
    dest: &Path,
    missing: &HashSet<LayerId>,
    pipe_capacity: usize,
) -> Result<FilterReport> {
    let dest = dest.to_path_buf();
    let missing = missing.clone();
    let report = pipe_export(engine, image, pipe_capacity, move |reader| {
        filter_entries(reader, &dest, &missing)
    })
    .await?;

    debug!(
        image,
        layers = report.staged_layers.len(),
        files = report.files_written,
        bytes = report.bytes_written,
        discarded = report.entries_discarded,
        "export filtered"
    );
    Ok(report)
}

/// Runs an engine export into a bounded pipe and hands the read end to
/// `consume` on a blocking thread. Both ends are closed when either side
/// finishes or fails.
pub async fn pipe_export<T, F>(
    engine: &dyn ContainerEngine,
    image: &str,
    pipe_capacity: usize,
    consume: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(SyncIoBridge<DuplexStream>) -> Result<T> + Send + 'static,
{
    let (mut writer, reader) = tokio::io::duplex(pipe_capacity.max(1));
    let (done_tx, done_rx) = oneshot::channel();
    let bridge = SyncIoBridge::new(reader);

    let consumer = tokio::task::spawn_blocking(move || {
        // The bridge is dropped with this closure, which unblocks a writer stuck on a full pipe.
        let result = consume(bridge);
        let _ = done_tx.send(result);
    });

    let producer = async move {
        let exported = engine.export_image(image, &mut writer).await;
        let closed = writer.shutdown().await;
        drop(writer);
        exported?;
        closed.map_err(|e| SyncError::local_io("closing export pipe", e))
    };

    let (produced, joined) = tokio::join!(producer, consumer);
    joined?;
    let consumed = done_rx.await.map_err(|_| {
        SyncError::LocalIo(io::Error::other("export consumer stopped without a result"))
    })?;

    match (produced, consumed) {
        (Ok(()), Ok(value)) => Ok(value),
        // A consumer failure closes the pipe, so the producer only sees a broken pipe.
        (Err(producer_err), Err(consumer_err)) if is_broken_pipe(&producer_err) => Err(consumer_err),
        (Err(producer_err), _) => Err(producer_err),
        (Ok(()), Err(consumer_err)) => Err(consumer_err),
    }
}

fn is_broken_pipe(err: &SyncError) -> bool {
    matches!(err, SyncError::LocalIo(io) if io.kind() == io::ErrorKind::BrokenPipe)
}

/// Walks a `save`-format tar and writes the selected entries under `dest`.
///
/// Layer entries (`{id}/…`) are written only when `id` is missing. Other
/// top-level regular files are always written. The top-level `repositories`
/// document is captured and written once, pointed at the image id from the
/// staged manifest.
pub fn filter_entries<R: Read>(
    reader: R,
    dest: &Path,
    missing: &HashSet<LayerId>,
) -> Result<FilterReport> {
    fs::create_dir_all(dest).map_err(|e| SyncError::local_io(dest.display(), e))?;

    let mut report = FilterReport::default();
    let mut captured: Option<Repositories> = None;
    let mut archive = Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let segments = entry_segments(&entry.path()?)?;

        if segments.is_empty() || !entry.header().entry_type().is_file() {
            if !entry.header().entry_type().is_dir() {
                io::copy(&mut entry, &mut io::sink())?;
            }
            continue;
        }

        if segments.len() == 1 {
            if segments[0] == REPOSITORIES_FILE {
                let mut raw = Vec::new();
                entry.read_to_end(&mut raw)?;
                captured = Some(Repositories::from_slice(&raw)?);
                continue;
            }
            report.bytes_written += write_entry(&mut entry, &dest.join(&segments[0]))?;
            report.files_written += 1;
            continue;
        }

        let layer = LayerId::from(segments[0].as_str());
        if !missing.contains(&layer) {
            io::copy(&mut entry, &mut io::sink())?;
            report.entries_discarded += 1;
            continue;
        }

        let target = segments.iter().fold(dest.to_path_buf(), |p, s| p.join(s));
        report.bytes_written += write_entry(&mut entry, &target)?;
        report.files_written += 1;
        report.staged_layers.insert(layer);
    }

    // Trailing padding after the end-of-archive marker still has to leave the pipe.
    io::copy(&mut archive.into_inner(), &mut io::sink())?;

    if let Some(repositories) = captured {
        let manifest_path = dest.join(MANIFEST_FILE);
        let document = if manifest_path.exists() {
            repositories.retarget(&Manifest::open(dest)?.image_id())
        } else {
            warn!("export has no manifest; keeping repositories document as exported");
            repositories
        };
        report.repositories = Some(document.write_to(dest)?);
    }

    Ok(report)
}

/// Normal path segments of an entry name. Absolute paths and `..` are rejected.
fn entry_segments(path: &Path) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(s) => segments.push(s.to_string_lossy().into_owned()),
            _ => {
                return Err(SyncError::Corrupt(format!(
                    "unsafe entry path in export: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(segments)
}

fn write_entry<R: Read>(entry: &mut R, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::local_io(parent.display(), e))?;
    }
    let mut file = File::create(target).map_err(|e| SyncError::local_io(target.display(), e))?;
    io::copy(entry, &mut file).map_err(|e| SyncError::local_io(target.display(), e))
}
