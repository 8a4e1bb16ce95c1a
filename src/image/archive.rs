//! Packing staged directories for import and reading ancestry out of an export

use crate::engine::ContainerEngine;
use crate::error::{Result, SyncError};
use crate::image::{LayerDescriptor, LayerId};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tar::{Archive, Builder};
use tokio_util::io::SyncIoBridge;

/// Writes the contents of `dir` as a tar stream, entries relative to `dir`.
pub fn pack_dir<W: Write>(dir: &Path, writer: W) -> Result<W> {
    let mut builder = Builder::new(writer);
    let mut children: Vec<_> = fs::read_dir(dir)
        .map_err(|e| SyncError::local_io(dir.display(), e))?
        .collect::<io::Result<_>>()?;
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let path = child.path();
        let name = child.file_name();
        if child.file_type()?.is_dir() {
            builder.append_dir_all(&name, &path)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }
    Ok(builder.into_inner()?)
}

/// Streams `dir` into the engine's import through a bounded pipe.
pub async fn import_dir(engine: &dyn ContainerEngine, dir: &Path, pipe_capacity: usize) -> Result<()> {
    let (writer, mut reader) = tokio::io::duplex(pipe_capacity.max(1));
    let bridge = SyncIoBridge::new(writer);
    let dir = dir.to_path_buf();

    let packer = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut bridge = pack_dir(&dir, bridge)?;
        bridge.flush()?;
        bridge.shutdown()?;
        Ok(())
    });

    let importing = async move {
        let imported = engine.import_image(&mut reader).await;
        // Unblocks the packer if the engine stopped reading early.
        drop(reader);
        imported
    };

    let (imported, packed) = tokio::join!(importing, packer);
    match (imported, packed?) {
        (Ok(()), packed) => packed,
        (Err(_), Err(pack_err)) if !matches!(&pack_err, SyncError::LocalIo(e) if e.kind() == io::ErrorKind::BrokenPipe) => {
            Err(pack_err)
        }
        (Err(import_err), _) => Err(import_err),
    }
}

/// Collects the `{id}/json` descriptors of an export, ordered top layer first.
pub fn scan_descriptors<R: Read>(reader: R) -> Result<Vec<LayerDescriptor>> {
    let mut archive = Archive::new(reader);
    let mut found = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let segments: Vec<_> = path
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();

        if segments.len() == 2 && segments[1] == "json" && entry.header().entry_type().is_file() {
            let mut raw = Vec::new();
            entry.read_to_end(&mut raw)?;
            let descriptor = LayerDescriptor::from_slice(&raw)?;
            if descriptor.id.as_str() != segments[0] {
                return Err(SyncError::Corrupt(format!(
                    "layer directory {} describes layer {}",
                    segments[0], descriptor.id
                )));
            }
            found.push(descriptor);
        }
    }
    io::copy(&mut archive.into_inner(), &mut io::sink())?;

    Ok(order_top_first(found))
}

/// Orders descriptors along the parent chain starting at the one nobody
/// points to. Descriptors off the chain keep their stream order at the end.
fn order_top_first(descriptors: Vec<LayerDescriptor>) -> Vec<LayerDescriptor> {
    let parents: HashSet<&LayerId> = descriptors.iter().filter_map(|d| d.parent.as_ref()).collect();
    let tops: Vec<&LayerDescriptor> = descriptors.iter().filter(|d| !parents.contains(&d.id)).collect();
    if tops.len() != 1 {
        return descriptors;
    }

    let by_id: HashMap<&LayerId, &LayerDescriptor> = descriptors.iter().map(|d| (&d.id, d)).collect();
    let mut ordered = Vec::with_capacity(descriptors.len());
    let mut visited = HashSet::new();
    let mut current = Some(tops[0]);
    while let Some(descriptor) = current {
        if !visited.insert(&descriptor.id) {
            break;
        }
        ordered.push(descriptor.clone());
        current = descriptor.parent.as_ref().and_then(|p| by_id.get(p).copied());
    }
    for descriptor in &descriptors {
        if !visited.contains(&descriptor.id) {
            ordered.push(descriptor.clone());
        }
    }
    ordered
}
