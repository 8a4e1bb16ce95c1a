//! Docker image metadata and the `docker save` archive layout
//!
//! A saved image is a tar stream holding one directory per layer
//! (`VERSION`, `json`, `layer.tar`), the image config, a `manifest.json`
//! naming the config and layers, and an optional `repositories` document.
//! [`export`] stages the parts of such a stream that the remote lacks and
//! [`archive`] packs a staged directory back into a stream for import.

pub mod archive;
pub mod export;
pub mod id;
pub mod manifest;
pub mod reference;
pub mod repositories;

pub use id::{ImageId, LayerDescriptor, LayerId};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use reference::ImageReference;
pub use repositories::{Repositories, REPOSITORIES_FILE};
