//! Key layout of the remote store
//!
//! ```text
//! layers/{layerId}/VERSION | json | layer.tar
//! images/{imageId}/manifest.json | repositories | json
//! refs/{repository}/{tag}            (content: image id)
//! ```

use crate::image::{ImageId, ImageReference, LayerId};

pub const LAYERS: &str = "layers";
pub const IMAGES: &str = "images";
pub const REFS: &str = "refs";

pub const LAYER_VERSION: &str = "VERSION";
pub const LAYER_JSON: &str = "json";
pub const LAYER_TAR: &str = "layer.tar";

/// The three objects making up one complete layer
pub const LAYER_PARTS: [&str; 3] = [LAYER_VERSION, LAYER_JSON, LAYER_TAR];

pub const IMAGE_MANIFEST: &str = "manifest.json";
pub const IMAGE_REPOSITORIES: &str = "repositories";
pub const IMAGE_CONFIG: &str = "json";

pub fn layer_prefix(id: &LayerId) -> String {
    format!("{LAYERS}/{id}/")
}

pub fn layer_key(id: &LayerId, part: &str) -> String {
    format!("{LAYERS}/{id}/{part}")
}

pub fn image_key(id: &ImageId, part: &str) -> String {
    format!("{IMAGES}/{id}/{part}")
}

/// Prefix matching every image whose id starts with `partial`
pub fn image_search_prefix(partial: &str) -> String {
    format!("{IMAGES}/{partial}")
}

pub fn refs_prefix() -> String {
    format!("{REFS}/")
}

pub fn ref_key(reference: &ImageReference) -> String {
    format!("{REFS}/{}/{}", reference.repository, reference.tag)
}

/// `refs/{repository}/{tag}` back into its parts. The repository may itself contain `/`.
pub fn parse_ref_key(key: &str) -> Option<ImageReference> {
    let rest = key.strip_prefix(REFS)?.strip_prefix('/')?;
    let (repository, tag) = rest.rsplit_once('/')?;
    if repository.is_empty() || tag.is_empty() {
        return None;
    }
    Some(ImageReference::new(repository, tag))
}

/// Image id owning a key under `images/`
pub fn image_id_from_key(key: &str) -> Option<ImageId> {
    let rest = key.strip_prefix(IMAGES)?.strip_prefix('/')?;
    let (id, _) = rest.split_once('/')?;
    (!id.is_empty()).then(|| ImageId::from(id))
}

/// Last path segment of a key
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_keys_split_on_last_segment() {
        let r = parse_ref_key("refs/myrepo/app/1.0").unwrap();
        assert_eq!(r.repository, "myrepo/app");
        assert_eq!(r.tag, "1.0");
        assert_eq!(ref_key(&r), "refs/myrepo/app/1.0");

        assert!(parse_ref_key("refs/lonely").is_none());
        assert!(parse_ref_key("refs/app/").is_none());
        assert!(parse_ref_key("layers/abc/json").is_none());
    }

    #[test]
    fn image_keys_yield_their_id() {
        assert_eq!(
            image_id_from_key("images/abc123/manifest.json"),
            Some(ImageId::from("abc123"))
        );
        assert_eq!(image_id_from_key("images/abc123"), None);
        assert_eq!(file_name("layers/abc/layer.tar"), "layer.tar");
    }
}
