//! The `manifest.json` record written by `docker save`

use crate::error::{Result, SyncError};
use crate::image::{ImageId, LayerId};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Describes one exported image
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Manifest {
    pub config: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    pub layers: Vec<String>,
}

impl Manifest {
    /// Loads the manifest from an export directory. The file must hold exactly one record.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let data = std::fs::read(&path).map_err(|e| SyncError::local_io(path.display(), e))?;
        Self::from_slice(&data)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let mut records: Vec<Manifest> = serde_json::from_slice(data)?;
        if records.len() != 1 {
            return Err(SyncError::CorruptManifest {
                records: records.len(),
            });
        }
        Ok(records.remove(0))
    }

    /// The config file name without its extension
    pub fn image_id(&self) -> ImageId {
        let stem = Path::new(&self.config)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.config);
        ImageId::from(stem)
    }

    /// Layer ids in manifest order, taken from the directory of each `…/layer.tar`
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers
            .iter()
            .filter_map(|layer| {
                let parent = Path::new(layer).parent()?;
                let normal: Vec<&str> = parent
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => s.to_str(),
                        _ => None,
                    })
                    .collect();
                if normal.is_empty() {
                    None
                } else {
                    Some(LayerId::from(normal.join("/")))
                }
            })
            .collect()
    }

    /// The last layer in the stack, the one the image sits on
    pub fn top_layer(&self) -> Option<LayerId> {
        self.layer_ids().pop()
    }

    pub fn repo_tags(&self) -> &[String] {
        self.repo_tags.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[{
        "Config": "4f2b0d1c9e.json",
        "RepoTags": ["myrepo/app:1.0", "myrepo/app:latest"],
        "Layers": ["aaa111/layer.tar", "./bbb222/layer.tar", "ccc333/layer.tar"]
    }]"#;

    #[test]
    fn parses_single_record() {
        let m = Manifest::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(m.image_id().as_str(), "4f2b0d1c9e");
        assert_eq!(
            m.layer_ids(),
            vec![
                LayerId::from("aaa111"),
                LayerId::from("bbb222"),
                LayerId::from("ccc333")
            ]
        );
        assert_eq!(m.top_layer(), Some(LayerId::from("ccc333")));
        assert_eq!(m.repo_tags().len(), 2);
    }

    #[test]
    fn rejects_any_other_record_count() {
        let err = Manifest::from_slice(b"[]").unwrap_err();
        assert!(matches!(err, SyncError::CorruptManifest { records: 0 }));

        let two = r#"[{"Config":"a.json","Layers":[]},{"Config":"b.json","Layers":[]}]"#;
        let err = Manifest::from_slice(two.as_bytes()).unwrap_err();
        assert!(matches!(err, SyncError::CorruptManifest { records: 2 }));
    }

    #[test]
    fn null_repo_tags_are_empty() {
        let m = Manifest::from_slice(br#"[{"Config":"a.json","RepoTags":null,"Layers":[]}]"#).unwrap();
        assert!(m.repo_tags().is_empty());
        assert_eq!(m.top_layer(), None);
    }

    #[test]
    fn open_reads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), SAMPLE).unwrap();
        let m = Manifest::open(dir.path()).unwrap();
        assert_eq!(m.layers.len(), 3);
    }
}
