//! The `repositories` document: `{repository: {tag: imageId}}`

use crate::error::{Result, SyncError};
use crate::image::{ImageId, ImageReference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const REPOSITORIES_FILE: &str = "repositories";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Repositories(BTreeMap<String, BTreeMap<String, String>>);

impl Repositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn insert(&mut self, reference: &ImageReference, id: &ImageId) {
        self.0
            .entry(reference.repository.clone())
            .or_default()
            .insert(reference.tag.clone(), id.to_string());
    }

    pub fn get(&self, repository: &str, tag: &str) -> Option<&str> {
        self.0.get(repository)?.get(tag).map(String::as_str)
    }

    /// Every repository/tag pair in the document
    pub fn references(&self) -> Vec<ImageReference> {
        self.0
            .iter()
            .flat_map(|(repo, tags)| tags.keys().map(move |tag| ImageReference::new(repo, tag)))
            .collect()
    }

    /// Points every tag in the document at `id`, keeping the set of names.
    pub fn retarget(&self, id: &ImageId) -> Self {
        let mut out = Self::new();
        for reference in self.references() {
            out.insert(&reference, id);
        }
        out
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(REPOSITORIES_FILE);
        let data = serde_json::to_vec(self)?;
        std::fs::write(&path, data).map_err(|e| SyncError::local_io(path.display(), e))?;
        Ok(path)
    }
}
