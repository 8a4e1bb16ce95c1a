//! `repository[:tag]` parsing for user queries

use std::fmt;

pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Splits a query into repository and tag. A `sha256:` prefix is dropped and
    /// a colon before the last `/` (a registry port) is not a tag separator.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix("sha256:").unwrap_or(query);
        let name_start = query.rfind('/').map(|i| i + 1).unwrap_or(0);
        match query[name_start..].find(':') {
            Some(pos) => {
                let split = name_start + pos;
                let tag = &query[split + 1..];
                let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };
                Self::new(&query[..split], tag)
            }
            None => Self::new(query, DEFAULT_TAG),
        }
    }

    /// Parses a `repository:tag` entry from a manifest's `RepoTags`
    pub fn from_repo_tag(repo_tag: &str) -> Self {
        Self::parse(repo_tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
