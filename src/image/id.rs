//! Content-addressed identifiers for layers and images

use serde::{Deserialize, Serialize};
use std::fmt;

const SHORT_LEN: usize = 12;

/// Hex content hash naming a layer. Equality is exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

/// Images are addressed the same way as their layers.
pub type ImageId = LayerId;

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display form, as printed by `docker images`
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(SHORT_LEN) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LayerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for LayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `{id, parent}` pair recovered from a layer's metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub id: LayerId,
    #[serde(default, deserialize_with = "empty_parent_as_none")]
    pub parent: Option<LayerId>,
}

impl LayerDescriptor {
    pub fn from_slice(data: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

fn empty_parent_as_none<'de, D>(deserializer: D) -> Result<Option<LayerId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|p| !p.is_empty()).map(LayerId))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_truncates_long_ids() {
        let id = LayerId::from("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(LayerId::from("abc").short(), "abc");
    }

    #[test]
    fn descriptor_treats_blank_parent_as_root() {
        let d = LayerDescriptor::from_slice(br#"{"id":"aa","parent":"","created":"x"}"#).unwrap();
        assert_eq!(d.parent, None);

        let d = LayerDescriptor::from_slice(br#"{"id":"bb","parent":"aa"}"#).unwrap();
        assert_eq!(d.parent, Some(LayerId::from("aa")));

        let d = LayerDescriptor::from_slice(br#"{"id":"cc"}"#).unwrap();
        assert_eq!(d.parent, None);
    }
}
