//! Error types for layer synchronization

pub mod handlers;

use crate::image::LayerId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// No ref or content hash matched the query
    #[error("not found: {0}")]
    NotFound(String),

    /// A partial hash matched more than one image
    #[error("multiple results found for '{query}' ({matches} matches); try to narrow down your query")]
    Ambiguous { query: String, matches: usize },

    /// A layer prefix holds neither zero nor the expected number of parts
    #[error("corrupt or incomplete layer {id}: found {found} objects, expected 0 or 3")]
    CorruptLayer { id: LayerId, found: usize },

    /// The exported manifest did not hold exactly one image record
    #[error("corrupt manifest: expected exactly one record, found {records}")]
    CorruptManifest { records: usize },

    /// Any other violation of the storage or archive layout
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Layer ancestry revisited an id that was already emitted
    #[error("ancestry cycle detected at layer {0}")]
    Cycle(LayerId),

    #[error("did not commit '{key}' because it is too large ({size} bytes, limit {limit} bytes)")]
    TooLarge { key: String, size: u64, limit: u64 },

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A dispatched transfer failed; `key` identifies the unit
    #[error("transfer of '{key}' failed: {source}")]
    Transfer {
        key: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Query problems that the caller should see verbatim rather than treat as faults.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::NotFound(_) | SyncError::Ambiguous { .. } => true,
            SyncError::Transfer { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Errors worth retrying against the remote.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::RemoteUnavailable(_))
    }

    /// Strips dispatcher wrapping to reach the error that actually happened.
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Transfer { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn local_io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        SyncError::LocalIo(std::io::Error::new(err.kind(), format!("{context}: {err}")))
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::LocalIo(std::io::Error::other(format!("background task failed: {err}")))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors_are_query_problems() {
        assert!(SyncError::NotFound("x".into()).is_recoverable());
        assert!(
            SyncError::Ambiguous {
                query: "ab".into(),
                matches: 2
            }
            .is_recoverable()
        );
        assert!(!SyncError::RemoteUnavailable("down".into()).is_recoverable());
        assert!(
            !SyncError::CorruptLayer {
                id: LayerId::from("abc"),
                found: 2
            }
            .is_recoverable()
        );
    }

    #[test]
    fn transfer_wrapping_keeps_root_cause() {
        let err = SyncError::Transfer {
            key: "layers/abc/layer.tar".into(),
            source: Box::new(SyncError::RemoteUnavailable("503".into())),
        };
        assert!(matches!(err.root(), SyncError::RemoteUnavailable(_)));
        assert!(err.to_string().contains("layers/abc/layer.tar"));
    }
}
