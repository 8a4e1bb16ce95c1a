//! Standardized mapping of remote storage failures onto `SyncError`

use crate::error::SyncError;
use reqwest::StatusCode;

/// Maps HTTP responses from the blob service to errors
pub struct StorageErrorHandler;

impl StorageErrorHandler {
    pub fn handle_status(status: StatusCode, error_text: &str, context: &str) -> SyncError {
        let code = extract_error_code(error_text);
        match status.as_u16() {
            404 if code == Some("ContainerNotFound") => SyncError::Config(format!(
                "container not found during {}; check the container name",
                context
            )),
            404 => SyncError::NotFound(context.to_string()),
            413 => SyncError::TooLarge {
                key: context.to_string(),
                size: 0,
                limit: 0,
            },
            400 => SyncError::Corrupt(format!(
                "request rejected during {}: {}",
                context,
                code.unwrap_or(error_text)
            )),
            401 | 403 => SyncError::Config(format!(
                "access denied during {} (check the SAS token): {}",
                context,
                code.unwrap_or(error_text)
            )),
            408 => SyncError::RemoteUnavailable(format!("timeout during {}", context)),
            429 => SyncError::RemoteUnavailable(format!("throttled during {}", context)),
            500..=599 => SyncError::RemoteUnavailable(format!(
                "storage service error during {} (status {}): {}",
                context,
                status,
                code.unwrap_or(error_text)
            )),
            _ => SyncError::RemoteUnavailable(format!(
                "{} failed (status {}): {}",
                context,
                status,
                code.unwrap_or(error_text)
            )),
        }
    }
}

/// Maps transport-level failures
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    pub fn handle_network_error(err: &reqwest::Error, context: &str) -> SyncError {
        let reason = if err.is_timeout() {
            "timed out".to_string()
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        SyncError::RemoteUnavailable(format!("{} {}", context, reason))
    }
}

// Azure error bodies look like <Error><Code>BlobNotFound</Code>...</Error>
fn extract_error_code(body: &str) -> Option<&str> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(&body[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_recoverable() {
        let err = StorageErrorHandler::handle_status(StatusCode::NOT_FOUND, "", "refs/app/1.0");
        assert!(matches!(err, SyncError::NotFound(ref what) if what == "refs/app/1.0"));
    }

    #[test]
    fn server_errors_are_transient() {
        let body = "<?xml version=\"1.0\"?><Error><Code>ServerBusy</Code></Error>";
        let err = StorageErrorHandler::handle_status(StatusCode::SERVICE_UNAVAILABLE, body, "put block");
        assert!(err.is_transient());
        assert!(err.to_string().contains("ServerBusy"));
    }

    #[test]
    fn missing_container_is_a_config_error() {
        let body = "<?xml version=\"1.0\"?><Error><Code>ContainerNotFound</Code></Error>";
        let err = StorageErrorHandler::handle_status(StatusCode::NOT_FOUND, body, "refs/app/1.0");
        assert!(matches!(err, SyncError::Config(ref m) if m.contains("container")));
        assert!(!err.is_recoverable());

        let body = "<?xml version=\"1.0\"?><Error><Code>BlobNotFound</Code></Error>";
        let err = StorageErrorHandler::handle_status(StatusCode::NOT_FOUND, body, "refs/app/1.0");
        assert!(err.is_recoverable());
    }
}
