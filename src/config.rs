//! Configuration loading: named environments in a TOML file plus env-var overrides

use crate::error::{Result, SyncError};
use crate::remote::{AzureBlobStore, LocalDirStore, RemoteStore};
use crate::transfer::{dispatcher::DEFAULT_WORKERS, MAX_BLOCK_ID, MAX_BLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const CONFIG_FILE_NAME: &str = ".docker-blob-sync.toml";
pub const DEFAULT_ENVIRONMENT: &str = "default";

const TEMPLATE: &str = r#"# docker-blob-sync configuration
#
# One table per environment; select with `-e NAME` (default: "default").

[default]
backend = "azure"
storage_account_name = "YOUR_STORAGE_ACCOUNT"
container = "YOUR_CONTAINER"
sas_token = "YOUR_SAS_TOKEN"
# endpoint = "http://127.0.0.1:10000/devstoreaccount1"

# [shared-drive]
# backend = "local"
# local_root = "/mnt/images"

# [transfer]
# workers = 25
# block_size = 4194304
# retry_attempts = 3
# retry_base_delay_ms = 200
# docker_binary = "docker"
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Azure,
    Local,
}

/// One named environment: where the remote namespace lives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub storage_account_name: String,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub sas_token: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

/// The optional `[transfer]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub workers: usize,
    pub block_size: usize,
    pub max_blocks: u64,
    pub retry_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub pipe_capacity: usize,
    pub staging_dir: Option<PathBuf>,
    pub docker_binary: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            block_size: MAX_BLOCK_SIZE,
            max_blocks: MAX_BLOCK_ID,
            retry_attempts: 3,
            retry_base_delay_ms: 200,
            pipe_capacity: 1024 * 1024,
            staging_dir: None,
            docker_binary: "docker".to_string(),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SyncError::Config("workers must be greater than 0".to_string()));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(SyncError::Config(format!(
                "block_size must be between 1 and {MAX_BLOCK_SIZE} bytes, got {}",
                self.block_size
            )));
        }
        if self.max_blocks == 0 || self.max_blocks > MAX_BLOCK_ID {
            return Err(SyncError::Config(format!(
                "max_blocks must be between 1 and {MAX_BLOCK_ID}, got {}",
                self.max_blocks
            )));
        }
        if self.retry_attempts == 0 {
            return Err(SyncError::Config("retry_attempts must be at least 1".to_string()));
        }
        if self.pipe_capacity == 0 {
            return Err(SyncError::Config("pipe_capacity must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    transfer: TransferConfig,
    #[serde(flatten)]
    environments: HashMap<String, EnvironmentConfig>,
}

/// Fully resolved configuration for one run
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub remote: EnvironmentConfig,
    pub transfer: TransferConfig,
}

impl Config {
    /// `~/.docker-blob-sync.toml`
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .ok_or_else(|| SyncError::Config("cannot determine home directory".to_string()))
    }

    /// Loads `environment` from the file at `path` (or the default path),
    /// writing a template first when the file does not exist, then applies
    /// `BLOB_SYNC_*` environment variables and validates.
    pub fn load(path: Option<&Path>, environment: &str) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        ensure_config_file(&path)?;
        let text = fs::read_to_string(&path).map_err(|e| SyncError::local_io(path.display(), e))?;

        let mut config = Self::from_toml_str(&text, environment)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str, environment: &str) -> Result<Self> {
        let mut file: ConfigFile = toml::from_str(text)?;
        let remote = file.environments.remove(environment).ok_or_else(|| {
            SyncError::Config(format!(
                "undefined environment '{environment}'; check your configuration"
            ))
        })?;
        Ok(Self {
            environment: environment.to_string(),
            remote,
            transfer: file.transfer,
        })
    }

    /// Applies `BLOB_SYNC_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("BLOB_SYNC_SAS_TOKEN") {
            self.remote.sas_token = token;
        }
        if let Some(account) = lookup("BLOB_SYNC_ACCOUNT") {
            self.remote.storage_account_name = account;
        }
        if let Some(container) = lookup("BLOB_SYNC_CONTAINER") {
            self.remote.container = container;
        }
        if let Some(workers) = lookup("BLOB_SYNC_WORKERS") {
            self.transfer.workers = workers.parse().map_err(|_| {
                SyncError::Config(format!("BLOB_SYNC_WORKERS must be a number, got '{workers}'"))
            })?;
        }
        if let Some(dir) = lookup("BLOB_SYNC_STAGING_DIR") {
            self.transfer.staging_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        match self.remote.backend {
            Backend::Azure => {
                if self.remote.storage_account_name.is_empty() && self.remote.endpoint.is_none() {
                    return Err(SyncError::Config(format!(
                        "environment '{}' needs storage_account_name or endpoint",
                        self.environment
                    )));
                }
                if self.remote.container.is_empty() {
                    return Err(SyncError::Config(format!(
                        "environment '{}' has no container",
                        self.environment
                    )));
                }
            }
            Backend::Local => {
                if self.remote.local_root.is_none() {
                    return Err(SyncError::Config(format!(
                        "environment '{}' uses the local backend but has no local_root",
                        self.environment
                    )));
                }
            }
        }
        self.transfer.validate()
    }

    /// Opens the store this environment points at.
    pub fn remote_store(&self) -> Result<Arc<dyn RemoteStore>> {
        match self.remote.backend {
            Backend::Azure => Ok(Arc::new(AzureBlobStore::new(
                &self.remote.storage_account_name,
                &self.remote.container,
                &self.remote.sas_token,
                self.remote.endpoint.as_deref(),
            )?)),
            Backend::Local => {
                let root = self.remote.local_root.clone().ok_or_else(|| {
                    SyncError::Config(format!("environment '{}' has no local_root", self.environment))
                })?;
                Ok(Arc::new(LocalDirStore::new(root)))
            }
        }
    }

    /// Root under which each operation gets its staging area
    pub fn staging_root(&self) -> PathBuf {
        self.transfer
            .staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("docker-blob-sync"))
    }
}

/// Writes the template to `path` if nothing is there yet. Returns whether it wrote.
pub fn ensure_config_file(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::local_io(parent.display(), e))?;
    }
    fs::write(path, TEMPLATE).map_err(|e| SyncError::local_io(path.display(), e))?;
    info!(path = %path.display(), "wrote new configuration template");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[default]
storage_account_name = "acct"
container = "images"
sas_token = "sv=1&sig=x"

[offline]
backend = "local"
local_root = "/srv/images"

[transfer]
workers = 8
block_size = 1048576
"#;

    #[test]
    fn reads_named_environment_and_transfer_table() {
        let config = Config::from_toml_str(SAMPLE, "default").unwrap();
        assert_eq!(config.remote.backend, Backend::Azure);
        assert_eq!(config.remote.container, "images");
        assert_eq!(config.transfer.workers, 8);
        assert_eq!(config.transfer.block_size, 1024 * 1024);
        assert_eq!(config.transfer.retry_attempts, 3);
        config.validate().unwrap();

        let offline = Config::from_toml_str(SAMPLE, "offline").unwrap();
        assert_eq!(offline.remote.backend, Backend::Local);
        assert_eq!(offline.remote.local_root, Some(PathBuf::from("/srv/images")));
        offline.validate().unwrap();
        offline.remote_store().unwrap();
    }

    #[test]
    fn unknown_environment_is_a_config_error() {
        let err = Config::from_toml_str(SAMPLE, "prod").unwrap_err();
        assert!(matches!(err, SyncError::Config(ref m) if m.contains("prod")));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = Config::from_toml_str(SAMPLE, "default").unwrap();
        let vars: HashMap<&str, &str> = [("BLOB_SYNC_SAS_TOKEN", "sig=new"), ("BLOB_SYNC_WORKERS", "3")]
            .into_iter()
            .collect();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.remote.sas_token, "sig=new");
        assert_eq!(config.transfer.workers, 3);

        let err = config
            .apply_overrides(|name| (name == "BLOB_SYNC_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut config = Config::from_toml_str(SAMPLE, "default").unwrap();
        config.transfer.block_size = MAX_BLOCK_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml_str(SAMPLE, "default").unwrap();
        config.transfer.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml_str(SAMPLE, "default").unwrap();
        config.remote.container.clear();
        assert!(config.validate().is_err());

        let text = "[broken]\nbackend = \"local\"\n";
        assert!(Config::from_toml_str(text, "broken").unwrap().validate().is_err());
    }

    #[test]
    fn missing_file_gets_a_usable_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(ensure_config_file(&path).unwrap());
        assert!(!ensure_config_file(&path).unwrap());

        let config = Config::from_toml_str(&fs::read_to_string(&path).unwrap(), DEFAULT_ENVIRONMENT).unwrap();
        config.validate().unwrap();
        assert_eq!(config.transfer.workers, DEFAULT_WORKERS);
    }
}
