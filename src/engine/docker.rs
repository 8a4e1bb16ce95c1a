//! `ContainerEngine` backed by the docker command line

use crate::engine::ContainerEngine;
use crate::error::{Result, SyncError};
use crate::image::{archive, export, ImageId, LayerDescriptor};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::debug;

const HISTORY_PIPE_CAPACITY: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    fn spawn(&self, mut cmd: Command, what: &str) -> Result<Child> {
        cmd.spawn()
            .map_err(|e| SyncError::Engine(format!("failed to run {} {}: {}", self.binary, what, e)))
    }

    async fn finish(&self, mut child: Child, what: &str) -> Result<()> {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr).await?;
        }
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(SyncError::Engine(format!(
                "{} {} exited with {}: {}",
                self.binary,
                what,
                status,
                stderr.trim()
            )))
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn export_image(
        &self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        debug!(image = name, "docker save");
        let mut cmd = self.command(&["save", name]);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = self.spawn(cmd, "save")?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Engine("docker save has no stdout".to_string()))?;
        tokio::io::copy(&mut stdout, sink)
            .await
            .map_err(|e| SyncError::local_io(format!("streaming docker save of {name}"), e))?;
        sink.flush().await?;
        self.finish(child, "save").await
    }

    async fn import_image(&self, source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()> {
        debug!("docker load");
        let mut cmd = self.command(&["load"]);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = self.spawn(cmd, "load")?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::Engine("docker load has no stdin".to_string()))?;
        tokio::io::copy(source, &mut stdin)
            .await
            .map_err(|e| SyncError::local_io("streaming into docker load", e))?;
        stdin.shutdown().await?;
        drop(stdin);
        self.finish(child, "load").await
    }

    async fn image_exists(&self, id: &ImageId) -> Result<bool> {
        let output = self
            .command(&["image", "inspect", "--format", "{{.Id}}", id.as_str()])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SyncError::Engine(format!("failed to run {} image inspect: {}", self.binary, e)))?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such image") || stderr.contains("No such object") {
            Ok(false)
        } else {
            Err(SyncError::Engine(format!("image inspect {} failed: {}", id, stderr.trim())))
        }
    }

    async fn image_history(&self, name: &str) -> Result<Vec<LayerDescriptor>> {
        export::pipe_export(self, name, HISTORY_PIPE_CAPACITY, archive::scan_descriptors).await
    }
}
