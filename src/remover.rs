use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use uuid::Uuid;

use crate::config::Config;

/// Foreground extraction seam. The production implementation shells out to
/// an external tool; tests substitute their own.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Strip the background of the image at `input`, returning the
    /// foreground-only PNG bytes.
    async fn remove_background(&self, input: &Path) -> Result<Vec<u8>>;
}

/// Ensure the remover binary is available on PATH by invoking `--version`.
pub async fn ensure_remover_available(command: &str) -> Result<()> {
    let status = Command::new(command)
        .arg("--version")
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(anyhow!("{} not available (exit status {})", command, s)),
        Err(e) => Err(anyhow!("{} not available: {}", command, e)),
    }
}

/// Background removal via the `rembg` CLI. Cutouts land in
/// `{data_dir}/scratch/` with a unique name per invocation.
pub struct RembgRemover {
    command: String,
    model: String,
    scratch_dir: PathBuf,
}

impl RembgRemover {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            command: cfg.remover.command.clone(),
            model: cfg.remover.model.clone(),
            scratch_dir: Path::new(&cfg.app.data_dir).join("scratch"),
        }
    }
}

#[async_trait]
impl BackgroundRemover for RembgRemover {
    async fn remove_background(&self, input: &Path) -> Result<Vec<u8>> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("invalid image file name"))?;

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .with_context(|| {
                format!("failed to create scratch dir: {}", self.scratch_dir.display())
            })?;

        let cutout_path = self
            .scratch_dir
            .join(format!("{}_{}.png", stem, Uuid::new_v4()));

        let status = Command::new(&self.command)
            .arg("i")
            .arg("-m")
            .arg(&self.model)
            .arg(input.as_os_str())
            .arg(cutout_path.as_os_str())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| {
                format!("failed to spawn {} for {}", self.command, input.display())
            })?;

        if !status.success() {
            return Err(anyhow!(
                "{} exited with status {} for {}",
                self.command,
                status,
                input.display()
            ));
        }

        tokio::fs::read(&cutout_path)
            .await
            .with_context(|| format!("failed to read cutout: {}", cutout_path.display()))
    }
}
