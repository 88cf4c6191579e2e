//! On-disk persistence of the sandbox cloud.
//!
//! The CLI runs every command against a [`MemoryCloud`] whose state is
//! loaded from and saved back to a JSON file, so resources created by one
//! command are visible to the next.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Result, SandboxError};

use super::sandbox::{MemoryCloud, SandboxSettings, SandboxState};

/// Default sandbox directory name.
const SANDBOX_DIR: &str = ".ecsdeploy";

/// Sandbox state file name.
const SANDBOX_FILE: &str = "sandbox.json";

/// JSON file holding the sandbox state.
#[derive(Debug, Clone)]
pub struct SandboxStore {
    /// Path to the state file.
    path: PathBuf,
}

impl SandboxStore {
    /// Creates a store in `.ecsdeploy/` under the given directory.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SANDBOX_DIR).join(SANDBOX_FILE),
        }
    }

    /// Creates a store at an explicit file path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the sandbox, starting empty when no state file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self, settings: SandboxSettings) -> Result<MemoryCloud> {
        if !self.path.exists() {
            debug!("No sandbox state at {}, starting empty", self.path.display());
            return Ok(MemoryCloud::new().with_settings(settings));
        }

        info!("Loading sandbox state from: {}", self.path.display());

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| SandboxError::Corrupted {
                message: format!("Failed to read {}: {e}", self.path.display()),
            })?;

        let state: SandboxState =
            serde_json::from_str(&content).map_err(|e| SandboxError::Corrupted {
                message: format!("Failed to parse {}: {e}", self.path.display()),
            })?;

        Ok(MemoryCloud::from_state(state).with_settings(settings))
    }

    /// Saves the sandbox state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized or written.
    pub async fn save(&self, cloud: &MemoryCloud) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).await.map_err(|e| write_failed("create directory", &e))?;
            }
        }

        let content = serde_json::to_string_pretty(&cloud.snapshot())
            .map_err(|e| write_failed("serialize state", &e))?;

        // Write a temp file and rename it over the state file
        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| write_failed("create temp file", &e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_failed("write temp file", &e))?;
        file.sync_all()
            .await
            .map_err(|e| write_failed("sync temp file", &e))?;

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| write_failed("rename temp file", &e))?;

        debug!("Sandbox state saved to {}", self.path.display());
        Ok(())
    }

    /// Deletes the state file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub async fn reset(&self) -> Result<()> {
        if self.path.exists() {
            info!("Deleting sandbox state: {}", self.path.display());
            fs::remove_file(&self.path)
                .await
                .map_err(|e| write_failed("remove state file", &e))?;
        }
        Ok(())
    }
}

fn write_failed(step: &str, err: &dyn std::fmt::Display) -> SandboxError {
    SandboxError::WriteFailed {
        message: format!("Failed to {step}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::RegistryApi;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = SandboxStore::in_dir(temp.path());

        let cloud = store.load(SandboxSettings::default()).await.unwrap();
        cloud.create_repository("ecsdeploy/echo").await.unwrap();
        store.save(&cloud).await.unwrap();

        let reloaded = store.load(SandboxSettings::default()).await.unwrap();
        assert!(reloaded
            .get_repository("ecsdeploy/echo")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_corrupted_state_is_an_error() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = SandboxStore::at(temp.path().join("sandbox.json"));
        tokio::fs::write(store.path(), "{ not json").await.unwrap();

        assert!(store.load(SandboxSettings::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_reset_removes_file() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = SandboxStore::in_dir(temp.path());
        store.save(&MemoryCloud::new()).await.unwrap();
        assert!(store.path().exists());

        store.reset().await.unwrap();
        assert!(!store.path().exists());
    }
}
