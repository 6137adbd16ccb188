//! Directory-backed store
//!
//! File ids are plain file names inside the root directory. Writes go to a
//! temporary file in the same directory and are renamed into place.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use super::store::RemoteStore;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let plain = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\']);
        if !plain {
            bail!("Invalid file id '{}': expected a plain file name", id);
        }
        Ok(self.root.join(id))
    }
}

/// Write `bytes` to `path` atomically (temp file in the same directory, then rename)
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(bytes)
        .context("Failed to write temporary file")?;
    file.as_file()
        .sync_all()
        .context("Failed to flush temporary file")?;
    file.persist(path)
        .with_context(|| format!("Failed to move file into place at {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl RemoteStore for LocalStore {
    fn describe(&self) -> String {
        format!("local directory {}", self.root.display())
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(id)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        log::info!("Read {} bytes from {}", bytes.len(), path.display());
        Ok(bytes)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(name.to_string())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to inspect {}", path.display())),
        }
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str, existing_id: Option<&str>) -> Result<String> {
        let id = existing_id.unwrap_or(name).to_string();
        let path = self.path_for(&id)?;
        let size = bytes.len();

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .context("Write task panicked")??;

        log::info!("Wrote {} bytes to {}", size, path.display());
        Ok(id)
    }
}
