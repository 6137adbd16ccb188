//! Fetch, edit, publish
//!
//! One run owns its workbook from download to upload. Nothing is published
//! unless the fetch, the edit and the serialization all succeeded.

use std::path::PathBuf;

use serde::Serialize;

use super::local::write_atomic;
use super::retry::{RetryConfig, RetryPolicy};
use super::store::RemoteStore;
use crate::error::{SyncError, TransferOp};
use crate::workbook::Workbook;

/// Which remote file a run works on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncTarget {
    /// Remote id to download; looked up by `remote_name` when absent
    pub file_id: Option<String>,
    /// Name used to find the file to update, or to create it
    pub remote_name: String,
    /// Working copy written before publishing
    pub local_copy: Option<PathBuf>,
}

/// What a run did at the boundary, plus the edit's own outcome
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport<T> {
    pub source_id: String,
    pub downloaded_bytes: usize,
    /// Whether the edit changed any cell
    pub changed: bool,
    pub dry_run: bool,
    pub local_copy: Option<PathBuf>,
    /// Id of the published file, None when nothing was published
    pub published_id: Option<String>,
    /// Whether publishing created a new remote file
    pub created: bool,
    pub outcome: T,
}

pub struct SyncOrchestrator<S: RemoteStore> {
    store: S,
    retry: RetryPolicy,
}

impl<S: RemoteStore> SyncOrchestrator<S> {
    pub fn new(store: S, retry: RetryConfig) -> Self {
        Self {
            store,
            retry: RetryPolicy::new(retry),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Download the target and open it
    pub async fn fetch(&self, target: &SyncTarget) -> Result<(String, Workbook, usize), SyncError> {
        let source_id = match &target.file_id {
            Some(id) => id.clone(),
            None => self
                .find(&target.remote_name)
                .await?
                .ok_or_else(|| {
                    SyncError::transfer(
                        TransferOp::FindByName,
                        anyhow::anyhow!(
                            "No file named '{}' in {}",
                            target.remote_name,
                            self.store.describe()
                        ),
                    )
                })?,
        };

        let bytes = self
            .retry
            .execute("download", || self.store.download(&source_id))
            .await
            .map_err(|e| SyncError::transfer(TransferOp::Download, e))?;
        let size = bytes.len();
        let workbook = Workbook::open(bytes).map_err(SyncError::Codec)?;
        Ok((source_id, workbook, size))
    }

    /// Run one open-edit-save cycle.
    ///
    /// `edit` receives the freshly opened workbook. When it changes nothing,
    /// or in a dry run, nothing is written anywhere.
    pub async fn run<T, F>(&self, target: &SyncTarget, dry_run: bool, edit: F) -> Result<SyncReport<T>, SyncError>
    where
        F: FnOnce(&mut Workbook) -> T,
    {
        let (source_id, mut workbook, downloaded_bytes) = self.fetch(target).await?;

        let outcome = edit(&mut workbook);
        let changed = workbook.is_dirty();

        let mut report = SyncReport {
            source_id,
            downloaded_bytes,
            changed,
            dry_run,
            local_copy: None,
            published_id: None,
            created: false,
            outcome,
        };

        if !changed {
            log::info!("No cells changed; nothing to publish");
            return Ok(report);
        }
        let bytes = workbook.to_bytes().map_err(SyncError::Codec)?;
        drop(workbook);

        if dry_run {
            log::info!("Dry run: {} bytes not published", bytes.len());
            return Ok(report);
        }

        if let Some(path) = &target.local_copy {
            write_atomic(path, &bytes).map_err(|e| SyncError::transfer(TransferOp::SaveLocal, e))?;
            log::info!("Saved working copy to {}", path.display());
            report.local_copy = Some(path.clone());
        }

        let existing = self.find(&target.remote_name).await?;
        report.created = existing.is_none();
        let published = self
            .retry
            .execute("upload", || {
                self.store
                    .upload(bytes.clone(), &target.remote_name, existing.as_deref())
            })
            .await
            .map_err(|e| SyncError::transfer(TransferOp::Upload, e))?;

        log::info!(
            "{} '{}' in {} ({})",
            if report.created { "Created" } else { "Updated" },
            target.remote_name,
            self.store.describe(),
            published
        );
        report.published_id = Some(published);
        Ok(report)
    }

    async fn find(&self, name: &str) -> Result<Option<String>, SyncError> {
        self.retry
            .execute("find-by-name", || self.store.find_by_name(name))
            .await
            .map_err(|e| SyncError::transfer(TransferOp::FindByName, e))
    }
}
