//! Error types
//!
//! Per-record and per-field conditions (key not found, unknown field) are not
//! errors: they are reported in results. The types here cover the conditions
//! that abort a sheet (`SheetError`) or a whole sync run (`SyncError`).

use serde::Serialize;

/// A condition that fails every record of one sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SheetError {
    /// The workbook has no sheet with this name
    SheetNotFound {
        sheet: String,
        available: Vec<String>,
    },
    /// No row within the search window holds every required column name
    HeaderNotFound {
        sheet: String,
        required: Vec<String>,
        max_rows: u32,
        max_cols: u32,
    },
}

impl SheetError {
    pub fn sheet(&self) -> &str {
        match self {
            SheetError::SheetNotFound { sheet, .. } => sheet,
            SheetError::HeaderNotFound { sheet, .. } => sheet,
        }
    }
}

impl std::fmt::Display for SheetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetError::SheetNotFound { sheet, available } => write!(
                f,
                "Sheet '{}' not found (available: {})",
                sheet,
                available.join(", ")
            ),
            SheetError::HeaderNotFound {
                sheet,
                required,
                max_rows,
                max_cols,
            } => write!(
                f,
                "Sheet '{}': no header row in the first {} rows x {} columns contains [{}]",
                sheet,
                max_rows,
                max_cols,
                required.join(", ")
            ),
        }
    }
}

impl std::error::Error for SheetError {}

/// Boundary operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Download,
    FindByName,
    Upload,
    SaveLocal,
}

impl std::fmt::Display for TransferOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferOp::Download => write!(f, "download"),
            TransferOp::FindByName => write!(f, "find-by-name"),
            TransferOp::Upload => write!(f, "upload"),
            TransferOp::SaveLocal => write!(f, "save local copy"),
        }
    }
}

/// A condition that aborts a whole sync run
#[derive(Debug)]
pub enum SyncError {
    /// Remote fetch/publish (or the local working copy) failed
    Transfer {
        op: TransferOp,
        source: anyhow::Error,
    },
    /// Fetched bytes are not a readable workbook, or it could not be serialized
    Codec(anyhow::Error),
}

impl SyncError {
    pub fn transfer(op: TransferOp, source: anyhow::Error) -> Self {
        SyncError::Transfer { op, source }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Transfer { op, source } => write!(f, "Transfer failed ({}): {:#}", op, source),
            SyncError::Codec(source) => write!(f, "Workbook codec failed: {:#}", source),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Transfer { source, .. } | SyncError::Codec(source) => Some(source.as_ref()),
        }
    }
}
