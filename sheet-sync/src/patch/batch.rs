//! Batch orchestration over one or more sheets
//!
//! Per sheet: resolve the header once, then for each record find its row and
//! patch it. Records are independent: a missing key or unknown field only
//! affects that record's result. A missing sheet or header fails every record
//! of that sheet and the plan moves on to the next sheet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::header::{AliasSet, HeaderLocation, SearchWindow, locate, normalize};
use super::matcher::{find_row, last_data_row};
use super::patcher::{KeyColumn, PatchOutcome, patch};
use super::value::FieldInput;
use crate::error::SheetError;
use crate::workbook::Workbook;

/// One row update: the key to find and the fields to write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(alias = "asin")]
    pub key: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldInput>,
}

impl UpdateRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldInput>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Records destined for one sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetUpdates {
    pub sheet: String,
    pub records: Vec<UpdateRecord>,
}

/// Options shared by every sheet of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Region scanned for the header row
    pub window: SearchWindow,
    /// Require every updated field name to appear in the header row too
    pub strict: bool,
}

/// Final state of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Row found, every field written
    Patched,
    /// Row found, some fields had no column
    FieldsSkipped,
    /// No data row holds the key
    KeyNotFound,
    /// The sheet does not exist
    SheetNotFound,
    /// The sheet has no qualifying header row
    HeaderNotFound,
}

impl RecordStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RecordStatus::Patched | RecordStatus::FieldsSkipped)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Patched => write!(f, "patched"),
            RecordStatus::FieldsSkipped => write!(f, "patched (fields skipped)"),
            RecordStatus::KeyNotFound => write!(f, "key not found"),
            RecordStatus::SheetNotFound => write!(f, "sheet not found"),
            RecordStatus::HeaderNotFound => write!(f, "header not found"),
        }
    }
}

/// Outcome of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResult {
    pub key: String,
    pub status: RecordStatus,
    pub matched: bool,
    /// Matched data row (1-based)
    pub row: Option<u32>,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

impl RecordResult {
    fn patched(key: &str, row: u32, outcome: PatchOutcome) -> Self {
        let status = if outcome.skipped.is_empty() {
            RecordStatus::Patched
        } else {
            RecordStatus::FieldsSkipped
        };
        Self {
            key: key.to_string(),
            status,
            matched: true,
            row: Some(row),
            applied: outcome.applied,
            skipped: outcome.skipped,
        }
    }

    pub(crate) fn unmatched(key: &str, status: RecordStatus) -> Self {
        Self {
            key: key.to_string(),
            status,
            matched: false,
            row: None,
            applied: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Outcome of all records of one sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetReport {
    pub sheet: String,
    pub header_row: Option<u32>,
    /// Set when the whole sheet failed
    pub error: Option<SheetError>,
    pub records: Vec<RecordResult>,
}

impl SheetReport {
    fn failed(sheet: &str, error: SheetError, records: &[UpdateRecord]) -> Self {
        let status = match error {
            SheetError::SheetNotFound { .. } => RecordStatus::SheetNotFound,
            SheetError::HeaderNotFound { .. } => RecordStatus::HeaderNotFound,
        };
        log::warn!("{}", error);
        Self {
            sheet: sheet.to_string(),
            header_row: None,
            error: Some(error),
            records: records
                .iter()
                .map(|r| RecordResult::unmatched(&r.key, status))
                .collect(),
        }
    }

    /// Number of records whose row was found and patched
    pub fn matched_count(&self) -> usize {
        self.records.iter().filter(|r| r.matched).count()
    }
}

/// Resolve the header of `sheet_name` for the given records.
///
/// In strict mode every field name of every record (other than key aliases)
/// must sit in the same header row as the key.
pub fn resolve_header(
    workbook: &Workbook,
    sheet_name: &str,
    key: &AliasSet,
    records: &[UpdateRecord],
    options: &BatchOptions,
) -> Result<HeaderLocation, SheetError> {
    let Some(sheet) = workbook.sheet(sheet_name) else {
        return Err(SheetError::SheetNotFound {
            sheet: sheet_name.to_string(),
            available: workbook.sheet_names().iter().map(|s| s.to_string()).collect(),
        });
    };

    let required = required_columns(key, records, options.strict);
    locate(sheet, &required, options.window).ok_or_else(|| SheetError::HeaderNotFound {
        sheet: sheet_name.to_string(),
        required: required.iter().map(|r| r.to_string()).collect(),
        max_rows: options.window.max_rows,
        max_cols: options.window.max_cols,
    })
}

fn required_columns(key: &AliasSet, records: &[UpdateRecord], strict: bool) -> Vec<AliasSet> {
    let mut required = vec![key.clone()];
    if strict {
        let mut seen: Vec<String> = Vec::new();
        for name in records.iter().flat_map(|r| r.fields.keys()) {
            let normalized = normalize(name);
            if normalized.is_empty() || key.matches(&normalized) || seen.contains(&normalized) {
                continue;
            }
            seen.push(normalized);
            required.push(AliasSet::single(name));
        }
    }
    required
}

/// Apply `records` to one sheet.
///
/// OPEN -> HEADER_RESOLVED -> (ROW_RESOLVED -> PATCHED | ROW_NOT_FOUND)* -> DONE
pub fn run(
    workbook: &mut Workbook,
    sheet_name: &str,
    key: &AliasSet,
    records: &[UpdateRecord],
    options: &BatchOptions,
) -> SheetReport {
    let location = match resolve_header(workbook, sheet_name, key, records, options) {
        Ok(location) => location,
        Err(error) => return SheetReport::failed(sheet_name, error, records),
    };
    let Some(sheet) = workbook.sheet_mut(sheet_name) else {
        let error = SheetError::SheetNotFound {
            sheet: sheet_name.to_string(),
            available: Vec::new(),
        };
        return SheetReport::failed(sheet_name, error, records);
    };

    let first_data_row = location.row + 1;
    let last_row = last_data_row(sheet);
    log::info!(
        "Sheet '{}': header at row {}, scanning rows {}..={} for {} record(s)",
        sheet_name,
        location.row,
        first_data_row,
        last_row,
        records.len()
    );

    let mut results = Vec::with_capacity(records.len());
    for record in records {
        match find_row(sheet, location.key_column, &record.key, first_data_row, last_row) {
            Some(row) => {
                let outcome = patch(
                    sheet,
                    row,
                    &record.fields,
                    &location.columns,
                    Some(KeyColumn {
                        aliases: key,
                        column: location.key_column,
                    }),
                );
                log::info!(
                    "Sheet '{}': key {} at row {}: applied [{}], skipped [{}]",
                    sheet_name,
                    record.key,
                    row,
                    outcome.applied.join(", "),
                    outcome.skipped.join(", ")
                );
                results.push(RecordResult::patched(&record.key, row, outcome));
            }
            None => {
                log::warn!("Sheet '{}': key {} not found", sheet_name, record.key);
                results.push(RecordResult::unmatched(&record.key, RecordStatus::KeyNotFound));
            }
        }
    }

    SheetReport {
        sheet: sheet_name.to_string(),
        header_row: Some(location.row),
        error: None,
        records: results,
    }
}

/// Apply a multi-sheet plan; sheets are processed in plan order
pub fn run_plan(
    workbook: &mut Workbook,
    plan: &[SheetUpdates],
    key: &AliasSet,
    options: &BatchOptions,
) -> Vec<SheetReport> {
    plan.iter()
        .map(|updates| run(workbook, &updates.sheet, key, &updates.records, options))
        .collect()
}
