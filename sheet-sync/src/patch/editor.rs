//! Editing facade over one open workbook
//!
//! A `SheetEditor` owns the workbook for one open-edit-save cycle and carries
//! the key aliases and header options used by every operation.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use super::batch::{self, BatchOptions, RecordResult, RecordStatus, SheetReport, UpdateRecord};
use super::header::{AliasSet, SearchWindow};
use super::plan::UpdatePlan;
use super::value::FieldInput;
use crate::error::SheetError;
use crate::workbook::{Workbook, column_name};

/// One column of a located header row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderColumn {
    /// Header text as written in the sheet (trimmed)
    pub name: String,
    /// 1-based column index
    pub column: u32,
    /// Column letters, e.g. "C"
    pub letter: String,
}

/// Result of a header query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderDescription {
    pub sheet: String,
    pub header_row: u32,
    pub key_column: u32,
    /// Header columns in column order
    pub columns: Vec<HeaderColumn>,
}

impl HeaderDescription {
    /// Header names in column order
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

pub struct SheetEditor {
    workbook: Workbook,
    key: AliasSet,
    options: BatchOptions,
}

impl SheetEditor {
    pub fn new(workbook: Workbook, key: AliasSet, options: BatchOptions) -> Self {
        Self {
            workbook,
            key,
            options,
        }
    }

    /// Open workbook bytes for editing
    pub fn open(bytes: Vec<u8>, key: AliasSet, options: BatchOptions) -> Result<Self> {
        Ok(Self::new(Workbook::open(bytes)?, key, options))
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn into_workbook(self) -> Workbook {
        self.workbook
    }

    pub fn key_aliases(&self) -> &AliasSet {
        &self.key
    }

    pub fn is_dirty(&self) -> bool {
        self.workbook.is_dirty()
    }

    /// Serialize the workbook with every patch applied so far
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.workbook.to_bytes()
    }

    /// Update one row identified by `key`
    pub fn update_record(
        &mut self,
        sheet: &str,
        key: &str,
        fields: BTreeMap<String, FieldInput>,
    ) -> RecordResult {
        let record = UpdateRecord {
            key: key.to_string(),
            fields,
        };
        self.update_batch(sheet, std::slice::from_ref(&record))
            .pop()
            .unwrap_or_else(|| RecordResult::unmatched(key, RecordStatus::KeyNotFound))
    }

    /// Update several rows of one sheet; one result per record, in order
    pub fn update_batch(&mut self, sheet: &str, records: &[UpdateRecord]) -> Vec<RecordResult> {
        self.update_sheet(sheet, records).records
    }

    /// Like `update_batch`, keeping the sheet-level details
    pub fn update_sheet(&mut self, sheet: &str, records: &[UpdateRecord]) -> SheetReport {
        batch::run(&mut self.workbook, sheet, &self.key, records, &self.options)
    }

    /// Apply every sheet of a plan
    pub fn apply_plan(&mut self, plan: &UpdatePlan) -> Vec<SheetReport> {
        batch::run_plan(&mut self.workbook, &plan.sheets, &self.key, &self.options)
    }

    /// Locate the header row of `sheet` and list its columns. No mutation.
    pub fn describe_headers(&self, sheet: &str, window: SearchWindow) -> Result<HeaderDescription, SheetError> {
        let options = BatchOptions {
            window,
            strict: false,
        };
        let location = batch::resolve_header(&self.workbook, sheet, &self.key, &[], &options)?;
        let grid = self.workbook.sheet(sheet).ok_or_else(|| self.sheet_not_found(sheet))?;

        let columns = location
            .columns
            .names()
            .into_iter()
            .filter_map(|name| location.columns.column(&name))
            .map(|column| HeaderColumn {
                name: grid.text(location.row, column).trim().to_string(),
                column,
                letter: column_name(column),
            })
            .collect();

        Ok(HeaderDescription {
            sheet: sheet.to_string(),
            header_row: location.row,
            key_column: location.key_column,
            columns,
        })
    }

    /// Display text of the top-left `rows` x `cols` block; blank cells are ""
    pub fn preview_rows(&self, sheet: &str, rows: u32, cols: u32) -> Result<Vec<Vec<String>>, SheetError> {
        let grid = self.workbook.sheet(sheet).ok_or_else(|| self.sheet_not_found(sheet))?;
        Ok((1..=rows)
            .map(|row| (1..=cols).map(|col| grid.text(row, col)).collect())
            .collect())
    }

    fn sheet_not_found(&self, sheet: &str) -> SheetError {
        SheetError::SheetNotFound {
            sheet: sheet.to_string(),
            available: self.workbook.sheet_names().iter().map(|s| s.to_string()).collect(),
        }
    }
}
