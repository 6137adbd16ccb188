//! Header discovery
//!
//! Headers are not at a fixed position: the locator scans a bounded window
//! (rows × columns from the top-left) for the first row containing every
//! required column name, then maps every header cell of that row.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::workbook::Sheet;

/// Normalize a header name or key value: trim, uppercase
pub fn normalize(text: &str) -> String {
    text.trim().to_uppercase()
}

/// Region scanned for the header row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    pub max_rows: u32,
    pub max_cols: u32,
}

impl Default for SearchWindow {
    fn default() -> Self {
        Self {
            max_rows: 10,
            max_cols: 50,
        }
    }
}

/// Accepted spellings of one logical column (e.g., "ASIN" or "ASINS").
/// Names are stored normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasSet {
    names: Vec<String>,
}

impl AliasSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for name in names {
            let n = normalize(name.as_ref());
            if !n.is_empty() && !normalized.contains(&n) {
                normalized.push(n);
            }
        }
        Self { names: normalized }
    }

    /// A requirement satisfied by a single name
    pub fn single(name: &str) -> Self {
        Self::new([name])
    }

    /// Check a normalized header against the aliases
    pub fn matches(&self, normalized: &str) -> bool {
        self.names.iter().any(|n| n == normalized)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl std::fmt::Display for AliasSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.names.join("|"))
    }
}

/// Normalized header name -> 1-based column index.
/// When two header cells normalize to the same name, the rightmost one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    columns: HashMap<String, u32>,
}

impl HeaderMap {
    /// Record a header cell; later calls for the same name replace earlier ones
    pub fn insert(&mut self, name: &str, col: u32) {
        let key = normalize(name);
        if key.is_empty() {
            return;
        }
        if let Some(previous) = self.columns.insert(key.clone(), col) {
            if previous != col {
                log::debug!(
                    "Duplicate header '{}' in columns {} and {}; using {}",
                    key,
                    previous,
                    col,
                    col
                );
            }
        }
    }

    /// Column for a field name (normalized before lookup)
    pub fn column(&self, name: &str) -> Option<u32> {
        self.columns.get(&normalize(name)).copied()
    }

    /// Header names ordered by column
    pub fn names(&self) -> Vec<String> {
        let mut entries: Vec<(&String, &u32)> = self.columns.iter().collect();
        entries.sort_by_key(|(_, col)| **col);
        entries.into_iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Outcome of a successful header search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLocation {
    /// 1-based header row
    pub row: u32,
    /// Column of the leftmost cell satisfying the first requirement (the key)
    pub key_column: u32,
    /// Every header cell of the row
    pub columns: HeaderMap,
}

/// Find the first row within `window` that satisfies every requirement.
///
/// The first entry of `required` is treated as the key column. Returns None
/// when no row qualifies or `required` is empty.
pub fn locate(sheet: &Sheet, required: &[AliasSet], window: SearchWindow) -> Option<HeaderLocation> {
    if required.is_empty() {
        return None;
    }

    for row in 1..=window.max_rows {
        let mut satisfied: Vec<Option<u32>> = vec![None; required.len()];

        for col in 1..=window.max_cols {
            let text = normalize(&sheet.text(row, col));
            if text.is_empty() {
                continue;
            }
            for (i, requirement) in required.iter().enumerate() {
                if satisfied[i].is_none() && requirement.matches(&text) {
                    satisfied[i] = Some(col);
                }
            }
        }

        if satisfied.iter().all(Option::is_some) {
            let key_column = satisfied[0]?;
            let columns = map_row(sheet, row, window.max_cols);
            log::debug!(
                "Sheet '{}': header row {} ({} columns), key column {}",
                sheet.name(),
                row,
                columns.len(),
                key_column
            );
            return Some(HeaderLocation {
                row,
                key_column,
                columns,
            });
        }
    }

    log::debug!(
        "Sheet '{}': no header row within {}x{} containing [{}]",
        sheet.name(),
        window.max_rows,
        window.max_cols,
        required
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    None
}

/// Map every non-empty header cell of `row`, scanning the full window width
fn map_row(sheet: &Sheet, row: u32, max_cols: u32) -> HeaderMap {
    let mut map = HeaderMap::default();
    for col in 1..=max_cols {
        let text = sheet.text(row, col);
        if !text.trim().is_empty() {
            map.insert(&text, col);
        }
    }
    map
}
