//! Cell values and A1-style cell references

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CELL_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]+)$").expect("valid cell ref regex"));

/// Largest column index addressable in an xlsx worksheet (XFD)
pub const MAX_COLUMN: u32 = 16_384;

/// Value held by a worksheet cell
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    /// No value (the cell may still carry a style)
    #[default]
    Empty,
    /// Numeric value (dates are serial numbers)
    Number(f64),
    /// Text value (shared, inline, formula-string, boolean and error cells)
    Text(String),
}

impl CellValue {
    /// Check if this value is empty
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Try to get as number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Display text used for header and key comparisons.
    ///
    /// Integral numbers render without a fractional part, so a key typed as
    /// `12345` in a numeric cell compares equal to the string `"12345"`.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Empty => write!(f, "(empty)"),
            CellValue::Number(n) => write!(f, "{}", format_number(*n)),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Render a number the way it is stored in `<v>`
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Convert a 1-based column index to its letters (1 -> "A", 27 -> "AA")
pub fn column_name(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert column letters to a 1-based index ("A" -> 1, "aa" -> 27)
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as u32 + 1;
        col = col.checked_mul(26)?.checked_add(digit)?;
    }
    (col <= MAX_COLUMN).then_some(col)
}

/// Format a 1-based (row, col) pair as an A1 reference
pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", column_name(col), row)
}

/// Parse an A1 reference (absolute markers allowed) into 1-based (row, col)
pub fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let caps = CELL_REF.captures(reference.trim())?;
    let col = column_index(caps.get(1)?.as_str())?;
    let row: u32 = caps.get(2)?.as_str().parse().ok()?;
    (row > 0).then_some((row, col))
}

/// Parse a range such as `A1:F20` (or a single cell) into its corners
pub fn parse_range_ref(range: &str) -> Option<((u32, u32), (u32, u32))> {
    match range.split_once(':') {
        Some((start, end)) => Some((parse_cell_ref(start)?, parse_cell_ref(end)?)),
        None => {
            let single = parse_cell_ref(range)?;
            Some((single, single))
        }
    }
}
