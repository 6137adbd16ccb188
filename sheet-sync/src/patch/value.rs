//! Field values supplied by callers and their conversion to cell values

use serde::{Deserialize, Serialize};

use crate::workbook::CellValue;

/// A new value for a field, as given by the caller (JSON number or string)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldInput {
    Number(f64),
    Text(String),
}

impl FieldInput {
    /// Decide how this value is stored in a cell
    pub fn to_cell_value(&self) -> CellValue {
        match self {
            FieldInput::Number(n) if n.is_finite() => CellValue::Number(*n),
            FieldInput::Number(n) => CellValue::Text(n.to_string()),
            FieldInput::Text(s) => infer_cell_value(s),
        }
    }
}

impl From<&str> for FieldInput {
    fn from(s: &str) -> Self {
        FieldInput::Text(s.to_string())
    }
}

impl From<String> for FieldInput {
    fn from(s: String) -> Self {
        FieldInput::Text(s)
    }
}

impl From<f64> for FieldInput {
    fn from(n: f64) -> Self {
        FieldInput::Number(n)
    }
}

impl From<i64> for FieldInput {
    fn from(n: i64) -> Self {
        FieldInput::Number(n as f64)
    }
}

impl std::fmt::Display for FieldInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldInput::Number(n) => write!(f, "{}", n),
            FieldInput::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Infer the stored type of raw text.
///
/// Blank text clears the cell, text that parses cleanly as a finite number
/// (surrounding whitespace allowed) is stored as a number, anything else is
/// stored as text unchanged.
pub fn infer_cell_value(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() && looks_numeric(trimmed) => CellValue::Number(n),
        _ => CellValue::Text(raw.to_string()),
    }
}

/// `f64::from_str` also accepts "inf", "NaN" and "infinity"; only digits,
/// sign, decimal point and exponent count as numeric here.
fn looks_numeric(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_text_becomes_number() {
        assert_eq!(infer_cell_value("42"), CellValue::Number(42.0));
        assert_eq!(infer_cell_value(" 9.99 "), CellValue::Number(9.99));
        assert_eq!(infer_cell_value("-1e3"), CellValue::Number(-1000.0));
    }

    #[test]
    fn test_non_numeric_text_stays_text() {
        assert_eq!(
            infer_cell_value("2024-07-01"),
            CellValue::Text("2024-07-01".into())
        );
        assert_eq!(infer_cell_value("1,000"), CellValue::Text("1,000".into()));
        assert_eq!(infer_cell_value("NaN"), CellValue::Text("NaN".into()));
        assert_eq!(infer_cell_value("inf"), CellValue::Text("inf".into()));
    }

    #[test]
    fn test_blank_text_clears() {
        assert_eq!(infer_cell_value(""), CellValue::Empty);
        assert_eq!(infer_cell_value("   "), CellValue::Empty);
    }

    #[test]
    fn test_json_inputs() {
        let n: FieldInput = serde_json::from_str("98").unwrap();
        let s: FieldInput = serde_json::from_str("\"98\"").unwrap();
        assert_eq!(n.to_cell_value(), CellValue::Number(98.0));
        assert_eq!(s.to_cell_value(), CellValue::Number(98.0));
        let t: FieldInput = serde_json::from_str("\"2024-07-01\"").unwrap();
        assert_eq!(t.to_cell_value(), CellValue::Text("2024-07-01".into()));
    }
}
