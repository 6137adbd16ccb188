//! Relative A1 references inside formula text
//!
//! Shared formulas store their text once, relative to the master cell. When a
//! follower has to carry its own copy, the unanchored parts of each reference
//! are moved by the follower's offset from the master.

use once_cell::sync::Lazy;
use regex::Regex;

use super::cell::{MAX_COLUMN, column_index, column_name};

/// Largest row index addressable in an xlsx worksheet
pub const MAX_ROW: u32 = 1_048_576;

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$?[A-Za-z]{1,3}\$?[0-9]+(?::\$?[A-Za-z]{1,3}\$?[0-9]+)?|\$?[A-Za-z]{1,3}:\$?[A-Za-z]{1,3}|\$?[0-9]+:\$?[0-9]+")
        .expect("valid reference regex")
});
static CELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\$?)([A-Za-z]{1,3})(\$?)([0-9]+)$").expect("valid cell regex")
});
static COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\$?)([A-Za-z]{1,3})$").expect("valid column regex"));
static ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\$?)([0-9]+)$").expect("valid row regex"));

/// Move every relative reference in `formula` by `rows` and `cols`.
///
/// String literals and quoted sheet names are left alone. A reference pushed
/// off the grid becomes `#REF!`, as Excel does when copying a formula.
pub fn shift_references(formula: &str, rows: i64, cols: i64) -> String {
    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len());
    let mut segment_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let quote = bytes[i];
        if quote != b'"' && quote != b'\'' {
            i += 1;
            continue;
        }
        out.push_str(&shift_segment(&formula[segment_start..i], rows, cols));

        // A doubled quote is an escaped quote, not the end
        let mut end = i + 1;
        while end < bytes.len() {
            if bytes[end] == quote {
                if bytes.get(end + 1) == Some(&quote) {
                    end += 2;
                    continue;
                }
                end += 1;
                break;
            }
            end += 1;
        }
        let end = end.min(bytes.len());
        out.push_str(&formula[i..end]);
        i = end;
        segment_start = end;
    }

    out.push_str(&shift_segment(&formula[segment_start..], rows, cols));
    out
}

/// Shift references in unquoted formula text
fn shift_segment(text: &str, rows: i64, cols: i64) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for m in REFERENCE.find_iter(text) {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        // Part of a longer name, or a function call such as LOG10(
        if before.is_some_and(is_name_char) || after.is_some_and(|c| is_name_char(c) || c == '(') {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        out.push_str(&shift_token(m.as_str(), rows, cols));
        last = m.end();
    }

    out.push_str(&text[last..]);
    out
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn shift_token(token: &str, rows: i64, cols: i64) -> String {
    token
        .split(':')
        .map(|part| shift_part(part, rows, cols))
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join(":"))
        .unwrap_or_else(|| "#REF!".to_string())
}

/// None when the shifted reference falls off the grid
fn shift_part(part: &str, rows: i64, cols: i64) -> Option<String> {
    if let Some(caps) = CELL.captures(part) {
        if column_index(&caps[2]).is_none() {
            // Beyond XFD: a defined name, not a reference
            return Some(part.to_string());
        }
        let col = shift_column(&caps[1], &caps[2], cols)?;
        let row = shift_row(&caps[3], &caps[4], rows)?;
        return Some(format!("{}{}", col, row));
    }
    if let Some(caps) = COLUMN.captures(part) {
        if column_index(&caps[2]).is_none() {
            return Some(part.to_string());
        }
        return shift_column(&caps[1], &caps[2], cols);
    }
    if let Some(caps) = ROW.captures(part) {
        return shift_row(&caps[1], &caps[2], rows);
    }
    Some(part.to_string())
}

fn shift_column(anchor: &str, letters: &str, delta: i64) -> Option<String> {
    if !anchor.is_empty() {
        return Some(format!("{}{}", anchor, letters));
    }
    let moved = i64::from(column_index(letters)?) + delta;
    (1..=i64::from(MAX_COLUMN))
        .contains(&moved)
        .then(|| column_name(moved as u32))
}

fn shift_row(anchor: &str, digits: &str, delta: i64) -> Option<String> {
    if !anchor.is_empty() {
        return Some(format!("{}{}", anchor, digits));
    }
    let moved = digits.parse::<i64>().ok()? + delta;
    (1..=i64::from(MAX_ROW))
        .contains(&moved)
        .then(|| moved.to_string())
}
