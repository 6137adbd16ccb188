//! Row lookup by key value

use super::header::normalize;
use crate::workbook::Sheet;

/// Find the first row in `start_row..=end_row` whose key cell matches `key`.
///
/// Both sides are trimmed and compared case-insensitively. Duplicate keys
/// resolve to the earliest row. A blank key never matches.
pub fn find_row(sheet: &Sheet, key_column: u32, key: &str, start_row: u32, end_row: u32) -> Option<u32> {
    let wanted = normalize(key);
    if wanted.is_empty() || start_row > end_row {
        return None;
    }

    (start_row..=end_row).find(|&row| {
        let value = sheet.value(row, key_column);
        !value.is_empty() && normalize(&value.display()) == wanted
    })
}

/// Last row to scan below a header: the sheet's used-range bottom
pub fn last_data_row(sheet: &Sheet) -> u32 {
    sheet.used_range().map(|r| r.max_row).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fx, build_workbook, inventory_workbook};
    use crate::workbook::Workbook;

    #[test]
    fn test_finds_key_case_and_space_insensitive() {
        let wb = Workbook::open(inventory_workbook()).unwrap();
        let sheet = wb.sheet("INV").unwrap();
        let end = last_data_row(sheet);
        assert_eq!(end, 7);

        assert_eq!(find_row(sheet, 1, "X1", 3, end), Some(5));
        assert_eq!(find_row(sheet, 1, "  x2 ", 3, end), Some(6));
        assert_eq!(find_row(sheet, 1, "b2", 3, end), Some(4));
    }

    #[test]
    fn test_duplicate_key_resolves_to_earliest_row() {
        let wb = Workbook::open(inventory_workbook()).unwrap();
        let sheet = wb.sheet("INV").unwrap();
        // "X1" at row 5 and "x1 " at row 7
        assert_eq!(find_row(sheet, 1, "x1", 3, 7), Some(5));
        assert_eq!(find_row(sheet, 1, "x1", 6, 7), Some(7));
    }

    #[test]
    fn test_missing_and_blank_keys() {
        let wb = Workbook::open(inventory_workbook()).unwrap();
        let sheet = wb.sheet("INV").unwrap();
        assert_eq!(find_row(sheet, 1, "NOPE", 3, 7), None);
        assert_eq!(find_row(sheet, 1, "   ", 3, 7), None);
        assert_eq!(find_row(sheet, 1, "X1", 8, 7), None);
    }

    #[test]
    fn test_header_row_is_not_a_candidate() {
        let wb = Workbook::open(inventory_workbook()).unwrap();
        let sheet = wb.sheet("INV").unwrap();
        assert_eq!(find_row(sheet, 1, "ASIN", 3, 7), None);
    }

    #[test]
    fn test_numeric_key_cells() {
        let bytes = build_workbook(&[(
            "UPC",
            vec![
                vec![Fx::S("ASIN")],
                vec![Fx::N(12345.0)],
                vec![Fx::S("12346")],
            ],
        )]);
        let wb = Workbook::open(bytes).unwrap();
        let sheet = wb.sheet("UPC").unwrap();
        assert_eq!(find_row(sheet, 1, "12345", 2, 3), Some(2));
        assert_eq!(find_row(sheet, 1, "12346", 2, 3), Some(3));
    }
}
