//! Typed field writes into a matched row

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::header::{AliasSet, HeaderMap, normalize};
use super::value::FieldInput;
use crate::workbook::{Sheet, cell_ref};

/// The column records are matched by, and the names it goes by
#[derive(Debug, Clone, Copy)]
pub struct KeyColumn<'a> {
    pub aliases: &'a AliasSet,
    pub column: u32,
}

impl KeyColumn<'_> {
    /// Whether a field would write into the key: it resolves to the key
    /// column or is spelled as one of the key aliases
    fn guards(&self, name: &str, col: u32) -> bool {
        col == self.column || self.aliases.matches(&normalize(name))
    }
}

/// Which fields of one record were written and which were not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOutcome {
    /// Field names (as given by the caller) written to the row
    pub applied: Vec<String>,
    /// Field names with no matching header (or naming the key column)
    pub skipped: Vec<String>,
}

/// Write `fields` into `row`, resolving each name through `headers`.
///
/// Unknown names are skipped, never an error. A field resolving to the key
/// column, or named like the key, is skipped too: the key identifies the row
/// and is not patchable. Cell styles are left as they are.
pub fn patch(
    sheet: &mut Sheet,
    row: u32,
    fields: &BTreeMap<String, FieldInput>,
    headers: &HeaderMap,
    key: Option<KeyColumn<'_>>,
) -> PatchOutcome {
    let mut outcome = PatchOutcome::default();

    for (name, input) in fields {
        let Some(col) = headers.column(name) else {
            log::debug!("Sheet '{}': no column for field '{}'", sheet.name(), name);
            outcome.skipped.push(name.clone());
            continue;
        };
        if key.is_some_and(|key| key.guards(name, col)) {
            log::debug!("Sheet '{}': refusing to overwrite key column via '{}'", sheet.name(), name);
            outcome.skipped.push(name.clone());
            continue;
        }

        let value = input.to_cell_value();
        log::debug!("Sheet '{}': {} = {}", sheet.name(), cell_ref(row, col), value);
        sheet.set_value(row, col, value);
        outcome.applied.push(name.clone());
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::header::{AliasSet, SearchWindow, locate};
    use crate::test_support::{Fx, build_workbook, inventory_workbook};
    use crate::workbook::{CellValue, Workbook};

    fn fields(list: &[(&str, &str)]) -> BTreeMap<String, FieldInput> {
        list.iter()
            .map(|(k, v)| (k.to_string(), FieldInput::from(*v)))
            .collect()
    }

    fn asin() -> AliasSet {
        AliasSet::new(["ASIN", "ASINS"])
    }

    fn key(aliases: &AliasSet) -> Option<KeyColumn<'_>> {
        Some(KeyColumn { aliases, column: 1 })
    }

    fn setup() -> (Workbook, HeaderMap) {
        let wb = Workbook::open(inventory_workbook()).unwrap();
        let headers = locate(
            wb.sheet("INV").unwrap(),
            &[AliasSet::single("ASIN")],
            SearchWindow::default(),
        )
        .unwrap()
        .columns;
        (wb, headers)
    }

    #[test]
    fn test_numeric_write_applies() {
        let (mut wb, headers) = setup();
        let sheet = wb.sheet_mut("INV").unwrap();

        let outcome = patch(sheet, 5, &fields(&[("QTY", "42")]), &headers, key(&asin()));

        assert_eq!(outcome.applied, vec!["QTY"]);
        assert!(outcome.skipped.is_empty());
        assert_eq!(sheet.value(5, 3), &CellValue::Number(42.0));
    }

    #[test]
    fn test_unknown_field_is_skipped_without_writes() {
        let (mut wb, headers) = setup();
        let sheet = wb.sheet_mut("INV").unwrap();

        let outcome = patch(sheet, 5, &fields(&[("PRICE", "9.99")]), &headers, key(&asin()));

        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.skipped, vec!["PRICE"]);
        assert!(!sheet.is_dirty());
    }

    #[test]
    fn test_field_names_match_case_insensitively() {
        let (mut wb, headers) = setup();
        let sheet = wb.sheet_mut("INV").unwrap();

        let outcome = patch(
            sheet,
            6,
            &fields(&[("status", "backorder"), ("  Qty ", "")]),
            &headers,
            key(&asin()),
        );

        assert_eq!(outcome.applied, vec!["  Qty ", "status"]);
        assert_eq!(sheet.value(6, 4), &CellValue::Text("backorder".into()));
        assert_eq!(sheet.value(6, 3), &CellValue::Empty);
    }

    #[test]
    fn test_key_column_is_not_patchable() {
        let (mut wb, headers) = setup();
        let sheet = wb.sheet_mut("INV").unwrap();

        let outcome = patch(sheet, 5, &fields(&[("asin", "Z9")]), &headers, key(&asin()));

        assert_eq!(outcome.skipped, vec!["asin"]);
        assert_eq!(sheet.text(5, 1), "X1");
    }

    #[test]
    fn test_duplicate_key_header_is_not_patchable() {
        // Two ASIN headers: the map resolves ASIN to D, the key column is A
        let mut wb = Workbook::open(build_workbook(&[(
            "INV",
            vec![
                vec![Fx::S("ASIN"), Fx::S("QTY"), Fx::S("NOTE"), Fx::S("ASIN")],
                vec![Fx::S("X1"), Fx::N(1.0), Fx::S("-"), Fx::S("X1-old")],
            ],
        )]))
        .unwrap();
        let sheet = wb.sheet_mut("INV").unwrap();
        let location = locate(sheet, &[asin()], SearchWindow::default()).unwrap();
        assert_eq!(location.key_column, 1);
        assert_eq!(location.columns.column("ASIN"), Some(4));

        let aliases = asin();
        let key = KeyColumn {
            aliases: &aliases,
            column: location.key_column,
        };
        let outcome = patch(
            sheet,
            2,
            &fields(&[("asin", "Z9"), ("ASINS", "Z9"), ("QTY", "5")]),
            &location.columns,
            Some(key),
        );

        assert_eq!(outcome.applied, vec!["QTY"]);
        assert_eq!(outcome.skipped, vec!["ASINS", "asin"]);
        assert_eq!(sheet.text(2, 1), "X1");
        assert_eq!(sheet.text(2, 4), "X1-old");
    }

    #[test]
    fn test_style_survives_write() {
        let (mut wb, headers) = setup();
        let sheet = wb.sheet_mut("INV").unwrap();
        let style = sheet.cell(5, 3).unwrap().style;

        patch(sheet, 5, &fields(&[("QTY", "1")]), &headers, key(&asin()));

        assert_eq!(sheet.cell(5, 3).unwrap().style, style);
    }
}
