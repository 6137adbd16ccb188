//! Format-preserving xlsx workbook codec
//!
//! `Workbook::open` reads a package from bytes into sparse sheet grids;
//! `Workbook::to_bytes` writes it back. Only worksheets that were written to
//! are re-serialized, and only at the patched cells. Every other package
//! entry (styles, shared strings, other sheets, drawings...) is copied raw.

pub mod archive;
pub mod cell;
mod formula;
mod recalc;
mod rewrite;
mod shared_strings;
pub mod sheet;

pub use cell::{CellValue, cell_ref, column_index, column_name, parse_cell_ref};
pub use sheet::{Cell, Sheet, UsedRange};

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};

/// An xlsx workbook opened for editing
#[derive(Debug, Clone)]
pub struct Workbook {
    bytes: Vec<u8>,
    workbook_part: String,
    sheets: Vec<Sheet>,
}

impl Workbook {
    /// Open a workbook from the bytes of an xlsx package
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        let mut archive = archive::open_archive(&bytes)?;
        let workbook_part = archive::find_workbook_part(&mut archive)?;
        let catalog = archive::load_sheet_catalog(&mut archive, &workbook_part)?;

        let shared_strings = match archive::read_entry(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => shared_strings::parse_shared_strings(&xml)?,
            None => Vec::new(),
        };

        let mut sheets = Vec::with_capacity(catalog.len());
        for entry in &catalog {
            let xml = archive::read_entry(&mut archive, &entry.part)?.with_context(|| {
                format!("Worksheet part missing for '{}': {}", entry.name, entry.part)
            })?;
            sheets.push(Sheet::parse(&entry.name, &entry.part, xml, &shared_strings)?);
        }
        drop(archive);

        log::debug!(
            "Opened workbook ({} bytes) with sheets: {}",
            bytes.len(),
            catalog
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            bytes,
            workbook_part,
            sheets,
        })
    }

    /// Sheet names in workbook order
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name()).collect()
    }

    /// Get a sheet by exact name
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name() == name)
    }

    /// Get a sheet by exact name for editing
    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name() == name)
    }

    /// Whether any sheet has pending writes
    pub fn is_dirty(&self) -> bool {
        self.sheets.iter().any(Sheet::is_dirty)
    }

    /// Serialize the workbook.
    ///
    /// An unmodified workbook serializes to exactly the bytes it was opened from.
    /// Overwriting a formula drops the calculation chain and asks Excel for a
    /// full recalculation on load.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if !self.is_dirty() {
            return Ok(self.bytes.clone());
        }

        let mut replacements = HashMap::new();
        for sheet in self.sheets.iter().filter(|s| s.is_dirty()) {
            let xml = rewrite::rewrite_sheet_xml(sheet.original_xml(), sheet.edits())
                .with_context(|| format!("Failed to patch worksheet '{}'", sheet.name()))?;
            log::debug!(
                "Rewrote {} ({} cell(s) patched)",
                sheet.part(),
                sheet.edits().len()
            );
            replacements.insert(sheet.part().to_string(), xml);
        }

        let mut removed = HashSet::new();
        if self.sheets.iter().any(|s| s.is_dirty() && s.removes_formulas()) {
            self.drop_calc_chain(&mut replacements, &mut removed)
                .context("Failed to update calculation metadata")?;
        }

        archive::write_package(&self.bytes, &replacements, &removed)
    }

    fn drop_calc_chain(
        &self,
        replacements: &mut HashMap<String, Vec<u8>>,
        removed: &mut HashSet<String>,
    ) -> Result<()> {
        let mut archive = archive::open_archive(&self.bytes)?;
        let (dir, file) = archive::split_part(&self.workbook_part);

        let rels_part = format!("{}_rels/{}.rels", dir, file);
        if let Some(rels) = archive::read_entry(&mut archive, &rels_part)? {
            let (rels, targets) = recalc::strip_calc_chain_relationship(&rels)?;
            if !targets.is_empty() {
                replacements.insert(rels_part, rels);
                removed.extend(targets.iter().map(|t| archive::resolve_target(dir, t)));
            }
        }

        if !removed.is_empty() {
            const CONTENT_TYPES: &str = "[Content_Types].xml";
            if let Some(mut types) = archive::read_entry(&mut archive, CONTENT_TYPES)? {
                for part in removed.iter() {
                    types = recalc::strip_content_type_override(&types, part)?;
                }
                replacements.insert(CONTENT_TYPES.to_string(), types);
            }
            log::info!("Formulas overwritten, dropped calculation chain");
        }

        let workbook_xml = archive::read_entry(&mut archive, &self.workbook_part)?
            .with_context(|| format!("Package has no workbook part: {}", self.workbook_part))?;
        replacements.insert(
            self.workbook_part.clone(),
            recalc::force_full_calc_on_load(&workbook_xml)?,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        CALC_CHAIN_XML, add_calc_chain, formula_workbook, inventory_workbook, read_back,
    };

    fn entry_text(bytes: &[u8], name: &str) -> Option<String> {
        let mut archive = archive::open_archive(bytes).unwrap();
        archive::read_entry(&mut archive, name)
            .unwrap()
            .map(|b| String::from_utf8(b).unwrap())
    }

    #[test]
    fn test_open_lists_sheets_in_order() {
        let wb = Workbook::open(inventory_workbook()).unwrap();
        assert_eq!(wb.sheet_names(), vec!["INV", "Notes"]);
        assert!(wb.sheet("inv").is_none());
    }

    #[test]
    fn test_reads_header_and_values() {
        let wb = Workbook::open(inventory_workbook()).unwrap();
        let sheet = wb.sheet("INV").unwrap();
        assert_eq!(sheet.text(2, 1), "ASIN");
        assert_eq!(sheet.text(2, 3), "QTY");
        assert_eq!(sheet.text(5, 1), "X1");
        assert_eq!(sheet.value(5, 3), &CellValue::Number(7.0));
    }

    #[test]
    fn test_unmodified_roundtrip_is_identical() {
        let bytes = inventory_workbook();
        let wb = Workbook::open(bytes.clone()).unwrap();
        assert_eq!(wb.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_patched_cell_visible_to_independent_reader() {
        let mut wb = Workbook::open(inventory_workbook()).unwrap();
        wb.sheet_mut("INV").unwrap().set_value(5, 3, CellValue::Number(42.0));
        wb.sheet_mut("INV")
            .unwrap()
            .set_value(5, 4, CellValue::Text("restock".into()));
        let bytes = wb.to_bytes().unwrap();

        let range = read_back(&bytes, "INV");
        assert_eq!(range.get_value((4, 2)), Some(&calamine::Data::Float(42.0)));
        assert_eq!(
            range.get_value((4, 3)),
            Some(&calamine::Data::String("restock".into()))
        );
        // Neighbours untouched
        assert_eq!(range.get_value((4, 0)), Some(&calamine::Data::String("X1".into())));
        assert_eq!(range.get_value((5, 2)), Some(&calamine::Data::Float(3.0)));
    }

    #[test]
    fn test_untouched_parts_are_byte_identical() {
        let original = inventory_workbook();
        let mut wb = Workbook::open(original.clone()).unwrap();
        wb.sheet_mut("INV").unwrap().set_value(5, 3, CellValue::Number(1.0));
        let patched = wb.to_bytes().unwrap();

        let mut before = archive::open_archive(&original).unwrap();
        let mut after = archive::open_archive(&patched).unwrap();
        let inv_part = wb.sheet("INV").unwrap().part().to_string();
        for name in ["xl/styles.xml", "xl/sharedStrings.xml", "xl/workbook.xml"] {
            assert_eq!(
                archive::read_entry(&mut before, name).unwrap(),
                archive::read_entry(&mut after, name).unwrap(),
                "{} changed",
                name
            );
        }
        let notes_part = wb.sheet("Notes").unwrap().part().to_string();
        assert_eq!(
            archive::read_entry(&mut before, &notes_part).unwrap(),
            archive::read_entry(&mut after, &notes_part).unwrap()
        );
        assert_ne!(
            archive::read_entry(&mut before, &inv_part).unwrap(),
            archive::read_entry(&mut after, &inv_part).unwrap()
        );
    }

    #[test]
    fn test_reopen_after_patch_keeps_style_index() {
        let mut wb = Workbook::open(inventory_workbook()).unwrap();
        let style_before = wb.sheet("INV").unwrap().cell(5, 3).unwrap().style;
        assert!(style_before.is_some());

        wb.sheet_mut("INV").unwrap().set_value(5, 3, CellValue::Number(42.0));
        let reopened = Workbook::open(wb.to_bytes().unwrap()).unwrap();

        let cell = reopened.sheet("INV").unwrap().cell(5, 3).unwrap();
        assert_eq!(cell.value, CellValue::Number(42.0));
        assert_eq!(cell.style, style_before);
    }

    #[test]
    fn test_rejects_non_zip_bytes() {
        assert!(Workbook::open(b"not a workbook".to_vec()).is_err());
    }

    #[test]
    fn test_overwriting_formula_drops_calc_chain() {
        let original = add_calc_chain(&formula_workbook());
        assert!(entry_text(&original, "xl/calcChain.xml").is_some());

        let mut wb = Workbook::open(original).unwrap();
        assert!(wb.sheet("Calc").unwrap().cell(2, 3).unwrap().has_formula);
        wb.sheet_mut("Calc").unwrap().set_value(2, 3, CellValue::Number(10.0));
        let patched = wb.to_bytes().unwrap();

        assert!(entry_text(&patched, "xl/calcChain.xml").is_none());
        let rels = entry_text(&patched, "xl/_rels/workbook.xml.rels").unwrap();
        assert!(!rels.contains("calcChain"), "{}", rels);
        assert!(rels.contains("worksheets/sheet1.xml"));
        let types = entry_text(&patched, "[Content_Types].xml").unwrap();
        assert!(!types.contains("calcChain"), "{}", types);
        assert!(types.contains("/xl/workbook.xml"));
        let workbook_xml = entry_text(&patched, "xl/workbook.xml").unwrap();
        assert!(workbook_xml.contains(r#"fullCalcOnLoad="1""#), "{}", workbook_xml);

        let range = read_back(&patched, "Calc");
        assert_eq!(range.get_value((1, 2)), Some(&calamine::Data::Float(10.0)));
        assert_eq!(range.get_value((1, 1)), Some(&calamine::Data::Float(4.0)));
    }

    #[test]
    fn test_plain_edit_keeps_calc_chain() {
        let original = add_calc_chain(&formula_workbook());
        let mut wb = Workbook::open(original.clone()).unwrap();
        wb.sheet_mut("Calc").unwrap().set_value(2, 2, CellValue::Number(5.0));
        let patched = wb.to_bytes().unwrap();

        assert_eq!(
            entry_text(&patched, "xl/calcChain.xml").as_deref(),
            Some(CALC_CHAIN_XML)
        );
        for name in [
            "[Content_Types].xml",
            "xl/_rels/workbook.xml.rels",
            "xl/workbook.xml",
        ] {
            assert_eq!(entry_text(&original, name), entry_text(&patched, name), "{}", name);
        }
    }
}
