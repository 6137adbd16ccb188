//! Patch worksheet XML in place
//!
//! The worksheet is streamed event by event. Everything is written back as
//! read, except:
//! - `<c>` elements at patched positions, which are regenerated with their
//!   original attributes (style included) minus the type tag;
//! - patched positions with no existing `<c>`/`<row>`, which are inserted in
//!   row/column order;
//! - `<dimension>`, which is widened when a write lands outside it;
//! - followers of a shared formula whose master cell is overwritten, which
//!   get the master's formula as a plain formula of their own.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

use super::archive::attr;
use super::cell::{CellValue, cell_ref, format_number, parse_range_ref};
use super::formula::shift_references;
use super::sheet::{cell_position, row_number};

type RowEdits = BTreeMap<u32, BTreeMap<u32, CellValue>>;

/// Rewrite worksheet XML so that `edits` are reflected and nothing else changes
pub fn rewrite_sheet_xml(xml: &[u8], edits: &BTreeMap<(u32, u32), CellValue>) -> Result<Vec<u8>> {
    let mut rows: RowEdits = BTreeMap::new();
    for (&(row, col), value) in edits {
        rows.entry(row).or_default().insert(col, value.clone());
    }

    let mut patcher = SheetPatcher {
        writer: Writer::new(Vec::with_capacity(xml.len() + edits.len() * 64)),
        pending_rows: rows,
        prefix: String::new(),
        detached: overwritten_shared_masters(xml, edits)?,
    };
    patcher.run(xml, edits)?;
    Ok(patcher.writer.into_inner())
}

struct SheetPatcher {
    writer: Writer<Vec<u8>>,
    pending_rows: RowEdits,
    /// Namespace prefix used by the sheet's elements (usually empty)
    prefix: String,
    /// Shared formulas losing their master, keyed by `si`
    detached: HashMap<String, SharedMaster>,
}

/// Definition of a shared formula, held by its master cell
#[derive(Debug, Clone, PartialEq)]
struct SharedMaster {
    row: u32,
    col: u32,
    formula: String,
}

impl SheetPatcher {
    fn run(&mut self, xml: &[u8], edits: &BTreeMap<(u32, u32), CellValue>) -> Result<()> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut skip_buf = Vec::new();

        let mut in_sheet_data = false;
        let mut last_row: u32 = 0;
        let mut last_col: u32 = 0;
        let mut current: Option<BTreeMap<u32, CellValue>> = None;
        // Position of the `<c>` being copied through
        let mut open_cell: Option<(u32, u32)> = None;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .context("Malformed worksheet XML")?;

            match event {
                Event::Eof => break,
                Event::Empty(e) if e.local_name().as_ref() == b"dimension" => {
                    let widened = widen_dimension(&e, edits)?;
                    self.write(Event::Empty(widened.unwrap_or(e)))?;
                }
                Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                    self.prefix = element_prefix(&e);
                    in_sheet_data = true;
                    self.write(Event::Start(e))?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                    self.prefix = element_prefix(&e);
                    let name = self.name("sheetData");
                    self.write(Event::Start(e))?;
                    self.flush_rows_before(u32::MAX)?;
                    self.write(Event::End(BytesEnd::new(name)))?;
                }
                Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                    self.flush_rows_before(u32::MAX)?;
                    in_sheet_data = false;
                    self.write(Event::End(e))?;
                }
                Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                    let row = row_number(&e, last_row)?;
                    last_row = row;
                    last_col = 0;
                    self.flush_rows_before(row)?;
                    current = self.pending_rows.remove(&row);
                    self.write(Event::Start(e))?;
                }
                Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                    let row = row_number(&e, last_row)?;
                    last_row = row;
                    self.flush_rows_before(row)?;
                    match self.pending_rows.remove(&row) {
                        Some(cells) => {
                            let end = BytesEnd::new(self.name("row"));
                            self.write(Event::Start(e))?;
                            for (col, value) in &cells {
                                self.write_cell(None, row, *col, value)?;
                            }
                            self.write(Event::End(end))?;
                        }
                        None => self.write(Event::Empty(e))?,
                    }
                }
                Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                    if let Some(cells) = current.take() {
                        for (col, value) in &cells {
                            self.write_cell(None, last_row, *col, value)?;
                        }
                    }
                    self.write(Event::End(e))?;
                }
                Event::Start(e) if current.is_some() && e.local_name().as_ref() == b"c" => {
                    let (row, col) = cell_position(&e, last_row, last_col)?;
                    last_col = col;
                    let replacement = self.insert_cells_before(&mut current, row, col)?;
                    match replacement {
                        Some(value) => {
                            self.write_cell(Some(&e), row, col, &value)?;
                            let name = e.name().as_ref().to_vec();
                            reader
                                .read_to_end_into(QName(&name), &mut skip_buf)
                                .context("Unterminated <c> element")?;
                            skip_buf.clear();
                        }
                        None => {
                            open_cell = Some((row, col));
                            self.write(Event::Start(with_reference(e, row, col)?))?;
                        }
                    }
                }
                Event::Empty(e) if current.is_some() && e.local_name().as_ref() == b"c" => {
                    let (row, col) = cell_position(&e, last_row, last_col)?;
                    last_col = col;
                    let replacement = self.insert_cells_before(&mut current, row, col)?;
                    match replacement {
                        Some(value) => self.write_cell(Some(&e), row, col, &value)?,
                        None => self.write(Event::Empty(with_reference(e, row, col)?))?,
                    }
                }
                Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                    let (row, col) = cell_position(&e, last_row, last_col)?;
                    last_col = col;
                    open_cell = Some((row, col));
                    self.write(Event::Start(e))?;
                }
                Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                    open_cell = None;
                    self.write(Event::End(e))?;
                }
                Event::Empty(e) if open_cell.is_some() && e.local_name().as_ref() == b"f" => {
                    match self.detach(&e, open_cell)? {
                        Some((plain, formula)) => self.write_formula(plain, &formula)?,
                        None => self.write(Event::Empty(e))?,
                    }
                }
                Event::Start(e) if open_cell.is_some() && e.local_name().as_ref() == b"f" => {
                    match self.detach(&e, open_cell)? {
                        Some((plain, formula)) => {
                            self.write_formula(plain, &formula)?;
                            let name = e.name().as_ref().to_vec();
                            reader
                                .read_to_end_into(QName(&name), &mut skip_buf)
                                .context("Unterminated <f> element")?;
                            skip_buf.clear();
                        }
                        None => self.write(Event::Start(e))?,
                    }
                }
                Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                    let (_, col) = cell_position(&e, last_row, last_col)?;
                    last_col = col;
                    self.write(Event::Empty(e))?;
                }
                other => self.write(other)?,
            }
            buf.clear();
        }

        Ok(())
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .context("Failed to write worksheet XML")?;
        Ok(())
    }

    /// Plain formula for a follower of a detached shared formula, None for
    /// any other `<f>`
    fn detach(
        &self,
        f: &BytesStart<'_>,
        cell: Option<(u32, u32)>,
    ) -> Result<Option<(BytesStart<'static>, String)>> {
        let Some((row, col)) = cell else {
            return Ok(None);
        };
        if self.detached.is_empty() || attr(f, b"t")?.as_deref() != Some("shared") {
            return Ok(None);
        }
        let Some(master) = attr(f, b"si")?.and_then(|si| self.detached.get(&si)) else {
            return Ok(None);
        };

        let formula = shift_references(
            &master.formula,
            i64::from(row) - i64::from(master.row),
            i64::from(col) - i64::from(master.col),
        );
        log::debug!("Detached shared formula at {}: {}", cell_ref(row, col), formula);

        let name = String::from_utf8_lossy(f.name().as_ref()).into_owned();
        let mut plain = BytesStart::new(name);
        for a in f.attributes().flatten() {
            if !matches!(a.key.as_ref(), b"t" | b"ref" | b"si") {
                plain.push_attribute(a);
            }
        }
        Ok(Some((plain, formula)))
    }

    fn write_formula(&mut self, start: BytesStart<'static>, formula: &str) -> Result<()> {
        let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
        self.write(Event::Start(start))?;
        self.write(Event::Text(BytesText::new(formula)))?;
        self.write(Event::End(end))
    }

    fn name(&self, local: &str) -> String {
        format!("{}{}", self.prefix, local)
    }

    /// Write new rows for every pending row number below `limit`
    fn flush_rows_before(&mut self, limit: u32) -> Result<()> {
        let due: Vec<u32> = self.pending_rows.range(..limit).map(|(r, _)| *r).collect();
        for row in due {
            let Some(cells) = self.pending_rows.remove(&row) else {
                continue;
            };
            let name = self.name("row");
            let mut start = BytesStart::new(name.clone());
            start.push_attribute(("r", row.to_string().as_str()));
            self.write(Event::Start(start))?;
            for (col, value) in &cells {
                self.write_cell(None, row, *col, value)?;
            }
            self.write(Event::End(BytesEnd::new(name)))?;
        }
        Ok(())
    }

    /// Insert pending cells left of `col`; return the edit for `col` itself, if any
    fn insert_cells_before(
        &mut self,
        current: &mut Option<BTreeMap<u32, CellValue>>,
        row: u32,
        col: u32,
    ) -> Result<Option<CellValue>> {
        let Some(cells) = current.as_mut() else {
            return Ok(None);
        };
        let due: Vec<u32> = cells.range(..col).map(|(c, _)| *c).collect();
        for c in due {
            if let Some(value) = cells.remove(&c) {
                self.write_cell(None, row, c, &value)?;
            }
        }
        Ok(cells.remove(&col))
    }

    /// Emit a `<c>` element for `value`, reusing the attributes of `original`
    fn write_cell(
        &mut self,
        original: Option<&BytesStart<'_>>,
        row: u32,
        col: u32,
        value: &CellValue,
    ) -> Result<()> {
        let name = self.name("c");
        let mut start = BytesStart::new(name.clone());
        start.push_attribute(("r", cell_ref(row, col).as_str()));
        if let Some(original) = original {
            for a in original.attributes().flatten() {
                match a.key.as_ref() {
                    b"r" | b"t" | b"vm" => {}
                    _ => start.push_attribute(a),
                }
            }
        }

        match value {
            CellValue::Empty => self.write(Event::Empty(start)),
            CellValue::Number(n) => {
                let v = self.name("v");
                self.write(Event::Start(start))?;
                self.write(Event::Start(BytesStart::new(v.clone())))?;
                self.write(Event::Text(BytesText::new(&format_number(*n))))?;
                self.write(Event::End(BytesEnd::new(v)))?;
                self.write(Event::End(BytesEnd::new(name)))
            }
            CellValue::Text(text) => {
                let is = self.name("is");
                let t = self.name("t");
                start.push_attribute(("t", "inlineStr"));
                self.write(Event::Start(start))?;
                self.write(Event::Start(BytesStart::new(is.clone())))?;
                let mut t_start = BytesStart::new(t.clone());
                if text.trim() != text || text.contains('\n') {
                    t_start.push_attribute(("xml:space", "preserve"));
                }
                self.write(Event::Start(t_start))?;
                self.write(Event::Text(BytesText::new(text)))?;
                self.write(Event::End(BytesEnd::new(t)))?;
                self.write(Event::End(BytesEnd::new(is)))?;
                self.write(Event::End(BytesEnd::new(name)))
            }
        }
    }
}

/// Shared formula masters sitting on edited cells, keyed by `si`.
///
/// Their followers lose the definition they refer to once the master is
/// overwritten, so the rewrite hands each follower its own copy.
fn overwritten_shared_masters(
    xml: &[u8],
    edits: &BTreeMap<(u32, u32), CellValue>,
) -> Result<HashMap<String, SharedMaster>> {
    let mut masters = HashMap::new();
    if edits.is_empty() {
        return Ok(masters);
    }

    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut last_row: u32 = 0;
    let mut last_col: u32 = 0;
    let mut edited_cell: Option<(u32, u32)> = None;
    let mut reading: Option<(String, String)> = None;

    loop {
        match reader
            .read_event_into(&mut buf)
            .context("Malformed worksheet XML")?
        {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                last_row = row_number(&e, last_row)?;
                last_col = 0;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                last_col = cell_position(&e, last_row, last_col)?.1;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let position = cell_position(&e, last_row, last_col)?;
                last_col = position.1;
                edited_cell = edits.contains_key(&position).then_some(position);
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => edited_cell = None,
            Event::Start(e) if edited_cell.is_some() && e.local_name().as_ref() == b"f" => {
                let shared = attr(&e, b"t")?.as_deref() == Some("shared");
                if let (true, Some(_), Some(si)) = (shared, attr(&e, b"ref")?, attr(&e, b"si")?) {
                    reading = Some((si, String::new()));
                }
            }
            Event::Text(e) => {
                if let Some((_, formula)) = reading.as_mut() {
                    formula.push_str(&e.unescape()?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"f" => {
                if let (Some((si, formula)), Some((row, col))) = (reading.take(), edited_cell) {
                    if !formula.trim().is_empty() {
                        log::debug!(
                            "Overwriting shared formula master {} (si {})",
                            cell_ref(row, col),
                            si
                        );
                        masters.insert(si, SharedMaster { row, col, formula });
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(masters)
}

/// Namespace prefix of an element name, including the colon ("x:" or "")
fn element_prefix(e: &BytesStart<'_>) -> String {
    match e.name().prefix() {
        Some(prefix) => format!("{}:", String::from_utf8_lossy(prefix.as_ref())),
        None => String::new(),
    }
}

/// Give a cell an explicit `r` when it relied on its position, so cells
/// inserted before it cannot shift it
fn with_reference(e: BytesStart<'_>, row: u32, col: u32) -> Result<BytesStart<'_>> {
    if attr(&e, b"r")?.is_some() {
        return Ok(e);
    }
    let mut e = e;
    e.push_attribute(("r", cell_ref(row, col).as_str()));
    Ok(e)
}

/// Widen `<dimension ref>` to cover every edited position, None if unchanged
fn widen_dimension(
    e: &BytesStart<'_>,
    edits: &BTreeMap<(u32, u32), CellValue>,
) -> Result<Option<BytesStart<'static>>> {
    let Some(current) = attr(e, b"ref")? else {
        return Ok(None);
    };
    let Some(((mut min_row, mut min_col), (mut max_row, mut max_col))) = parse_range_ref(&current)
    else {
        return Ok(None);
    };

    let mut changed = false;
    for &(row, col) in edits.keys() {
        if row < min_row || row > max_row || col < min_col || col > max_col {
            changed = true;
            min_row = min_row.min(row);
            max_row = max_row.max(row);
            min_col = min_col.min(col);
            max_col = max_col.max(col);
        }
    }
    if !changed {
        return Ok(None);
    }

    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut widened = BytesStart::new(Cow::Owned(name));
    let new_ref = format!("{}:{}", cell_ref(min_row, min_col), cell_ref(max_row, max_col));
    for a in e.attributes().flatten() {
        if a.key.as_ref() == b"ref" {
            widened.push_attribute(("ref", new_ref.as_str()));
        } else {
            widened.push_attribute((
                String::from_utf8_lossy(a.key.as_ref()).as_ref(),
                a.unescape_value()?.as_ref(),
            ));
        }
    }
    Ok(Some(widened))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::sheet::Sheet;

    const SHEET_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:C3"/><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>ASIN</t></is></c><c r="C1" s="3" t="inlineStr"><is><t>QTY</t></is></c></row><row r="3" s="5" customFormat="1"><c r="A3" t="inlineStr"><is><t>X1</t></is></c><c r="C3" s="7" t="s"><v>0</v></c></row></sheetData><mergeCells count="1"><mergeCell ref="A1:B1"/></mergeCells></worksheet>"#;

    fn edits(list: &[((u32, u32), CellValue)]) -> BTreeMap<(u32, u32), CellValue> {
        list.iter().cloned().collect()
    }

    fn rewrite(list: &[((u32, u32), CellValue)]) -> String {
        let out = rewrite_sheet_xml(SHEET_XML.as_bytes(), &edits(list)).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_no_edits_is_identity() {
        assert_eq!(rewrite(&[]), SHEET_XML);
    }

    #[test]
    fn test_replace_existing_cell_keeps_style() {
        let out = rewrite(&[((3, 3), CellValue::Number(42.0))]);
        assert!(out.contains(r#"<c r="C3" s="7"><v>42</v></c>"#), "{}", out);
        assert!(!out.contains(r#"t="s""#));
        // Untouched cells and trailing parts survive byte for byte
        assert!(out.contains(r#"<c r="A3" t="inlineStr"><is><t>X1</t></is></c>"#));
        assert!(out.contains(r#"<mergeCells count="1"><mergeCell ref="A1:B1"/></mergeCells>"#));
        assert!(out.contains(r#"<dimension ref="A1:C3"/>"#));
    }

    #[test]
    fn test_insert_cell_into_existing_row() {
        let out = rewrite(&[((3, 2), CellValue::Text("note".into()))]);
        assert!(
            out.contains(r#"<c r="A3" t="inlineStr"><is><t>X1</t></is></c><c r="B3" t="inlineStr"><is><t>note</t></is></c><c r="C3""#),
            "{}",
            out
        );
    }

    #[test]
    fn test_insert_missing_row_in_order() {
        let out = rewrite(&[((2, 1), CellValue::Number(1.5))]);
        assert!(
            out.contains(r#"</row><row r="2"><c r="A2"><v>1.5</v></c></row><row r="3""#),
            "{}",
            out
        );
    }

    #[test]
    fn test_append_row_and_widen_dimension() {
        let out = rewrite(&[((6, 5), CellValue::Text("late".into()))]);
        assert!(out.contains(r#"<dimension ref="A1:E6"/>"#), "{}", out);
        assert!(out.contains(r#"<row r="6"><c r="E6" t="inlineStr"><is><t>late</t></is></c></row></sheetData>"#));
    }

    #[test]
    fn test_empty_value_clears_but_keeps_style() {
        let out = rewrite(&[((3, 3), CellValue::Empty)]);
        assert!(out.contains(r#"<c r="C3" s="7"/>"#), "{}", out);
    }

    #[test]
    fn test_text_is_escaped_and_reparses() {
        let out = rewrite(&[((1, 2), CellValue::Text(" A & <B> ".into()))]);
        assert!(out.contains(r#"<t xml:space="preserve"> A &amp; &lt;B&gt; </t>"#), "{}", out);

        let sheet = Sheet::parse("INV", "p", out.into_bytes(), &["17".to_string()]).unwrap();
        assert_eq!(sheet.text(1, 2), " A & <B> ");
        assert_eq!(sheet.text(1, 3), "QTY");
    }

    #[test]
    fn test_self_closing_sheet_data() {
        let xml = br#"<worksheet><sheetData/></worksheet>"#;
        let out = rewrite_sheet_xml(xml, &edits(&[((1, 1), CellValue::Number(7.0))])).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<worksheet><sheetData><row r="1"><c r="A1"><v>7</v></c></row></sheetData></worksheet>"#
        );
    }

    const SHARED_XML: &str = r#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</v></c><c r="B1"><f t="shared" ref="B1:B3" si="0">A1*2</f><v>2</v></c></row><row r="2"><c r="A2"><v>2</v></c><c r="B2"><f t="shared" si="0"/><v>4</v></c></row><row r="3"><c r="A3"><v>3</v></c><c r="B3"><f t="shared" si="0"/><v>6</v></c></row><row r="4"><c r="B4"><f t="shared" ref="B4:C4" si="1">$A$1+A4</f><v>1</v></c><c r="C4"><f t="shared" si="1"/><v>1</v></c></row></sheetData></worksheet>"#;

    #[test]
    fn test_overwritten_shared_master_leaves_followers_whole() {
        let out = rewrite_sheet_xml(
            SHARED_XML.as_bytes(),
            &edits(&[((1, 2), CellValue::Number(99.0))]),
        )
        .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(r#"<c r="B1"><v>99</v></c>"#), "{}", out);
        assert!(out.contains(r#"<c r="B2"><f>A2*2</f><v>4</v></c>"#), "{}", out);
        assert!(out.contains(r#"<c r="B3"><f>A3*2</f><v>6</v></c>"#), "{}", out);
        assert!(!out.contains(r#"si="0""#), "{}", out);
        // Other shared groups are untouched
        assert!(out.contains(r#"<f t="shared" ref="B4:C4" si="1">$A$1+A4</f>"#));
        assert!(out.contains(r#"<c r="C4"><f t="shared" si="1"/><v>1</v></c>"#));

        let sheet = Sheet::parse("Calc", "p", out.into_bytes(), &[]).unwrap();
        assert!(sheet.cell(2, 2).unwrap().has_formula);
        assert!(!sheet.cell(1, 2).unwrap().has_formula);
    }

    #[test]
    fn test_overwritten_shared_follower_keeps_master() {
        let out = rewrite_sheet_xml(
            SHARED_XML.as_bytes(),
            &edits(&[((2, 2), CellValue::Number(0.0))]),
        )
        .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(r#"<c r="B1"><f t="shared" ref="B1:B3" si="0">A1*2</f><v>2</v></c>"#));
        assert!(out.contains(r#"<c r="B2"><v>0</v></c>"#), "{}", out);
        assert!(out.contains(r#"<c r="B3"><f t="shared" si="0"/><v>6</v></c>"#));
    }

    #[test]
    fn test_prefixed_elements() {
        let xml = br#"<x:worksheet xmlns:x="urn:x"><x:sheetData><x:row r="1"><x:c r="A1"><x:v>1</x:v></x:c></x:row></x:sheetData></x:worksheet>"#;
        let out = rewrite_sheet_xml(xml, &edits(&[((1, 2), CellValue::Number(2.0))])).unwrap();
        assert!(
            String::from_utf8(out)
                .unwrap()
                .contains(r#"<x:c r="B1"><x:v>2</x:v></x:c></x:row>"#)
        );
    }
}
