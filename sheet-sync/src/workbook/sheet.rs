//! Worksheet model: a sparse grid of cells read from worksheet XML

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::archive::attr;
use super::cell::{CellValue, parse_cell_ref};

static EMPTY: CellValue = CellValue::Empty;

/// A single cell: its value and the style index it carries
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    pub value: CellValue,
    /// Index into the workbook's cell formats (`s` attribute)
    pub style: Option<u32>,
    /// Whether the cell held a formula when it was read
    pub has_formula: bool,
}

/// Bounding box of all non-empty cells (1-based, inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedRange {
    pub min_row: u32,
    pub max_row: u32,
    pub min_col: u32,
    pub max_col: u32,
}

/// One worksheet of a workbook
#[derive(Debug, Clone)]
pub struct Sheet {
    name: String,
    part: String,
    xml: Vec<u8>,
    cells: BTreeMap<(u32, u32), Cell>,
    edits: BTreeMap<(u32, u32), CellValue>,
    /// Set once a write replaces a formula with a literal
    formulas_removed: bool,
}

impl Sheet {
    /// Parse worksheet XML, resolving shared strings
    pub fn parse(name: &str, part: &str, xml: Vec<u8>, shared_strings: &[String]) -> Result<Self> {
        let cells = parse_cells(&xml, shared_strings)
            .with_context(|| format!("Failed to parse worksheet '{}' ({})", name, part))?;
        Ok(Self {
            name: name.to_string(),
            part: part.to_string(),
            xml,
            cells,
            edits: BTreeMap::new(),
            formulas_removed: false,
        })
    }

    /// Sheet tab name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package part holding this sheet's XML
    pub fn part(&self) -> &str {
        &self.part
    }

    /// Worksheet XML as it was read
    pub fn original_xml(&self) -> &[u8] {
        &self.xml
    }

    /// Get a cell (value and style) at a 1-based position
    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    /// Get a cell's value, `Empty` when the cell does not exist
    pub fn value(&self, row: u32, col: u32) -> &CellValue {
        self.cells.get(&(row, col)).map(|c| &c.value).unwrap_or(&EMPTY)
    }

    /// Display text of a cell (empty string when absent)
    pub fn text(&self, row: u32, col: u32) -> String {
        self.value(row, col).display()
    }

    /// Bounding box of all non-empty cells, None for a blank sheet
    pub fn used_range(&self) -> Option<UsedRange> {
        let mut range: Option<UsedRange> = None;
        for (&(row, col), cell) in &self.cells {
            if cell.value.is_empty() {
                continue;
            }
            range = Some(match range {
                None => UsedRange {
                    min_row: row,
                    max_row: row,
                    min_col: col,
                    max_col: col,
                },
                Some(r) => UsedRange {
                    min_row: r.min_row.min(row),
                    max_row: r.max_row.max(row),
                    min_col: r.min_col.min(col),
                    max_col: r.max_col.max(col),
                },
            });
        }
        range
    }

    /// Set a cell's value, keeping its style.
    ///
    /// The write is recorded so serialization only rewrites patched cells.
    pub fn set_value(&mut self, row: u32, col: u32, value: CellValue) {
        let cell = self.cells.entry((row, col)).or_default();
        if cell.has_formula {
            log::warn!(
                "Overwriting formula cell {}!{} with a literal value",
                self.name,
                super::cell::cell_ref(row, col)
            );
            self.formulas_removed = true;
        }
        cell.value = value.clone();
        cell.has_formula = false;
        self.edits.insert((row, col), value);
    }

    /// Whether any cell has been written since the sheet was read
    pub fn is_dirty(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Whether some write replaced a formula cell
    pub fn removes_formulas(&self) -> bool {
        self.formulas_removed
    }

    /// Pending writes keyed by (row, col)
    pub fn edits(&self) -> &BTreeMap<(u32, u32), CellValue> {
        &self.edits
    }

    /// Iterate over all stored cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = ((u32, u32), &Cell)> {
        self.cells.iter().map(|(pos, cell)| (*pos, cell))
    }
}

/// In-progress `<c>` element while parsing
struct PendingCell {
    row: u32,
    col: u32,
    cell_type: Option<String>,
    style: Option<u32>,
    raw_value: Option<String>,
    inline_text: Option<String>,
    has_formula: bool,
}

impl PendingCell {
    fn from_start(e: &BytesStart<'_>, row: u32, col: u32) -> Result<Self> {
        Ok(Self {
            row,
            col,
            cell_type: attr(e, b"t")?,
            style: attr(e, b"s")?.and_then(|s| s.parse().ok()),
            raw_value: None,
            inline_text: None,
            has_formula: false,
        })
    }

    fn finish(self, shared_strings: &[String]) -> ((u32, u32), Cell) {
        let value = resolve_value(
            self.cell_type.as_deref(),
            self.raw_value,
            self.inline_text,
            shared_strings,
        );
        (
            (self.row, self.col),
            Cell {
                value,
                style: self.style,
                has_formula: self.has_formula,
            },
        )
    }
}

/// Which text node inside a cell is being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    None,
    Value,
    Inline,
}

fn parse_cells(xml: &[u8], shared_strings: &[String]) -> Result<BTreeMap<(u32, u32), Cell>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut cells = BTreeMap::new();

    let mut current_row: u32 = 0;
    let mut current_col: u32 = 0;
    let mut pending: Option<PendingCell> = None;
    let mut target = TextTarget::None;
    let mut in_phonetic = false;

    loop {
        match reader
            .read_event_into(&mut buf)
            .context("Malformed worksheet XML")?
        {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = row_number(&e, current_row)?;
                    current_col = 0;
                }
                b"c" => {
                    let (row, col) = cell_position(&e, current_row, current_col)?;
                    current_col = col;
                    pending = Some(PendingCell::from_start(&e, row, col)?);
                }
                b"v" if pending.is_some() => target = TextTarget::Value,
                b"t" if pending.is_some() => target = TextTarget::Inline,
                b"f" => {
                    if let Some(p) = pending.as_mut() {
                        p.has_formula = true;
                    }
                }
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = row_number(&e, current_row)?;
                    current_col = 0;
                }
                b"c" => {
                    let (row, col) = cell_position(&e, current_row, current_col)?;
                    current_col = col;
                    let (pos, cell) = PendingCell::from_start(&e, row, col)?.finish(shared_strings);
                    cells.insert(pos, cell);
                }
                b"f" => {
                    if let Some(p) = pending.as_mut() {
                        p.has_formula = true;
                    }
                }
                _ => {}
            },
            Event::Text(e) if target != TextTarget::None && !in_phonetic => {
                let text = e.unescape()?;
                if let Some(p) = pending.as_mut() {
                    let slot = match target {
                        TextTarget::Value => &mut p.raw_value,
                        _ => &mut p.inline_text,
                    };
                    slot.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"c" => {
                    if let Some(p) = pending.take() {
                        let (pos, cell) = p.finish(shared_strings);
                        cells.insert(pos, cell);
                    }
                    target = TextTarget::None;
                }
                b"v" | b"t" => target = TextTarget::None,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(cells)
}

/// Row number from `r`, or the next row when the attribute is omitted
pub(crate) fn row_number(e: &BytesStart<'_>, previous: u32) -> Result<u32> {
    match attr(e, b"r")? {
        Some(r) => r
            .trim()
            .parse()
            .with_context(|| format!("Invalid row number: {}", r)),
        None => Ok(previous + 1),
    }
}

/// Cell position from `r`, or the next column of the current row
pub(crate) fn cell_position(e: &BytesStart<'_>, row: u32, previous_col: u32) -> Result<(u32, u32)> {
    match attr(e, b"r")? {
        Some(r) => parse_cell_ref(&r).with_context(|| format!("Invalid cell reference: {}", r)),
        None => Ok((row.max(1), previous_col + 1)),
    }
}

fn resolve_value(
    cell_type: Option<&str>,
    raw_value: Option<String>,
    inline_text: Option<String>,
    shared_strings: &[String],
) -> CellValue {
    match cell_type {
        Some("s") => {
            let Some(index) = raw_value.and_then(|v| v.trim().parse::<usize>().ok()) else {
                return CellValue::Empty;
            };
            match shared_strings.get(index) {
                Some(s) => CellValue::Text(s.clone()),
                None => {
                    log::warn!("Shared string index {} out of range", index);
                    CellValue::Empty
                }
            }
        }
        Some("inlineStr") => inline_text.map(CellValue::Text).unwrap_or_default(),
        Some("b") => match raw_value.as_deref().map(str::trim) {
            Some("1") => CellValue::Text("TRUE".to_string()),
            Some("0") => CellValue::Text("FALSE".to_string()),
            _ => CellValue::Empty,
        },
        Some("str") | Some("e") | Some("d") => raw_value.map(CellValue::Text).unwrap_or_default(),
        _ => match raw_value {
            None => CellValue::Empty,
            Some(v) if v.trim().is_empty() => CellValue::Empty,
            Some(v) => match v.trim().parse::<f64>() {
                Ok(n) => CellValue::Number(n),
                Err(_) => CellValue::Text(v),
            },
        },
    }
}
