//! Workbook fixtures shared by unit tests

use std::io::{Cursor, Read, Write};

use calamine::{Data, Range, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook as XlsxWriter};

/// A fixture cell
#[derive(Debug, Clone, Copy)]
pub enum Fx {
    S(&'static str),
    N(f64),
    Blank,
}

/// Build an xlsx package from rows of fixture cells (row 1 first)
pub fn build_workbook(sheets: &[(&str, Vec<Vec<Fx>>)]) -> Vec<u8> {
    let mut workbook = XlsxWriter::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name).unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                match cell {
                    Fx::S(s) => {
                        worksheet.write_string(r as u32, c as u16, *s).unwrap();
                    }
                    Fx::N(n) => {
                        worksheet.write_number(r as u32, c as u16, *n).unwrap();
                    }
                    Fx::Blank => {}
                }
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}

/// The "INV" scenario workbook.
///
/// Row 1 holds a title, row 2 the header (ASIN in A, QTY in C), data starts
/// at row 3. Key "X1" sits at row 5 and again (lowercase) at row 7. C5 carries
/// a number format, the header cells are bold.
pub fn inventory_workbook() -> Vec<u8> {
    let bold = Format::new().set_bold();
    let two_decimals = Format::new().set_num_format("0.00");

    let mut workbook = XlsxWriter::new();
    let inv = workbook.add_worksheet();
    inv.set_name("INV").unwrap();
    inv.write_string(0, 0, "Inventory report").unwrap();
    inv.write_string_with_format(1, 0, "ASIN", &bold).unwrap();
    inv.write_string_with_format(1, 1, "Title", &bold).unwrap();
    inv.write_string_with_format(1, 2, "QTY", &bold).unwrap();
    inv.write_string_with_format(1, 3, " status ", &bold).unwrap();

    let data: [(&str, &str, f64); 5] = [
        ("A0", "Widget", 5.0),
        ("B2", "Sprocket", 0.0),
        ("X1", "Gizmo", 7.0),
        ("X2", "Thing", 3.0),
        ("x1 ", "Gizmo (dup)", 9.0),
    ];
    for (i, (asin, title, qty)) in data.iter().enumerate() {
        let row = 2 + i as u32;
        inv.write_string(row, 0, *asin).unwrap();
        inv.write_string(row, 1, *title).unwrap();
        if row == 4 {
            inv.write_number_with_format(row, 2, *qty, &two_decimals).unwrap();
        } else {
            inv.write_number(row, 2, *qty).unwrap();
        }
        inv.write_string(row, 3, "ok").unwrap();
    }

    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes.write_string(0, 0, "free text").unwrap();

    workbook.save_to_buffer().unwrap()
}

/// Sheet "Calc": Item, Qty, Double with C2 holding `=B2*2`
pub fn formula_workbook() -> Vec<u8> {
    let mut workbook = XlsxWriter::new();
    let calc = workbook.add_worksheet();
    calc.set_name("Calc").unwrap();
    calc.write_string(0, 0, "Item").unwrap();
    calc.write_string(0, 1, "Qty").unwrap();
    calc.write_string(0, 2, "Double").unwrap();
    calc.write_string(1, 0, "X1").unwrap();
    calc.write_number(1, 1, 4.0).unwrap();
    calc.write_formula(1, 2, "=B2*2").unwrap();
    workbook.save_to_buffer().unwrap()
}

pub const CALC_CHAIN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="C2" i="1"/></calcChain>"#;

/// Add `xl/calcChain.xml` with its relationship and content-type override,
/// the way Excel saves a workbook that has formulas
pub fn add_calc_chain(bytes: &[u8]) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).unwrap();
        let name = file.name().to_string();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        let contents = match name.as_str() {
            "[Content_Types].xml" => contents.replace(
                "</Types>",
                r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/></Types>"#,
            ),
            "xl/_rels/workbook.xml.rels" => contents.replace(
                "</Relationships>",
                r#"<Relationship Id="rId99" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/></Relationships>"#,
            ),
            _ => contents,
        };
        writer.start_file(name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.start_file("xl/calcChain.xml", options).unwrap();
    writer.write_all(CALC_CHAIN_XML.as_bytes()).unwrap();

    writer.finish().unwrap().into_inner()
}

/// Read a sheet back with calamine
pub fn read_back(bytes: &[u8], sheet: &str) -> Range<Data> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec())).unwrap();
    workbook.worksheet_range(sheet).unwrap()
}
