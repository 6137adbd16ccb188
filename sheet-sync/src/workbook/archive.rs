//! Zip container handling for xlsx packages
//!
//! Reads the parts needed to locate worksheets and writes a new package in
//! which every untouched entry is copied raw (no recompression).

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";
const OFFICE_DOCUMENT_REL: &str = "/officeDocument";

/// A worksheet as listed in the workbook part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    /// Sheet tab name
    pub name: String,
    /// Zip entry holding the worksheet XML (e.g., "xl/worksheets/sheet1.xml")
    pub part: String,
}

/// Open a zip archive over in-memory bytes
pub fn open_archive(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(bytes)).context("Not a valid xlsx (zip) package")
}

/// Read a whole entry, returning None if it does not exist
pub fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to open package part: {}", name)),
    };
    let mut contents = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut contents)
        .with_context(|| format!("Failed to read package part: {}", name))?;
    Ok(Some(contents))
}

/// Locate the workbook part through the package relationships.
/// Falls back to `xl/workbook.xml` when `_rels/.rels` is missing or silent.
pub fn find_workbook_part(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String> {
    if let Some(rels) = read_entry(archive, "_rels/.rels")? {
        for (_, rel_type, target) in parse_relationships(&rels)? {
            if rel_type.ends_with(OFFICE_DOCUMENT_REL) {
                return Ok(resolve_target("", &target));
            }
        }
    }
    Ok(DEFAULT_WORKBOOK_PART.to_string())
}

/// Build the ordered sheet catalog from the workbook part and its relationships
pub fn load_sheet_catalog(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    workbook_part: &str,
) -> Result<Vec<SheetEntry>> {
    let workbook_xml = read_entry(archive, workbook_part)?
        .with_context(|| format!("Package has no workbook part: {}", workbook_part))?;
    let (dir, file) = split_part(workbook_part);
    let rels_part = format!("{}_rels/{}.rels", dir, file);
    let rels_xml = read_entry(archive, &rels_part)?
        .with_context(|| format!("Package has no workbook relationships: {}", rels_part))?;

    let targets: HashMap<String, String> = parse_relationships(&rels_xml)?
        .into_iter()
        .map(|(id, _, target)| (id, resolve_target(dir, &target)))
        .collect();

    let mut entries = Vec::new();
    for (name, rel_id) in parse_sheet_list(&workbook_xml)? {
        match targets.get(&rel_id) {
            Some(part) => entries.push(SheetEntry {
                name,
                part: part.clone(),
            }),
            None => log::warn!("Sheet '{}' references unknown relationship {}", name, rel_id),
        }
    }

    if entries.is_empty() {
        bail!("Workbook does not contain any worksheets");
    }
    Ok(entries)
}

/// Write a new package: replaced parts get fresh bytes, removed parts are
/// left out, everything else is copied raw
pub fn write_package(
    original: &[u8],
    replacements: &HashMap<String, Vec<u8>>,
    removed: &HashSet<String>,
) -> Result<Vec<u8>> {
    let mut archive = open_archive(original)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(original.len())));

    for index in 0..archive.len() {
        let file = archive
            .by_index_raw(index)
            .with_context(|| format!("Failed to read package entry #{}", index))?;
        let name = file.name().to_string();
        if removed.contains(&name) {
            log::debug!("Dropped package entry {}", name);
            continue;
        }

        match replacements.get(&name) {
            Some(contents) => {
                let options = SimpleFileOptions::default().compression_method(file.compression());
                drop(file);
                writer
                    .start_file(name.as_str(), options)
                    .with_context(|| format!("Failed to start package entry: {}", name))?;
                writer
                    .write_all(contents)
                    .with_context(|| format!("Failed to write package entry: {}", name))?;
            }
            None => writer
                .raw_copy_file(file)
                .with_context(|| format!("Failed to copy package entry: {}", name))?,
        }
    }

    let cursor = writer.finish().context("Failed to finalize xlsx package")?;
    Ok(cursor.into_inner())
}

/// Parse `(Id, Type, Target)` triples from a relationships part
fn parse_relationships(xml: &[u8]) -> Result<Vec<(String, String, String)>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rels = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .context("Malformed relationships XML")?
        {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attr(&e, b"Id")?.unwrap_or_default();
                let rel_type = attr(&e, b"Type")?.unwrap_or_default();
                let target = attr(&e, b"Target")?.unwrap_or_default();
                let external = attr(&e, b"TargetMode")?.as_deref() == Some("External");
                if !external {
                    rels.push((id, rel_type, target));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// Parse `(name, relationship id)` pairs from `<sheets>` in the workbook part
fn parse_sheet_list(xml: &[u8]) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .context("Malformed workbook XML")?
        {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name")?.unwrap_or_default();
                let mut rel_id = None;
                for a in e.attributes().flatten() {
                    // r:id, with whatever prefix the relationships namespace was bound to
                    if a.key.local_name().as_ref() == b"id" && a.key.prefix().is_some() {
                        rel_id = Some(a.unescape_value()?.into_owned());
                    }
                }
                if let Some(rel_id) = rel_id {
                    sheets.push((name, rel_id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

/// Read an unprefixed attribute as an unescaped string
pub fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes().flatten() {
        if a.key.as_ref() == key {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Split "xl/workbook.xml" into ("xl/", "workbook.xml")
pub(crate) fn split_part(part: &str) -> (&str, &str) {
    match part.rfind('/') {
        Some(idx) => (&part[..=idx], &part[idx + 1..]),
        None => ("", part),
    }
}

/// Resolve a relationship target against the directory of its source part
pub(crate) fn resolve_target(base_dir: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{}{}", base_dir, target),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
