//! Calculation metadata after formulas are overwritten
//!
//! `xl/calcChain.xml` lists every formula cell. Once a write turns one into a
//! literal the chain is stale and Excel repairs the file on open, so the
//! chain is dropped along with its relationship and content-type override,
//! and the workbook asks for a full calculation on load instead.

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

use super::archive::attr;

const CALC_CHAIN_REL: &str = "/calcChain";

/// Workbook children that come after `<calcPr>`
const AFTER_CALC_PR: &[&[u8]] = &[
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

/// Drop calc chain relationships. Returns the rewritten part and the
/// targets that were removed.
pub fn strip_calc_chain_relationship(xml: &[u8]) -> Result<(Vec<u8>, Vec<String>)> {
    let mut targets = Vec::new();
    let stripped = filter_elements(xml, b"Relationship", |e| {
        let rel_type = attr(e, b"Type")?.unwrap_or_default();
        if !rel_type.ends_with(CALC_CHAIN_REL) {
            return Ok(false);
        }
        targets.push(attr(e, b"Target")?.unwrap_or_default());
        Ok(true)
    })
    .context("Malformed workbook relationships XML")?;
    Ok((stripped, targets))
}

/// Drop the `[Content_Types].xml` override for `part` (e.g. "xl/calcChain.xml")
pub fn strip_content_type_override(xml: &[u8], part: &str) -> Result<Vec<u8>> {
    let wanted = format!("/{}", part.trim_start_matches('/'));
    filter_elements(xml, b"Override", |e| {
        Ok(attr(e, b"PartName")?.as_deref() == Some(wanted.as_str()))
    })
    .context("Malformed content types XML")
}

/// Set `fullCalcOnLoad="1"` on `<calcPr>`, adding the element when missing
pub fn force_full_calc_on_load(xml: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 32));
    let mut buf = Vec::new();
    let mut done = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .context("Malformed workbook XML")?;
        match event {
            Event::Eof => break,
            Event::Empty(e) if e.local_name().as_ref() == b"calcPr" => {
                writer.write_event(Event::Empty(with_full_calc(&e)))?;
                done = true;
            }
            Event::Start(e) if e.local_name().as_ref() == b"calcPr" => {
                writer.write_event(Event::Start(with_full_calc(&e)))?;
                done = true;
            }
            Event::Start(e) if !done && follows_calc_pr(&e) => {
                writer.write_event(Event::Empty(new_calc_pr(e.name())))?;
                writer.write_event(Event::Start(e))?;
                done = true;
            }
            Event::Empty(e) if !done && follows_calc_pr(&e) => {
                writer.write_event(Event::Empty(new_calc_pr(e.name())))?;
                writer.write_event(Event::Empty(e))?;
                done = true;
            }
            Event::End(e) if !done && e.local_name().as_ref() == b"workbook" => {
                writer.write_event(Event::Empty(new_calc_pr(e.name())))?;
                writer.write_event(Event::End(e))?;
                done = true;
            }
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn follows_calc_pr(e: &BytesStart<'_>) -> bool {
    let local = e.local_name();
    AFTER_CALC_PR.iter().any(|name| *name == local.as_ref())
}

fn with_full_calc(e: &BytesStart<'_>) -> BytesStart<'static> {
    let mut calc_pr = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes().flatten() {
        if a.key.as_ref() != b"fullCalcOnLoad" {
            calc_pr.push_attribute(a);
        }
    }
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    calc_pr
}

/// `<calcPr fullCalcOnLoad="1"/>` in the namespace prefix of `sibling`
fn new_calc_pr(sibling: QName<'_>) -> BytesStart<'static> {
    let name = match sibling.prefix() {
        Some(prefix) => format!("{}:calcPr", String::from_utf8_lossy(prefix.as_ref())),
        None => "calcPr".to_string(),
    };
    let mut calc_pr = BytesStart::new(name);
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    calc_pr
}

/// Copy `xml`, leaving out `local` elements for which `remove` says so
fn filter_elements<F>(xml: &[u8], local: &[u8], mut remove: F) -> Result<Vec<u8>>
where
    F: FnMut(&BytesStart<'_>) -> Result<bool>,
{
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Empty(e) if e.local_name().as_ref() == local => {
                if !remove(&e)? {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Start(e) if e.local_name().as_ref() == local => {
                if remove(&e)? {
                    let name = e.name().as_ref().to_vec();
                    reader.read_to_end_into(QName(&name), &mut skip_buf)?;
                    skip_buf.clear();
                } else {
                    writer.write_event(Event::Start(e))?;
                }
            }
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/></Relationships>"#;

    #[test]
    fn test_strip_calc_chain_relationship() {
        let (out, targets) = strip_calc_chain_relationship(RELS.as_bytes()).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(targets, vec!["calcChain.xml"]);
        assert!(!out.contains("calcChain"), "{}", out);
        assert!(out.contains(r#"Target="worksheets/sheet1.xml"/></Relationships>"#));
    }

    #[test]
    fn test_rels_without_calc_chain_are_unchanged() {
        let xml = br#"<Relationships><Relationship Id="rId1" Type="x/worksheet" Target="a.xml"/></Relationships>"#;
        let (out, targets) = strip_calc_chain_relationship(xml).unwrap();
        assert!(targets.is_empty());
        assert_eq!(out, xml.to_vec());
    }

    #[test]
    fn test_strip_content_type_override() {
        let xml = br#"<Types><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="a"/><Override PartName="/xl/calcChain.xml" ContentType="b"/></Types>"#;
        let out = String::from_utf8(strip_content_type_override(xml, "xl/calcChain.xml").unwrap()).unwrap();
        assert_eq!(
            out,
            r#"<Types><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="a"/></Types>"#
        );
    }

    #[test]
    fn test_full_calc_on_existing_calc_pr() {
        let xml = br#"<workbook><sheets/><calcPr calcId="124519" fullCalcOnLoad="0"/></workbook>"#;
        let out = String::from_utf8(force_full_calc_on_load(xml).unwrap()).unwrap();
        assert_eq!(
            out,
            r#"<workbook><sheets/><calcPr calcId="124519" fullCalcOnLoad="1"/></workbook>"#
        );
    }

    #[test]
    fn test_full_calc_inserted_in_schema_order() {
        let xml = br#"<x:workbook xmlns:x="urn:x"><x:sheets/><x:extLst/></x:workbook>"#;
        let out = String::from_utf8(force_full_calc_on_load(xml).unwrap()).unwrap();
        assert_eq!(
            out,
            r#"<x:workbook xmlns:x="urn:x"><x:sheets/><x:calcPr fullCalcOnLoad="1"/><x:extLst/></x:workbook>"#
        );

        let xml = br#"<workbook><sheets/></workbook>"#;
        let out = String::from_utf8(force_full_calc_on_load(xml).unwrap()).unwrap();
        assert_eq!(out, r#"<workbook><sheets/><calcPr fullCalcOnLoad="1"/></workbook>"#);
    }
}
