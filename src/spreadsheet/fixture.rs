//! In-memory `.xlsx` packages for tests.

use anyhow::Result;
use std::io::Cursor;
use std::io::Write;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub(crate) const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/></font><font><b/><sz val="11"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="2"><border/><border><bottom style="thin"/></border></borders><cellXfs count="3"><xf fontId="0" fillId="0" borderId="0"/><xf fontId="1" fillId="0" borderId="0" applyFont="1"/><xf fontId="0" fillId="0" borderId="1" applyBorder="1"/></cellXfs></styleSheet>"#;

/// One worksheet: name, `<sheetData>` content and merged ranges.
pub(crate) type SheetSource<'a> = (&'a str, &'a str, &'a [&'a str]);

pub(crate) fn workbook(sheets: &[(&str, &str)], shared_strings: &[&str]) -> Vec<u8> {
    let sheets: Vec<SheetSource> = sheets.iter().map(|(name, rows)| (*name, *rows, &[][..])).collect();
    build(&sheets, shared_strings, false).expect("fixture workbook")
}

pub(crate) fn workbook_with_merges(sheets: &[SheetSource], shared_strings: &[&str]) -> Vec<u8> {
    build(sheets, shared_strings, false).expect("fixture workbook")
}

pub(crate) fn workbook_with_calc_chain(sheets: &[(&str, &str)], shared_strings: &[&str]) -> Vec<u8> {
    let sheets: Vec<SheetSource> = sheets.iter().map(|(name, rows)| (*name, *rows, &[][..])).collect();
    build(&sheets, shared_strings, true).expect("fixture workbook")
}

fn build(sheets: &[SheetSource], shared_strings: &[&str], calc_chain: bool) -> Result<Vec<u8>> {
    let mut content_types = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#);
    let mut workbook = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#);
    let mut relationships = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rIdStyles" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#);
    let mut parts = Vec::<(String, String)>::new();

    for (index, (name, rows, merges)) in sheets.iter().enumerate() {
        let number = index + 1;
        content_types.push_str(&format!(r#"<Override PartName="/xl/worksheets/sheet{number}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#));
        workbook.push_str(&format!(r#"<sheet name="{name}" sheetId="{number}" r:id="rId{number}"/>"#));
        relationships.push_str(&format!(r#"<Relationship Id="rId{number}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{number}.xml"/>"#));
        let merge_cells = match merges.len() {
            0 => String::new(),
            count => format!(
                r#"<mergeCells count="{count}">{}</mergeCells>"#,
                merges.iter().map(|merge| format!(r#"<mergeCell ref="{merge}"/>"#)).collect::<String>(),
            ),
        };
        parts.push((
            format!("xl/worksheets/sheet{number}.xml"),
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><sheetData>{rows}</sheetData>{merge_cells}<pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#),
        ));
    }

    if !shared_strings.is_empty() {
        content_types.push_str(r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#);
        relationships.push_str(r#"<Relationship Id="rIdStrings" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#);
        let items: String = shared_strings.iter().map(|text| format!("<si><t>{text}</t></si>")).collect();
        parts.push((
            "xl/sharedStrings.xml".to_owned(),
            format!(r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">{items}</sst>"#, shared_strings.len()),
        ));
    }

    if calc_chain {
        content_types.push_str(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#);
        relationships.push_str(r#"<Relationship Id="rIdCalc" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#);
        parts.push((
            "xl/calcChain.xml".to_owned(),
            r#"<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="A1" i="1"/></calcChain>"#.to_owned(),
        ));
    }

    content_types.push_str("</Types>");
    workbook.push_str("</sheets></workbook>");
    relationships.push_str("</Relationships>");

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let root_relationships = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;
    let fixed = [
        ("[Content_Types].xml", content_types.as_str()),
        ("_rels/.rels", root_relationships),
        ("xl/workbook.xml", workbook.as_str()),
        ("xl/_rels/workbook.xml.rels", relationships.as_str()),
        ("xl/styles.xml", STYLES),
    ];
    for (name, data) in fixed {
        writer.start_file(name, options)?;
        writer.write_all(data.as_bytes())?;
    }
    for (name, data) in &parts {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(data.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}
