use crate::error::ResultMessage;
use crate::error::SheetMarkerError;
use crate::helpers::xml::rewrite_xml;
use crate::helpers::xml::Rewrite;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::zip::Package;
use crate::match_xml_events;
use crate::spreadsheet::reference::CellRange;
use crate::spreadsheet::reference::CellRef;
use crate::spreadsheet::snapshot::UsedRangeSnapshot;
use crate::spreadsheet::value::CellValue;
use crate::spreadsheet::worksheet::read_string_value;
use crate::spreadsheet::worksheet::Worksheet;
use quick_xml::events::Event;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

// Package part names
const PART_WORKBOOK: &str = "xl/workbook.xml";
const PART_WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const PART_SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const PART_CALC_CHAIN: &str = "xl/calcChain.xml";
const PART_CONTENT_TYPES: &str = "[Content_Types].xml";

// XML tag names for the workbook parts
const TAG_SHEET: &[u8] = b"sheet";
const TAG_RELATIONSHIP: &[u8] = b"Relationship";
const TAG_OVERRIDE: &[u8] = b"Override";
const TAG_SHARED_STRING_ITEM: &[u8] = b"si";

/// Errors specific to loading and saving `.xlsx` packages
#[derive(Error, Debug)]
pub enum XlsxError {
    #[error("Package part '{0}' is missing")]
    MissingPart(String),

    #[error("Workbook contains no worksheets")]
    EmptyWorkbook,
}

/// A fully loaded `.xlsx` document held in memory.
///
/// Only the parts touched by cell writes (worksheets, and the calculation chain
/// that becomes stale) are rewritten on save; every other part is written back
/// byte for byte.
pub struct Workbook {
    package: Package,
    /// Worksheets in workbook order, with their package part names.
    sheets: Vec<(Worksheet, String)>,
    shared_strings: Vec<String>,
}

impl Workbook {
    /// Parses an `.xlsx` byte stream.
    pub fn load(bytes: &[u8]) -> Result<Workbook, SheetMarkerError> {
        let package = Package::read(bytes)?;
        let shared_strings = load_shared_strings(&package)?;
        let mut sheets = Vec::new();
        for (name, path) in load_workbook(&package)? {
            let part = package.get(&path)
                .ok_or_else(|| XlsxError::MissingPart(path.to_owned()))?;
            let sheet = Worksheet::parse(&name, &part.data)
                .with_prefix(&format!("Failed to parse worksheet '{name}'"))?;
            sheets.push((sheet, path));
        }
        if sheets.is_empty() {
            Err(XlsxError::EmptyWorkbook)?;
        }
        debug!(sheets = sheets.len(), shared_strings = shared_strings.len(), "Workbook loaded");
        Ok(Workbook { package, sheets, shared_strings })
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|(sheet, _)| sheet.name.as_str()).collect()
    }

    /// Resolves a sheet by name, or the first sheet when `name` is `None`.
    pub(crate) fn sheet(&self, name: Option<&str>) -> Result<&Worksheet, SheetMarkerError> {
        let index = self.sheet_index(name)?;
        Ok(&self.sheets[index].0)
    }

    pub(crate) fn sheet_mut(&mut self, name: Option<&str>) -> Result<&mut Worksheet, SheetMarkerError> {
        let index = self.sheet_index(name)?;
        Ok(&mut self.sheets[index].0)
    }

    fn sheet_index(&self, name: Option<&str>) -> Result<usize, SheetMarkerError> {
        match name {
            None => Ok(0),
            Some(name) => self.sheets
                .iter()
                .position(|(sheet, _)| sheet.name == name)
                .ok_or_else(|| SheetMarkerError::SheetNotFound(name.to_owned())),
        }
    }

    pub fn used_range(&self, sheet: Option<&str>) -> Result<UsedRangeSnapshot, SheetMarkerError> {
        Ok(self.sheet(sheet)?.used_range(&self.shared_strings))
    }

    /// Displayed value of one cell; formulas are reported as their `=` text.
    pub fn value(&self, sheet: Option<&str>, cell: CellRef) -> Result<CellValue, SheetMarkerError> {
        Ok(self.sheet(sheet)?.value(cell.row, cell.col, &self.shared_strings))
    }

    pub fn merges(&self, sheet: Option<&str>) -> Result<Vec<CellRange>, SheetMarkerError> {
        Ok(self.sheet(sheet)?.merges.clone())
    }

    /// Serializes the document, consuming it.
    pub fn save(mut self) -> Result<Vec<u8>, SheetMarkerError> {
        for (sheet, path) in &self.sheets {
            let original = self.package.get(path)
                .ok_or_else(|| XlsxError::MissingPart(path.to_owned()))?;
            let xml = sheet.to_xml(&original.data)?;
            self.package.put(path, xml);
        }
        if self.package.remove(PART_CALC_CHAIN) {
            drop_calc_chain_references(&mut self.package)?;
        }
        self.package.write()
    }
}

/// Reads `(sheet name, part path)` pairs in workbook order.
fn load_workbook(package: &Package) -> Result<Vec<(String, String)>, SheetMarkerError> {
    let relationships = load_relationships(package, PART_WORKBOOK_RELS)?;
    let workbook = package.get(PART_WORKBOOK)
        .ok_or_else(|| XlsxError::MissingPart(PART_WORKBOOK.to_owned()))?;
    let mut reader = XmlReader::new(workbook.data.as_slice());
    let mut sheets = Vec::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_SHEET => {
            let mut name = None::<String>;
            let mut id = None::<String>;
            for result in event.attributes() {
                let attribute = result?;
                let key = attribute.key.local_name();
                if key.as_ref() == b"name" {
                    name = Some(attribute.unescape_value()?.into_owned());
                } else if key.as_ref() == b"id" {
                    id = Some(attribute.unescape_value()?.into_owned());
                }
            }
            if let Some((name, id)) = name.zip(id) {
                if let Some(path) = relationships.get(&id) {
                    sheets.push((name, path.to_owned()));
                }
            }
        }
    });
    Ok(sheets)
}

/// Maps worksheet relationship ids to package part paths.
fn load_relationships(package: &Package, path: &str) -> Result<HashMap<String, String>, SheetMarkerError> {
    let part = package.get(path)
        .ok_or_else(|| XlsxError::MissingPart(path.to_owned()))?;
    let mut reader = XmlReader::new(part.data.as_slice());
    let mut relationships = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.into_owned(), to_zip_path(&target));
                }
            }
        }
    });
    Ok(relationships)
}

fn load_shared_strings(package: &Package) -> Result<Vec<String>, SheetMarkerError> {
    let Some(part) = package.get(PART_SHARED_STRINGS) else {
        return Ok(Vec::new());
    };
    let mut reader = XmlReader::new(part.data.as_slice());
    let mut shared_strings = Vec::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_SHARED_STRING_ITEM => {
            shared_strings.push(read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?);
        }
    });
    Ok(shared_strings)
}

/// Removes the content type override and workbook relationship of a deleted
/// calculation chain, so the application rebuilds it on next open.
fn drop_calc_chain_references(package: &mut Package) -> Result<(), SheetMarkerError> {
    let references = [
        (PART_CONTENT_TYPES, TAG_OVERRIDE, "PartName"),
        (PART_WORKBOOK_RELS, TAG_RELATIONSHIP, "Target"),
    ];
    for (path, tag, attribute) in references {
        let Some(part) = package.get(path) else {
            continue;
        };
        let xml = rewrite_xml(&part.data, |event, _| match event {
            Event::Start(element) | Event::Empty(element) if element.local_name().as_ref() == tag => {
                let points_to_calc_chain = element.get_attribute_value(attribute)?
                    .map(|value| value.ends_with("calcChain.xml"))
                    .unwrap_or(false);
                Ok(if points_to_calc_chain { Rewrite::Skip } else { Rewrite::Keep })
            }
            _ => Ok(Rewrite::Keep),
        })?;
        package.put(path, xml);
    }
    Ok(())
}

/// Normalizes a relationship target to a package part path.
pub(crate) fn to_zip_path(path: &str) -> String {
    if let Some(absolute) = path.strip_prefix('/') {
        absolute.to_owned()
    } else if path.starts_with("xl/") {
        path.to_owned()
    } else {
        format!("xl/{path}")
    }
}
