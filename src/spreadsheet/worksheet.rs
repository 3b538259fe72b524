use crate::error::SheetMarkerError;
use crate::helpers::xml::name_prefix;
use crate::helpers::xml::rewrite_xml;
use crate::helpers::xml::Rewrite;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::match_xml_events;
use crate::spreadsheet::reference::CellRange;
use crate::spreadsheet::reference::CellRef;
use crate::spreadsheet::reference::MAX_ROW;
use crate::spreadsheet::snapshot::UsedRangeSnapshot;
use crate::spreadsheet::value::CellValue;
use quick_xml::events::BytesEnd;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::io::BufRead;
use tracing::debug;
use tracing::warn;

// XML tag names for SpreadsheetML worksheets
const TAG_WORKSHEET: &[u8] = b"worksheet";
const TAG_DIMENSION: &[u8] = b"dimension";
const TAG_SHEET_DATA: &[u8] = b"sheetData";
const TAG_ROW: &[u8] = b"row";
const TAG_CELL: &[u8] = b"c";
const TAG_FORMULA: &[u8] = b"f";
const TAG_VALUE: &[u8] = b"v";
const TAG_INLINE_STRING: &[u8] = b"is";
const TAG_TEXT: &[u8] = b"t";
const TAG_PHONETIC_TEXT: &[u8] = b"rPh";
const TAG_MERGE_CELLS: &[u8] = b"mergeCells";
const TAG_MERGE_CELL: &[u8] = b"mergeCell";

/// Elements that must follow `<mergeCells>` in a worksheet.
fn follows_merge_cells(name: &[u8]) -> bool {
    matches!(
        name,
        b"phoneticPr"
            | b"conditionalFormatting"
            | b"dataValidations"
            | b"hyperlinks"
            | b"printOptions"
            | b"pageMargins"
            | b"pageSetup"
            | b"headerFooter"
            | b"rowBreaks"
            | b"colBreaks"
            | b"customProperties"
            | b"cellWatches"
            | b"ignoredErrors"
            | b"smartTags"
            | b"drawing"
            | b"legacyDrawing"
            | b"legacyDrawingHF"
            | b"drawingHF"
            | b"picture"
            | b"oleObjects"
            | b"controls"
            | b"webPublishItems"
            | b"tableParts"
            | b"extLst"
    )
}

/// Moves `range` below `count` rows inserted at `at`, or grows it when it spans `at`.
fn shift_range(range: &mut CellRange, at: u32, count: u32) {
    if range.start.row >= at {
        range.start.row = range.start.row.saturating_add(count).min(MAX_ROW);
        range.end.row = range.end.row.saturating_add(count).min(MAX_ROW);
    } else if range.end.row >= at {
        range.end.row = range.end.row.saturating_add(count).min(MAX_ROW);
    }
}

/// Stored content of one `<c>` element.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum CellContent {
    #[default]
    Empty,
    /// A `<v>` value with its `t` attribute (`None` for plain numbers).
    Value { kind: Option<String>, raw: String },
    Inline(String),
    /// A formula without the leading `=`, with any cached result.
    Formula {
        formula: String,
        attributes: Vec<(String, String)>,
        kind: Option<String>,
        cached: Option<String>,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SheetCell {
    /// Index into the workbook's cell formats; carries font, border, fill and alignment.
    pub(crate) style: Option<String>,
    pub(crate) content: CellContent,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SheetRow {
    /// Row attributes other than `r` and `spans` (height, row style...).
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) cells: BTreeMap<u32, SheetCell>,
}

/// Mutable in-memory model of one worksheet part.
#[derive(Clone, Debug, Default)]
pub(crate) struct Worksheet {
    pub(crate) name: String,
    pub(crate) rows: BTreeMap<u32, SheetRow>,
    pub(crate) merges: Vec<CellRange>,
}

impl Worksheet {
    /// Parses the cell grid and merged regions of a worksheet part.
    pub(crate) fn parse(name: &str, xml: &[u8]) -> Result<Worksheet, SheetMarkerError> {
        let mut sheet = Worksheet { name: name.to_owned(), ..Default::default() };
        let mut reader = XmlReader::new(xml);
        let mut row = 0u32;
        let mut col = 0u32;
        let mut kind = None::<String>;
        let mut style = None::<String>;
        let mut formula = None::<(String, Vec<(String, String)>)>;
        let mut value = None::<String>;
        let mut inline = None::<String>;
        match_xml_events!(reader => {
            Event::Start(event) if event.local_name().as_ref() == TAG_ROW => {
                row = match event.get_attribute_value("r")? {
                    Some(reference) => reference.parse::<u32>()?,
                    None => row + 1,
                };
                col = 0;
                let attributes = event.attributes_except(&["r", "spans"])?;
                sheet.rows.entry(row).or_default().attributes = attributes;
            }
            Event::Start(event) if event.local_name().as_ref() == TAG_CELL => {
                col = match event.get_attribute_value("r")? {
                    Some(reference) => CellRef::parse(&reference)?.col,
                    None => col + 1,
                };
                kind = event.get_attribute_value("t")?.map(|t| t.into_owned());
                style = event.get_attribute_value("s")?.map(|s| s.into_owned());
                formula = None;
                value = None;
                inline = None;
            }
            Event::Start(event) if event.local_name().as_ref() == TAG_FORMULA => {
                let attributes = event.attributes_except(&[])?;
                let text = read_string_value(&mut reader, TAG_FORMULA, true)?;
                formula = Some((text, attributes));
            }
            Event::Start(event) if event.local_name().as_ref() == TAG_VALUE => {
                value = Some(read_string_value(&mut reader, TAG_VALUE, true)?);
            }
            Event::Start(event) if event.local_name().as_ref() == TAG_INLINE_STRING => {
                inline = Some(read_string_value(&mut reader, TAG_INLINE_STRING, false)?);
            }
            Event::End(event) if event.local_name().as_ref() == TAG_CELL => {
                let content = match (formula.take(), value.take(), inline.take()) {
                    (Some((formula, attributes)), cached, _) => CellContent::Formula { formula, attributes, kind: kind.take(), cached },
                    (None, _, Some(text)) => CellContent::Inline(text),
                    (None, Some(raw), None) => CellContent::Value { kind: kind.take(), raw },
                    (None, None, None) => CellContent::Empty,
                };
                let cell = SheetCell { style: style.take(), content };
                sheet.rows.entry(row).or_default().cells.insert(col, cell);
            }
            Event::Start(event) if event.local_name().as_ref() == TAG_MERGE_CELL => {
                if let Some(reference) = event.get_attribute_value("ref")? {
                    sheet.merges.push(CellRange::parse(&reference)?);
                }
            }
        });
        Ok(sheet)
    }

    /// Displayed value of a cell; shared strings are resolved through `shared_strings`.
    pub(crate) fn value(&self, row: u32, col: u32, shared_strings: &[String]) -> CellValue {
        let content = match self.rows.get(&row).and_then(|cells| cells.cells.get(&col)) {
            Some(cell) => &cell.content,
            None => return CellValue::Empty,
        };
        match content {
            CellContent::Empty => CellValue::Empty,
            CellContent::Inline(text) => CellValue::Text(text.to_owned()),
            CellContent::Formula { formula, .. } => CellValue::Text(format!("={formula}")),
            CellContent::Value { kind, raw } => match kind.as_deref() {
                Some("s") => raw
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| shared_strings.get(index))
                    .map(|text| CellValue::Text(text.to_owned()))
                    .unwrap_or(CellValue::Empty),
                Some("b") => CellValue::Bool(raw == "1"),
                None | Some("n") => raw
                    .parse::<f64>()
                    .map(CellValue::Number)
                    .unwrap_or_else(|_| CellValue::Text(raw.to_owned())),
                Some(_) => CellValue::Text(raw.to_owned()),
            },
        }
    }

    /// Merged region containing the coordinate, if any.
    pub(crate) fn merge_at(&self, row: u32, col: u32) -> Option<CellRange> {
        self.merges.iter().find(|merge| merge.contains(row, col)).copied()
    }

    /// Writes a value, redirecting to the anchor of a merged region. Returns the cell written.
    pub(crate) fn set_value(&mut self, target: CellRef, value: &CellValue) -> CellRef {
        let cell = match self.merge_at(target.row, target.col) {
            Some(merge) if merge.start != target => {
                warn!(sheet = %self.name, requested = %target, anchor = %merge.start, "Write redirected to merged region anchor");
                merge.start
            }
            _ => target,
        };
        let content = match value {
            CellValue::Empty => CellContent::Empty,
            CellValue::Bool(flag) => CellContent::Value { kind: Some("b".to_owned()), raw: if *flag { "1" } else { "0" }.to_owned() },
            CellValue::Number(number) => CellContent::Value { kind: None, raw: number.to_string() },
            CellValue::Text(text) => match value.formula() {
                Some(formula) => CellContent::Formula { formula: formula.to_owned(), attributes: Vec::new(), kind: None, cached: None },
                None => CellContent::Inline(text.to_owned()),
            },
        };
        let row = self.rows.entry(cell.row).or_default();
        match row.cells.get_mut(&cell.col) {
            Some(existing) => existing.content = content,
            None if content != CellContent::Empty => {
                row.cells.insert(cell.col, SheetCell { style: None, content });
            }
            None => (),
        }
        cell
    }

    /// Inserts `count` blank rows before row `at`, shifting rows, merged regions
    /// and shared or array formula `ref` ranges down.
    ///
    /// Ranges starting at or below `at` move; ranges spanning it grow.
    /// Formula text itself is not adjusted.
    pub(crate) fn insert_rows(&mut self, at: u32, count: u32) {
        if count == 0 {
            return;
        }
        let rows = std::mem::take(&mut self.rows);
        self.rows = rows
            .into_iter()
            .filter_map(|(number, row)| match number {
                _ if number < at => Some((number, row)),
                _ if number.saturating_add(count) <= MAX_ROW => Some((number + count, row)),
                _ => None,
            })
            .collect();
        for merge in &mut self.merges {
            shift_range(merge, at, count);
        }
        let formulas = self
            .rows
            .values_mut()
            .flat_map(|row| row.cells.values_mut())
            .filter_map(|cell| match &mut cell.content {
                CellContent::Formula { attributes, .. } => Some(attributes),
                _ => None,
            });
        for attributes in formulas {
            for (key, value) in attributes.iter_mut().filter(|(key, _)| key == "ref") {
                match CellRange::parse(value) {
                    Ok(mut range) => {
                        shift_range(&mut range, at, count);
                        *value = range.to_string();
                    }
                    Err(error) => warn!(sheet = %self.name, attribute = %key, error = %error, "Formula range left unchanged"),
                }
            }
        }
        debug!(sheet = %self.name, at, count, "Rows inserted");
    }

    /// Copies row attributes and per-cell styles from one row onto another,
    /// replicating single-row merged regions of the source row.
    pub(crate) fn copy_row_layout(&mut self, from: u32, to: u32) {
        let Some(source) = self.rows.get(&from).cloned() else {
            return;
        };
        let target = self.rows.entry(to).or_default();
        target.attributes = source.attributes;
        for (col, cell) in source.cells {
            if let Some(style) = cell.style {
                target.cells.entry(col).or_default().style = Some(style);
            }
        }
        let row_merges: Vec<CellRange> = self.merges
            .iter()
            .filter(|merge| merge.start.row == from && merge.end.row == from)
            .copied()
            .collect();
        for merge in row_merges {
            self.add_merge(CellRange {
                start: CellRef { row: to, col: merge.start.col },
                end: CellRef { row: to, col: merge.end.col },
            });
        }
    }

    /// Adds a merged region unless it already exists or would overlap another one.
    pub(crate) fn add_merge(&mut self, range: CellRange) -> bool {
        if range.is_single() || self.merges.contains(&range) {
            return false;
        }
        if let Some(existing) = self.merges.iter().find(|merge| merge.intersects(&range)) {
            warn!(sheet = %self.name, requested = %range, existing = %existing, "Merge skipped, overlaps an existing merged region");
            return false;
        }
        self.merges.push(range);
        true
    }

    /// Minimal rectangle holding every non-empty cell, as a 0-based origin plus value grid.
    pub(crate) fn used_range(&self, shared_strings: &[String]) -> UsedRangeSnapshot {
        let mut bounds = None::<(u32, u32, u32, u32)>;
        for (row_number, row) in &self.rows {
            for col in row.cells.keys() {
                if self.value(*row_number, *col, shared_strings).is_empty() {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (*row_number, *row_number, *col, *col),
                    Some((top, bottom, left, right)) => (top.min(*row_number), bottom.max(*row_number), left.min(*col), right.max(*col)),
                });
            }
        }
        let Some((top, bottom, left, right)) = bounds else {
            return UsedRangeSnapshot::default();
        };
        let values = (top..=bottom)
            .map(|row| (left..=right).map(|col| self.value(row, col, shared_strings)).collect())
            .collect();
        UsedRangeSnapshot::new(top - 1, left - 1, values)
    }

    /// Range spanning every stored cell, for the `<dimension>` element.
    fn dimension(&self) -> CellRange {
        let mut cells = self.rows
            .iter()
            .flat_map(|(row, cells)| cells.cells.keys().map(move |col| CellRef { row: *row, col: *col }));
        let Some(first) = cells.next() else {
            return CellRange::single(CellRef { row: 1, col: 1 });
        };
        cells.fold(CellRange::single(first), |range, cell| CellRange::new(
            CellRef { row: range.start.row.min(cell.row), col: range.start.col.min(cell.col) },
            CellRef { row: range.end.row.max(cell.row), col: range.end.col.max(cell.col) },
        ))
    }

    /// Re-serializes the worksheet part, replacing `<dimension>`, `<sheetData>` and
    /// `<mergeCells>` while keeping every other element of `original` as-is.
    pub(crate) fn to_xml(&self, original: &[u8]) -> Result<Vec<u8>, SheetMarkerError> {
        let mut prefix = String::new();
        let mut merges_written = false;
        rewrite_xml(original, |event, writer| {
            match event {
                Event::Start(element) | Event::Empty(element) => {
                    let local_name = element.local_name();
                    match local_name.as_ref() {
                        TAG_WORKSHEET => prefix = name_prefix(element.name().as_ref()),
                        TAG_DIMENSION => {
                            let mut dimension = BytesStart::new(format!("{prefix}dimension"));
                            dimension.push_attribute(("ref", self.dimension().to_string().as_str()));
                            writer.write_event(Event::Empty(dimension))?;
                            return Ok(Rewrite::Skip);
                        }
                        TAG_SHEET_DATA => {
                            self.write_sheet_data(writer, &prefix)?;
                            return Ok(Rewrite::Skip);
                        }
                        TAG_MERGE_CELLS => {
                            if !merges_written {
                                self.write_merges(writer, &prefix)?;
                                merges_written = true;
                            }
                            return Ok(Rewrite::Skip);
                        }
                        name if !merges_written && follows_merge_cells(name) => {
                            self.write_merges(writer, &prefix)?;
                            merges_written = true;
                        }
                        _ => (),
                    }
                }
                Event::End(element) if element.local_name().as_ref() == TAG_WORKSHEET && !merges_written => {
                    self.write_merges(writer, &prefix)?;
                    merges_written = true;
                }
                _ => (),
            }
            Ok(Rewrite::Keep)
        })
    }

    fn write_sheet_data(&self, writer: &mut Writer<Vec<u8>>, prefix: &str) -> Result<(), SheetMarkerError> {
        let tag = format!("{prefix}sheetData");
        writer.write_event(Event::Start(BytesStart::new(tag.as_str())))?;
        for (number, row) in &self.rows {
            if row.cells.is_empty() && row.attributes.is_empty() {
                continue;
            }
            let row_tag = format!("{prefix}row");
            let mut element = BytesStart::new(row_tag.as_str());
            element.push_attribute(("r", number.to_string().as_str()));
            for (key, value) in &row.attributes {
                element.push_attribute((key.as_str(), value.as_str()));
            }
            writer.write_event(Event::Start(element))?;
            for (col, cell) in &row.cells {
                write_cell(writer, prefix, CellRef { row: *number, col: *col }, cell)?;
            }
            writer.write_event(Event::End(BytesEnd::new(row_tag.as_str())))?;
        }
        writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
        Ok(())
    }

    fn write_merges(&self, writer: &mut Writer<Vec<u8>>, prefix: &str) -> Result<(), SheetMarkerError> {
        if self.merges.is_empty() {
            return Ok(());
        }
        let tag = format!("{prefix}mergeCells");
        let mut start = BytesStart::new(tag.as_str());
        start.push_attribute(("count", self.merges.len().to_string().as_str()));
        writer.write_event(Event::Start(start))?;
        for merge in &self.merges {
            let mut element = BytesStart::new(format!("{prefix}mergeCell"));
            element.push_attribute(("ref", merge.to_string().as_str()));
            writer.write_event(Event::Empty(element))?;
        }
        writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
        Ok(())
    }
}

fn write_cell(writer: &mut Writer<Vec<u8>>, prefix: &str, reference: CellRef, cell: &SheetCell) -> Result<(), SheetMarkerError> {
    if cell.style.is_none() && cell.content == CellContent::Empty {
        return Ok(());
    }
    let tag = format!("{prefix}c");
    let mut element = BytesStart::new(tag.as_str());
    element.push_attribute(("r", reference.to_string().as_str()));
    if let Some(style) = &cell.style {
        element.push_attribute(("s", style.as_str()));
    }
    match &cell.content {
        CellContent::Empty => {
            writer.write_event(Event::Empty(element))?;
            return Ok(());
        }
        CellContent::Value { kind, .. } | CellContent::Formula { kind, .. } => {
            if let Some(kind) = kind {
                element.push_attribute(("t", kind.as_str()));
            }
        }
        CellContent::Inline(_) => element.push_attribute(("t", "inlineStr")),
    }
    writer.write_event(Event::Start(element))?;
    match &cell.content {
        CellContent::Value { raw, .. } => write_text_element(writer, &format!("{prefix}v"), &[], raw)?,
        CellContent::Inline(text) => {
            let is_tag = format!("{prefix}is");
            writer.write_event(Event::Start(BytesStart::new(is_tag.as_str())))?;
            write_text_element(writer, &format!("{prefix}t"), &[("xml:space", "preserve")], text)?;
            writer.write_event(Event::End(BytesEnd::new(is_tag.as_str())))?;
        }
        CellContent::Formula { formula, attributes, cached, .. } => {
            let attributes: Vec<(&str, &str)> = attributes.iter().map(|(key, value)| (key.as_str(), value.as_str())).collect();
            write_text_element(writer, &format!("{prefix}f"), &attributes, formula)?;
            if let Some(cached) = cached {
                write_text_element(writer, &format!("{prefix}v"), &[], cached)?;
            }
        }
        CellContent::Empty => (),
    }
    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, attributes: &[(&str, &str)], text: &str) -> Result<(), SheetMarkerError> {
    let mut element = BytesStart::new(tag);
    for attribute in attributes {
        element.push_attribute(*attribute);
    }
    writer.write_event(Event::Start(element))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Reads string content up to `end_tag`, skipping phonetic runs.
///
/// With `is_text_content` every text node counts, otherwise only `<t>` runs do
/// (rich text inside `<si>` / `<is>`).
pub(crate) fn read_string_value<R: BufRead>(
    reader: &mut XmlReader<R>,
    end_tag: &[u8],
    is_text_content: bool,
) -> Result<String, SheetMarkerError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.local_name().as_ref() == end_tag => break,
        Event::Start(event) if event.local_name().as_ref() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.local_name().as_ref() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.local_name().as_ref() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && !is_text_content && event.local_name().as_ref() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text && !is_phonetic_text => text.push_str(&event.xml_content()?),
        Event::CData(event) if is_text && !is_phonetic_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text && !is_phonetic_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}
