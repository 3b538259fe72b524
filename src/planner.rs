//! # Address Planner
//!
//! Pure translation of a section schema, a resolved marker anchor and caller
//! data into absolute write coordinates. Planning never reads the document, so
//! the same snapshot and data always produce the same plan.

use crate::error::SheetMarkerError;
use crate::schema::SectionSchema;
use crate::spreadsheet::reference::qualify;
use crate::spreadsheet::reference::CellRange;
use crate::spreadsheet::reference::CellRef;
use crate::spreadsheet::reference::ReferenceError;
use crate::spreadsheet::reference::MAX_COLUMN;
use crate::spreadsheet::snapshot::MarkerMatch;
use crate::spreadsheet::value::CellValue;
use crate::spreadsheet::value::Record;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

/// Caller data for one section write.
#[derive(Copy, Clone, Debug)]
pub enum PlanData<'a> {
    Record(&'a Record),
    Table(&'a [Record]),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    Record,
    Table,
}

/// Absolute coordinates and values for one section write.
///
/// `values[i][j]` lands on `(origin.row + i, origin.col + j)`. `None` means the
/// caller supplied nothing for that cell.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WritePlan {
    pub section: String,
    pub sheet: String,
    pub mode: PlanMode,
    pub origin: CellRef,
    /// Field key of each matrix column; `None` for unmapped offsets inside the span.
    pub fields: Vec<Option<String>>,
    pub values: Vec<Vec<Option<CellValue>>>,
    /// Merge instructions, applied only after the data write succeeds.
    pub merges: Vec<CellRange>,
}

/// One addressed value of a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedCell<'a> {
    pub field: &'a str,
    pub cell: CellRef,
    pub value: &'a CellValue,
}

/// Computes the write plan of `section` anchored on `anchor`.
///
/// A missing anchor is [`SheetMarkerError::MarkerNotFound`]. An empty table
/// yields a zero-row plan.
pub fn plan(section: &SectionSchema, sheet: &str, anchor: Option<MarkerMatch>, data: PlanData<'_>) -> Result<WritePlan, SheetMarkerError> {
    let anchor = anchor.ok_or_else(|| SheetMarkerError::MarkerNotFound {
        section: section.key.to_owned(),
        marker: section.marker_text.to_owned(),
    })?;
    let (min_offset, max_offset) = section.field_span()
        .ok_or_else(|| SheetMarkerError::SchemaIncomplete(format!("section '{}' has no fields", section.key)))?;

    // Anchor plus offsets may exceed u32.
    let out_of_grid = || ReferenceError::OutOfBoundsError(
        anchor.row.saturating_add(section.row_offset),
        anchor.col.saturating_add(section.column_offset).saturating_add(max_offset),
    );
    let width = max_offset - min_offset + 1;
    if width > MAX_COLUMN {
        Err(out_of_grid())?;
    }
    let mut fields = vec![None; width as usize];
    for field in &section.fields {
        fields[(field.column_offset - min_offset) as usize] = Some(field.field_key.to_owned());
    }

    let records: &[Record] = match data {
        PlanData::Record(record) => std::slice::from_ref(record),
        PlanData::Table(records) => records,
    };
    let values: Vec<Vec<Option<CellValue>>> = records
        .iter()
        .map(|record| plan_row(section, record, &fields))
        .collect();

    let origin_row = anchor.row.checked_add(section.row_offset).ok_or_else(out_of_grid)?;
    let origin_col = anchor.col
        .checked_add(section.column_offset)
        .and_then(|col| col.checked_add(min_offset))
        .ok_or_else(out_of_grid)?;
    let origin = CellRef::new(origin_row, origin_col)?;
    if let Some(rows) = values.len().checked_sub(1) {
        let last_row = u32::try_from(rows).ok().and_then(|rows| origin.row.checked_add(rows)).ok_or_else(out_of_grid)?;
        CellRef::new(last_row, origin.col + width - 1)?;
    }

    let mode = match data {
        PlanData::Record(_) => PlanMode::Record,
        PlanData::Table(_) => PlanMode::Table,
    };
    let merges = match mode {
        PlanMode::Record => Vec::new(),
        PlanMode::Table => (0..values.len() as u32)
            .flat_map(|index| section.merge_spans().iter().map(move |span| span.at_row(origin.row + index)))
            .collect(),
    };

    let plan = WritePlan { section: section.key.to_owned(), sheet: sheet.to_owned(), mode, origin, fields, values, merges };
    debug!(section = %plan.section, range = %plan.range_address(), rows = plan.row_count(), merges = plan.merges.len(), "Write planned");
    Ok(plan)
}

fn plan_row(section: &SectionSchema, record: &Record, fields: &[Option<String>]) -> Vec<Option<CellValue>> {
    for key in record.keys().filter(|key| section.field_schema(key).is_none()) {
        debug!(section = %section.key, field = %key, "Ignoring value without a field mapping");
    }
    fields
        .iter()
        .map(|key| {
            let key = key.as_deref()?;
            let value = record.get(key)?;
            if let Some(field) = section.field_schema(key) {
                if !field.data_type.accepts(value) {
                    warn!(section = %section.key, field = %key, declared = ?field.data_type, value = %value, "Value does not match declared type");
                }
            }
            Some(value.clone())
        })
        .collect()
}

impl WritePlan {
    pub fn row_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    /// True when there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.values.iter().flatten().all(Option::is_none)
    }

    /// Rectangle covered by the plan; a zero-row plan covers its origin only.
    pub fn range(&self) -> CellRange {
        let rows = (self.row_count() as u32).max(1);
        let end = CellRef { row: self.origin.row + rows - 1, col: self.origin.col + self.column_count() as u32 - 1 };
        CellRange::new(self.origin, end)
    }

    /// Worksheet-local address such as `B5:D8`.
    pub fn local_address(&self) -> String {
        self.range().to_string()
    }

    /// Sheet-qualified address such as `Sheet1!B5:D8`.
    pub fn range_address(&self) -> String {
        qualify(&self.sheet, &self.local_address())
    }

    /// Addressed values the caller supplied, in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = PlannedCell<'_>> + '_ {
        self.values.iter().enumerate().flat_map(move |(row, values)| {
            values.iter().enumerate().filter_map(move |(col, value)| {
                Some(PlannedCell {
                    field: self.fields[col].as_deref()?,
                    cell: CellRef { row: self.origin.row + row as u32, col: self.origin.col + col as u32 },
                    value: value.as_ref()?,
                })
            })
        })
    }

    /// Rectangular matrix for whole-range submission: gaps become explicit empty strings.
    pub fn dense_values(&self) -> Vec<Vec<CellValue>> {
        self.values
            .iter()
            .map(|row| {
                row.iter()
                    .map(|value| match value {
                        None | Some(CellValue::Empty) => CellValue::Text(String::new()),
                        Some(value) => value.clone(),
                    })
                    .collect()
            })
            .collect()
    }
}
