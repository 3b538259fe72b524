//! # Marker Engine
//!
//! Ties the pieces together for one template: resolves a section's marker in
//! a sheet snapshot, plans the write and hands the plan to a
//! [`WriteExecutor`]. Every call produces one [`OperationRecord`].

pub mod report;

pub use report::MemoryOperationLogger;
pub use report::OperationKind;
pub use report::OperationLogger;
pub use report::OperationRecord;
pub use report::TracingOperationLogger;

use crate::error::SheetMarkerError;
use crate::executor::InMemoryExecutor;
use crate::executor::WriteExecutor;
use crate::executor::WriteOutcome;
use crate::planner::plan;
use crate::planner::PlanData;
use crate::planner::WritePlan;
use crate::schema::SectionSchema;
use crate::schema::Template;
use crate::spreadsheet::snapshot::MarkerMatch;
use crate::spreadsheet::snapshot::UsedRangeSnapshot;
use crate::spreadsheet::value::CellValue;
use crate::spreadsheet::value::Record;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Data submitted for one section: a JSON object or an array of objects.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SectionData {
    Record(Record),
    Table(Vec<Record>),
}

type WriteStep = fn(&mut dyn WriteExecutor, &WritePlan) -> Result<WriteOutcome, SheetMarkerError>;

pub struct Engine {
    template: Template,
    logger: Arc<dyn OperationLogger>,
    correlation_id: Option<String>,
}

impl Engine {
    pub fn new(template: Template, logger: Arc<dyn OperationLogger>) -> Self {
        Engine { template, logger, correlation_id: None }
    }

    /// Stamps every record produced by this engine with `correlation_id`.
    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_owned());
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Finds the marker of `section_key` in `snapshot`. `None` is not an error.
    pub fn locate(&self, section_key: &str, snapshot: &UsedRangeSnapshot) -> Result<Option<MarkerMatch>, SheetMarkerError> {
        let section = self.template.section(section_key)?;
        Ok(self.search(section, None, snapshot))
    }

    /// Writes one record at the section's anchor.
    pub fn write_section(&self, executor: &mut dyn WriteExecutor, section_key: &str, data: &Record) -> Result<WriteOutcome, SheetMarkerError> {
        self.run(OperationKind::WriteSection, section_key, executor, PlanData::Record(data), |executor, plan| executor.write_record(plan))
    }

    /// Writes rows below a table section's anchor.
    pub fn write_table(&self, executor: &mut dyn WriteExecutor, section_key: &str, rows: &[Record]) -> Result<WriteOutcome, SheetMarkerError> {
        self.run(OperationKind::WriteTable, section_key, executor, PlanData::Table(rows), |executor, plan| executor.write_table(plan))
    }

    /// Inserts one row per record at a table section's start row and fills them.
    ///
    /// Not idempotent: every call inserts rows again.
    pub fn insert_rows(&self, executor: &mut dyn WriteExecutor, section_key: &str, rows: &[Record]) -> Result<WriteOutcome, SheetMarkerError> {
        self.run(OperationKind::InsertRows, section_key, executor, PlanData::Table(rows), |executor, plan| executor.insert_rows(plan))
    }

    /// Writes explicit cell addresses into a loaded document.
    pub fn write_cells(&self, executor: &mut InMemoryExecutor, cells: &BTreeMap<String, CellValue>) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut record = OperationRecord::new(OperationKind::WriteCells, self.correlation_id.as_deref());
        let result = executor.write_cells(cells);
        match &result {
            Ok(outcome) => record.apply(outcome),
            Err(error) => record.fail(error, started),
        }
        self.logger.record(record);
        result
    }

    /// Writes every supplied section in template order.
    ///
    /// Keys without a section are skipped. Table sections accept a single
    /// object as a one-row table. Stops at the first hard error.
    pub fn process(&self, executor: &mut dyn WriteExecutor, data: &BTreeMap<String, SectionData>) -> Result<Vec<(String, WriteOutcome)>, SheetMarkerError> {
        for key in data.keys().filter(|key| self.template.section(key).is_err()) {
            warn!(section = %key, "No section configured for submitted data, skipping");
        }
        let mut outcomes = Vec::new();
        for section in self.template.sections() {
            let Some(section_data) = data.get(&section.key) else {
                continue;
            };
            let outcome = match (section.is_table, section_data) {
                (true, SectionData::Table(rows)) => self.write_table(executor, &section.key, rows)?,
                (true, SectionData::Record(row)) => self.write_table(executor, &section.key, std::slice::from_ref(row))?,
                (false, SectionData::Record(row)) => self.write_section(executor, &section.key, row)?,
                (false, SectionData::Table(_)) => Err(SheetMarkerError::SchemaIncomplete(format!(
                    "section '{}' is not a table but received a list",
                    section.key
                )))?,
            };
            outcomes.push((section.key.to_owned(), outcome));
        }
        info!(sections = outcomes.len(), "Sections processed");
        Ok(outcomes)
    }

    fn run(
        &self,
        kind: OperationKind,
        section_key: &str,
        executor: &mut dyn WriteExecutor,
        data: PlanData<'_>,
        write: WriteStep,
    ) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut record = OperationRecord::new(kind, self.correlation_id.as_deref());
        record.section = Some(section_key.to_owned());
        let result = self.plan_and_write(kind, section_key, executor, data, write, &mut record);
        match &result {
            Ok(outcome) => {
                record.apply(outcome);
                info!(section = %section_key, kind = kind.as_str(), status = ?outcome.status, rows = outcome.rows_affected, cells = outcome.cells_affected, "Section written");
            }
            Err(error) => {
                record.fail(error, started);
                error!(section = %section_key, kind = kind.as_str(), error = %error, "Section write failed");
            }
        }
        self.logger.record(record);
        result
    }

    fn plan_and_write(
        &self,
        kind: OperationKind,
        section_key: &str,
        executor: &mut dyn WriteExecutor,
        data: PlanData<'_>,
        write: WriteStep,
        record: &mut OperationRecord,
    ) -> Result<WriteOutcome, SheetMarkerError> {
        let section = self.template.section(section_key)?;
        if kind != OperationKind::WriteSection && !section.is_table {
            Err(SheetMarkerError::SchemaIncomplete(format!("section '{}' is not a table", section.key)))?;
        }
        let sheet = executor.snapshot(section.sheet_name.as_deref())?;
        let anchor = self.search(section, Some(&sheet.name), &sheet.snapshot);
        record.sheet = Some(sheet.name.to_owned());
        record.marker_text = Some(section.marker_text.to_owned());
        record.marker_found = Some(anchor.is_some());
        record.marker_position = anchor.map(|anchor| anchor.anchor());

        let plan = plan(section, &sheet.name, anchor, data)?;
        write(executor, &plan)
    }

    /// Resolves a marker and records the search.
    fn search(&self, section: &SectionSchema, sheet: Option<&str>, snapshot: &UsedRangeSnapshot) -> Option<MarkerMatch> {
        let started = Instant::now();
        let found = snapshot.find(&section.marker_text);
        let matches = snapshot.count_matches(&section.marker_text);
        if matches > 1 {
            warn!(section = %section.key, marker = %section.marker_text, matches, "Marker matches several cells, using the first");
        }
        match found {
            Some(anchor) => debug!(section = %section.key, marker = %section.marker_text, position = %anchor, "Marker found"),
            None => debug!(section = %section.key, marker = %section.marker_text, "Marker not found"),
        }

        let mut record = OperationRecord::new(OperationKind::SearchMarker, self.correlation_id.as_deref());
        record.section = Some(section.key.to_owned());
        record.sheet = sheet.map(str::to_owned);
        record.marker_text = Some(section.marker_text.to_owned());
        record.marker_found = Some(found.is_some());
        record.marker_position = found.map(|anchor| anchor.anchor());
        record.duration_ms = started.elapsed().as_millis() as u64;
        self.logger.record(record);
        found
    }
}
