use crate::config::DocumentLocation;
use crate::config::RequestContext;
use crate::error::SheetMarkerError;
use crate::executor::ResolvedSheet;
use crate::executor::WriteExecutor;
use crate::executor::WriteOutcome;
use crate::graph::GraphClient;
use crate::graph::WorksheetInfo;
use crate::planner::WritePlan;
use crate::spreadsheet::value::CellValue;
use crate::spreadsheet::xlsx::XlsxError;
use std::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::warn;

/// Backend that edits a stored document through range-level remote calls.
///
/// The item id and worksheet list are resolved once and cached for the
/// lifetime of the executor, which should not outlive one logical operation.
pub struct LiveExecutor<'a> {
    graph: &'a GraphClient,
    context: RequestContext,
    location: DocumentLocation,
    item_id: Option<String>,
    worksheets: Option<Vec<WorksheetInfo>>,
}

impl<'a> LiveExecutor<'a> {
    pub fn new(graph: &'a GraphClient, context: RequestContext, location: DocumentLocation) -> Self {
        LiveExecutor { graph, context, location, item_id: None, worksheets: None }
    }

    fn item_id(&mut self) -> Result<String, SheetMarkerError> {
        if let Some(item_id) = &self.item_id {
            return Ok(item_id.to_owned());
        }
        let item = self.graph.resolve_item(&self.context, &self.location)?;
        debug!(path = %self.location.path, item_id = %item.id, "Item resolved");
        self.item_id = Some(item.id.to_owned());
        Ok(item.id)
    }

    /// Resolves `(item id, worksheet)` for a sheet name, or the first sheet.
    fn worksheet(&mut self, name: Option<&str>) -> Result<(String, WorksheetInfo), SheetMarkerError> {
        let item_id = self.item_id()?;
        if self.worksheets.is_none() {
            self.worksheets = Some(self.graph.worksheets(&self.context, &self.location, &item_id)?);
        }
        let worksheets = self.worksheets.as_deref().unwrap_or_default();
        let worksheet = match name {
            Some(name) => worksheets
                .iter()
                .find(|worksheet| worksheet.name == name)
                .ok_or_else(|| SheetMarkerError::SheetNotFound(name.to_owned()))?,
            None => worksheets.first().ok_or(XlsxError::EmptyWorkbook)?,
        };
        Ok((item_id, worksheet.clone()))
    }

    fn write_range(&self, item_id: &str, worksheet_id: &str, address: &str, values: &[Vec<CellValue>]) -> Result<(), SheetMarkerError> {
        self.graph.write_range(&self.context, &self.location, item_id, worksheet_id, address, values)?;
        Ok(())
    }

    /// Applies the plan's merges one by one; failures are recorded per range.
    fn apply_merges(&self, item_id: &str, worksheet_id: &str, plan: &WritePlan, outcome: &mut WriteOutcome) {
        for merge in &plan.merges {
            if let Err(error) = self.graph.merge(&self.context, &self.location, item_id, worksheet_id, merge) {
                warn!(section = %plan.section, range = %merge, error = %error, "Merge failed");
                outcome.errors.insert(format!("merge:{merge}"), error.to_string());
            }
        }
    }
}

impl WriteExecutor for LiveExecutor<'_> {
    fn snapshot(&mut self, sheet: Option<&str>) -> Result<ResolvedSheet, SheetMarkerError> {
        let (item_id, worksheet) = self.worksheet(sheet)?;
        let snapshot = self.graph.used_range(&self.context, &self.location, &item_id, &worksheet.id)?;
        Ok(ResolvedSheet { name: worksheet.name, snapshot })
    }

    /// One remote write per supplied field; a failed field does not stop its siblings.
    fn write_record(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut outcome = WriteOutcome::start(plan);
        let (item_id, worksheet) = self.worksheet(Some(plan.sheet.as_str()))?;
        for cell in plan.cells() {
            let value = match cell.value {
                CellValue::Empty => CellValue::Text(String::new()),
                value => value.clone(),
            };
            match self.write_range(&item_id, &worksheet.id, &cell.cell.to_string(), &[vec![value]]) {
                Ok(()) => outcome.cells_affected += 1,
                Err(error) => {
                    warn!(section = %plan.section, field = %cell.field, cell = %cell.cell, error = %error, "Field write failed");
                    outcome.errors.insert(cell.field.to_owned(), error.to_string());
                }
            }
        }
        outcome.rows_affected = usize::from(outcome.cells_affected > 0);
        Ok(outcome.finish(started))
    }

    /// One range write for the whole block, then one merge per template per row.
    fn write_table(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut outcome = WriteOutcome::start(plan);
        if plan.row_count() == 0 {
            return Ok(outcome.finish(started));
        }
        let (item_id, worksheet) = self.worksheet(Some(plan.sheet.as_str()))?;
        match self.write_range(&item_id, &worksheet.id, &plan.local_address(), &plan.dense_values()) {
            Ok(()) => {
                outcome.rows_affected = plan.row_count();
                outcome.cells_affected = plan.row_count() * plan.column_count();
                self.apply_merges(&item_id, &worksheet.id, plan, &mut outcome);
            }
            Err(error) => {
                error!(section = %plan.section, range = %plan.range_address(), error = %error, "Table write failed");
                outcome.errors.insert("data".to_owned(), error.to_string());
            }
        }
        Ok(outcome.finish(started))
    }

    /// Inserts one row per record at a fixed position, writes the block, then merges.
    ///
    /// When insertion fails the block overwrites the target range instead and
    /// the outcome is flagged `degraded`. A failing overwrite is an error.
    fn insert_rows(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut outcome = WriteOutcome::start(plan);
        let rows = plan.row_count();
        if rows == 0 {
            return Ok(outcome.finish(started));
        }
        let (item_id, worksheet) = self.worksheet(Some(plan.sheet.as_str()))?;
        let at = plan.origin.row;

        let mut inserted = 0usize;
        let mut insert_error = None;
        while inserted < rows {
            match self.graph.insert_row(&self.context, &self.location, &item_id, &worksheet.id, at) {
                Ok(_) => inserted += 1,
                Err(error) => {
                    insert_error = Some(error);
                    break;
                }
            }
        }

        let values = plan.dense_values();
        if let Some(error) = insert_error {
            warn!(section = %plan.section, inserted, requested = rows, error = %error, "Row insertion failed, overwriting range");
            self.write_range(&item_id, &worksheet.id, &plan.local_address(), &values)?;
            outcome.degraded = true;
            outcome.errors.insert("insert".to_owned(), format!("{inserted} of {rows} rows inserted: {error}"));
            outcome.rows_affected = rows;
            outcome.cells_affected = rows * plan.column_count();
            return Ok(outcome.finish(started));
        }

        match self.write_range(&item_id, &worksheet.id, &plan.local_address(), &values) {
            Ok(()) => {
                outcome.rows_affected = rows;
                outcome.cells_affected = rows * plan.column_count();
                self.apply_merges(&item_id, &worksheet.id, plan, &mut outcome);
            }
            Err(error) => {
                error!(section = %plan.section, range = %plan.range_address(), error = %error, "Write after insertion failed");
                outcome.errors.insert("data".to_owned(), error.to_string());
            }
        }
        Ok(outcome.finish(started))
    }
}
