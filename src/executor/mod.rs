//! # Write Executors
//!
//! Two interchangeable backends consume a [`WritePlan`]: [`InMemoryExecutor`]
//! mutates a loaded `.xlsx` document, [`LiveExecutor`] issues range edits to
//! the remote workbook service without downloading the document.

pub mod live;
pub mod memory;

pub use live::LiveExecutor;
pub use memory::InMemoryExecutor;

use crate::error::SheetMarkerError;
use crate::planner::WritePlan;
use crate::spreadsheet::snapshot::UsedRangeSnapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

/// A sheet resolved by an executor, with its populated cells.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSheet {
    pub name: String,
    pub snapshot: UsedRangeSnapshot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Partial,
    Error,
}

/// Result of one section write. Partial failures are reported here, never raised.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub status: OutcomeStatus,
    pub range_address: Option<String>,
    pub cells_affected: usize,
    pub rows_affected: usize,
    /// Failure message per field key, `"data"`, `"insert"` or `"merge:<range>"`.
    pub errors: BTreeMap<String, String>,
    /// Set when rows could not be inserted and the range was overwritten instead.
    pub degraded: bool,
    pub duration_ms: u64,
}

impl WriteOutcome {
    pub(crate) fn start(plan: &WritePlan) -> Self {
        WriteOutcome::new(Some(plan.range_address()))
    }

    pub(crate) fn new(range_address: Option<String>) -> Self {
        WriteOutcome {
            status: OutcomeStatus::Success,
            range_address,
            cells_affected: 0,
            rows_affected: 0,
            errors: BTreeMap::new(),
            degraded: false,
            duration_ms: 0,
        }
    }

    /// Derives the status: clean runs succeed, failures with some data written are partial.
    pub(crate) fn finish(mut self, started: Instant) -> Self {
        self.status = match (self.errors.is_empty(), self.cells_affected) {
            (true, _) => OutcomeStatus::Success,
            (false, 0) => OutcomeStatus::Error,
            (false, _) => OutcomeStatus::Partial,
        };
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Capability shared by both backends.
///
/// Configuration faults (unknown sheet) are returned as errors; per-cell and
/// per-step remote failures are folded into the [`WriteOutcome`].
pub trait WriteExecutor {
    /// Resolves `sheet` (the first sheet when `None`) and captures its used range.
    fn snapshot(&mut self, sheet: Option<&str>) -> Result<ResolvedSheet, SheetMarkerError>;

    /// Writes each supplied value of a single-record plan.
    fn write_record(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError>;

    /// Writes a table plan into the rows below its anchor, then applies merges.
    fn write_table(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError>;

    /// Inserts one row per record at the plan origin, writes the data, then applies merges.
    fn insert_rows(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanMode;
    use crate::spreadsheet::reference::CellRef;

    fn plan() -> WritePlan {
        WritePlan {
            section: "pagos".into(),
            sheet: "Hoja1".into(),
            mode: PlanMode::Table,
            origin: CellRef { row: 5, col: 1 },
            fields: vec![Some("a".into())],
            values: vec![vec![None]],
            merges: Vec::new(),
        }
    }

    #[test]
    fn status_follows_errors_and_written_cells() {
        let started = Instant::now();
        assert_eq!(WriteOutcome::start(&plan()).finish(started).status, OutcomeStatus::Success);

        let mut failed = WriteOutcome::start(&plan());
        failed.errors.insert("data".into(), "boom".into());
        assert_eq!(failed.clone().finish(started).status, OutcomeStatus::Error);

        failed.cells_affected = 3;
        let partial = failed.finish(started);
        assert_eq!(partial.status, OutcomeStatus::Partial);
        assert_eq!(partial.range_address.as_deref(), Some("Hoja1!A5"));
    }
}
