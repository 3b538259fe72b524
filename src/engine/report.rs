use crate::error::SheetMarkerError;
use crate::executor::OutcomeStatus;
use crate::executor::WriteOutcome;
use crate::spreadsheet::reference::CellRef;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Instant;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    SearchMarker,
    WriteSection,
    WriteTable,
    InsertRows,
    WriteCells,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::SearchMarker => "search_marker",
            OperationKind::WriteSection => "write_section",
            OperationKind::WriteTable => "write_table",
            OperationKind::InsertRows => "insert_rows",
            OperationKind::WriteCells => "write_cells",
        }
    }
}

/// One audit entry per engine call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OperationRecord {
    pub operation_id: Uuid,
    pub correlation_id: Option<String>,
    pub kind: OperationKind,
    pub section: Option<String>,
    pub sheet: Option<String>,
    pub marker_text: Option<String>,
    pub marker_found: Option<bool>,
    pub marker_position: Option<CellRef>,
    pub range_address: Option<String>,
    pub rows_affected: usize,
    pub cells_affected: usize,
    pub status: OutcomeStatus,
    pub degraded: bool,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(kind: OperationKind, correlation_id: Option<&str>) -> Self {
        OperationRecord {
            operation_id: Uuid::new_v4(),
            correlation_id: correlation_id.map(str::to_owned),
            kind,
            section: None,
            sheet: None,
            marker_text: None,
            marker_found: None,
            marker_position: None,
            range_address: None,
            rows_affected: 0,
            cells_affected: 0,
            status: OutcomeStatus::Success,
            degraded: false,
            error_message: None,
            duration_ms: 0,
            executed_at: Utc::now(),
        }
    }

    /// Copies counts and status from a finished write.
    pub(crate) fn apply(&mut self, outcome: &WriteOutcome) {
        self.range_address = outcome.range_address.to_owned();
        self.rows_affected = outcome.rows_affected;
        self.cells_affected = outcome.cells_affected;
        self.status = outcome.status;
        self.degraded = outcome.degraded;
        self.duration_ms = outcome.duration_ms;
        if !outcome.errors.is_empty() {
            let messages: Vec<String> = outcome.errors.iter().map(|(key, message)| format!("{key}: {message}")).collect();
            self.error_message = Some(messages.join("; "));
        }
    }

    pub(crate) fn fail(&mut self, error: &SheetMarkerError, started: Instant) {
        self.status = OutcomeStatus::Error;
        self.error_message = Some(error.to_string());
        self.duration_ms = started.elapsed().as_millis() as u64;
    }
}

/// Receives one structured record per engine call.
pub trait OperationLogger: Send + Sync {
    fn record(&self, record: OperationRecord);
}

macro_rules! emit_record {
    ($level:ident, $record:expr) => {{
        let record = $record;
        $level!(
            operation_id = %record.operation_id,
            correlation_id = record.correlation_id.as_deref().unwrap_or_default(),
            kind = record.kind.as_str(),
            section = record.section.as_deref().unwrap_or_default(),
            sheet = record.sheet.as_deref().unwrap_or_default(),
            marker = record.marker_text.as_deref().unwrap_or_default(),
            marker_found = ?record.marker_found,
            range = record.range_address.as_deref().unwrap_or_default(),
            rows = record.rows_affected,
            cells = record.cells_affected,
            degraded = record.degraded,
            duration_ms = record.duration_ms,
            error = record.error_message.as_deref().unwrap_or_default(),
            "Operation {:?}",
            record.status
        )
    }};
}

/// Emits each record as a `tracing` event; the level follows the status.
#[derive(Copy, Clone, Debug, Default)]
pub struct TracingOperationLogger;

impl OperationLogger for TracingOperationLogger {
    fn record(&self, record: OperationRecord) {
        match record.status {
            OutcomeStatus::Success => emit_record!(info, &record),
            OutcomeStatus::Partial => emit_record!(warn, &record),
            OutcomeStatus::Error => emit_record!(error, &record),
        }
    }
}

/// Keeps records in memory for callers that persist them in batches.
#[derive(Debug, Default)]
pub struct MemoryOperationLogger {
    records: Mutex<Vec<OperationRecord>>,
}

impl MemoryOperationLogger {
    pub fn records(&self) -> Vec<OperationRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns and clears the collected records.
    pub fn drain(&self) -> Vec<OperationRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl OperationLogger for MemoryOperationLogger {
    fn record(&self, record: OperationRecord) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
    }
}
