//! # Sheet Marker
//!
//! Fills spreadsheet templates from structured data by locating text markers
//! instead of hard-coded cell coordinates.
//!
//! A template declares sections, each bound to a marker label such as
//! `"Pagos:"`, with row/column offsets and a field to column map. At write
//! time the engine finds the marker in the sheet's used range, computes the
//! destination cells and hands the plan to one of two backends.
//!
//! ## Features
//!
//! - **Marker resolution**: first case-sensitive substring match in row-major order
//! - **Address planning**: single records, tables and per-row merge templates
//! - **In-memory backend**: edits a loaded `.xlsx` package, redirecting writes inside
//!   merged regions to their anchor and inserting styled rows for tables
//! - **Live backend**: range-level edits to a stored workbook through the remote
//!   document service, with a degraded overwrite when rows cannot be inserted
//! - **Resilient transport**: bounded retries for locked, throttled and gateway responses
//! - **Operation records**: one structured record per engine call
//!
//! ## Example
//!
//! ```no_run
//! use sheet_marker::engine::{Engine, TracingOperationLogger};
//! use sheet_marker::executor::InMemoryExecutor;
//! use sheet_marker::schema::{DataType, SectionSchema, Template};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), sheet_marker::SheetMarkerError> {
//! let template = Template::new(vec![
//!     SectionSchema::new("cliente", "Cliente:").offsets(0, 1).field("nombre", 0, DataType::Text),
//! ])?;
//! let engine = Engine::new(template, Arc::new(TracingOperationLogger));
//! let mut executor = InMemoryExecutor::load(&std::fs::read("factura.xlsx")?)?;
//! let data: sheet_marker::spreadsheet::value::Record = [("nombre".to_owned(), "ACME".into())].into_iter().collect();
//! engine.write_section(&mut executor, "cliente", &data)?;
//! std::fs::write("factura-001.xlsx", executor.save()?)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
mod helpers;
pub mod planner;
pub mod schema;
pub mod spreadsheet;
pub mod transport;

pub use engine::Engine;
pub use error::SheetMarkerError;
pub use executor::InMemoryExecutor;
pub use executor::LiveExecutor;
pub use executor::WriteExecutor;
pub use executor::WriteOutcome;
pub use schema::Template;
pub use spreadsheet::value::CellValue;
