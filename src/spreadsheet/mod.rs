//! # Spreadsheet Model
//!
//! Cell references, scalar cell values, the used-range read model shared by
//! both write backends, and the in-memory `.xlsx` document the in-memory
//! executor mutates.
pub mod reference;
pub mod snapshot;
pub mod value;
pub mod xlsx;

pub(crate) mod worksheet;

#[cfg(test)]
pub(crate) mod fixture;
