//! Reporting pipeline.
//!
//! [`flatten`] turns the heterogeneous result store into uniform rows;
//! [`writer`] persists the structured document and the flattened table.

pub mod flatten;
pub mod writer;

pub use flatten::{flatten, ReportRow, COLUMNS, NO_SPURS_DETECTED};
pub use writer::{ReportPaths, ReportWriter, StructuredReport};
