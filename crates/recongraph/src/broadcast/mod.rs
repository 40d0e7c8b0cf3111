//! Live and persisted views of scans.
//!
//! `log_stream` serves event feeds from in-memory live state, `scan_store`
//! reads and writes the durable job records.

pub mod log_stream;
pub mod scan_store;

pub use log_stream::{LogStream, ScanEvent};
pub use scan_store::{ResultSummary, ScanJob, ScanStore};
