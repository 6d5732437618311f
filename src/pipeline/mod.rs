pub mod extraction;
pub mod barcode;
pub mod lookup;
pub mod fields;
pub mod orchestrator;

pub use orchestrator::{Orchestrator, ScanError, ScanReport, ScanState};
