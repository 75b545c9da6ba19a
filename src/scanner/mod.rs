//! Candidate discovery: parallel cancelable walker, directory sizing with
//! caps, progress tracking, and the incremental scan index.

pub mod dirsize;
pub mod incremental;
pub mod progress;
pub mod walker;

pub use incremental::IncrementalIndex;
pub use progress::ProgressTracker;
pub use walker::{ScanFilters, ScanStream, ScanSummary, ScannerPool};
