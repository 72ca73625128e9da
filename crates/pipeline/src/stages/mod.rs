//! The three evaluation stages and their closed tool sets.

pub mod insight;
pub mod report;
pub mod structuring;

pub use insight::InsightStage;
pub use report::ReportStage;
pub use structuring::StructuringStage;

use serde::Deserialize;

/// The argument shape most tools share: one trace file path.
#[derive(Debug, Clone, Deserialize)]
pub struct FileArgs {
    pub file_path: String,
}
