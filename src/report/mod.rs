pub mod acceptance;
mod block_marker;
pub mod classifier;
pub mod configuration;
pub mod engine;
pub mod format;
pub mod log_extractor;
pub mod store;
pub mod timing;
pub mod types;

pub use engine::{ReportEngine, ReportOptions};
pub use store::ReportStore;
pub use types::{FailureCategory, PipelineReport, StageReport};
