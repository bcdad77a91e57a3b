//! Capture → analyze → persist pipeline for the tongue scan step.
//!
//! 1. `CaptureSource` — permission and still capture
//! 2. `AnalysisService` — remote diagnosis
//! 3. `ProfileStore` — append the record, then recompute health stats
//!
//! Failures fall back to the last good stage so retries never redo work.

pub mod scan;
pub mod types;

pub use scan::{PipelineDeps, ScanPipeline};
pub use types::{ErrorReport, PipelineEvent, PipelineState, PipelineStatus, ScanOutcome};
