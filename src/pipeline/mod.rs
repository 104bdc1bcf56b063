//! The four-stage content pipeline.
//!
//! ```text
//! gather ──► draft ──► edit ──► dedupe ──► publish
//! ```
//!
//! Stages run strictly in order. Inside a stage, a failure on one item is
//! logged and the item is dropped; only a failure of the stage itself
//! (a [`PipelineError`]) aborts the run.

use thiserror::Error;

use crate::BoxError;

pub mod draft;
pub mod edit;
pub mod gather;
pub mod orchestrator;
pub mod progress;
pub mod publish;
pub mod quota;

pub use orchestrator::{Orchestrator, PipelineDeps, RunOutcome};
pub use progress::{PipelineProgress, PipelineStage, ProgressTracker};

/// Stage-level failures. Any of these ends the run as `failed` or `cancelled`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to load tenant configuration: {0}")]
    ConfigLoad(#[source] BoxError),
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: BoxError,
    },
    #[error("run cancelled before {0}")]
    Cancelled(PipelineStage),
}

impl PipelineError {
    pub fn stage(stage: PipelineStage, source: impl Into<BoxError>) -> Self {
        PipelineError::Stage {
            stage,
            source: source.into(),
        }
    }
}
