//! Live pipeline progress.
//!
//! A single-slot, process-wide view of "what is the pipeline doing right
//! now". The orchestrator owns the only writer; everyone else reads
//! snapshots. Nothing here is persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Stages of one run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Idle,
    Gathering,
    Drafting,
    Editing,
    Deduplicating,
    Publishing,
}

impl PipelineStage {
    /// Position of the stage in a run; `0` for idle.
    pub fn index(&self) -> u8 {
        match self {
            PipelineStage::Idle => 0,
            PipelineStage::Gathering => 1,
            PipelineStage::Drafting => 2,
            PipelineStage::Editing => 3,
            PipelineStage::Deduplicating => 4,
            PipelineStage::Publishing => 5,
        }
    }

    pub const COUNT: u8 = 5;
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Gathering => "gathering",
            PipelineStage::Drafting => "drafting",
            PipelineStage::Editing => "editing",
            PipelineStage::Deduplicating => "deduplicating",
            PipelineStage::Publishing => "publishing",
        };
        f.write_str(name)
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCounters {
    pub topics_gathered: usize,
    pub drafts_created: usize,
    pub articles_edited: usize,
    pub duplicates_skipped: usize,
    pub articles_published: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineProgress {
    pub is_running: bool,
    pub stage: PipelineStage,
    pub stage_index: u8,
    pub total_stages: u8,
    pub details: String,
    pub counters: StageCounters,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for PipelineProgress {
    fn default() -> Self {
        Self {
            is_running: false,
            stage: PipelineStage::Idle,
            stage_index: 0,
            total_stages: PipelineStage::COUNT,
            details: "Idle".to_string(),
            counters: StageCounters::default(),
            started_at: None,
        }
    }
}

/// Shared handle to the progress slot. Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<Mutex<PipelineProgress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current progress.
    pub fn snapshot(&self) -> PipelineProgress {
        self.lock().clone()
    }

    pub(crate) fn begin(&self) {
        *self.lock() = PipelineProgress {
            is_running: true,
            details: "Starting run".to_string(),
            started_at: Some(Utc::now()),
            ..PipelineProgress::default()
        };
    }

    pub(crate) fn enter(&self, stage: PipelineStage, details: impl Into<String>) {
        let mut p = self.lock();
        p.stage = stage;
        p.stage_index = stage.index();
        p.details = details.into();
    }

    pub(crate) fn update_counters(&self, f: impl FnOnce(&mut StageCounters)) {
        f(&mut self.lock().counters);
    }

    pub(crate) fn reset(&self) {
        *self.lock() = PipelineProgress::default();
    }

    fn lock(&self) -> MutexGuard<'_, PipelineProgress> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
