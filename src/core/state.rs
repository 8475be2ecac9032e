//! Run state models

use crate::core::StepError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the orchestrator is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No run in progress
    Idle,
    /// Decoding the image source
    LoadingImages,
    /// Images are in the engine, steps not started yet
    Ready,
    /// Executing step `index` (0-based) of `total`
    RunningStep { index: usize, total: usize },
}

impl RunState {
    /// Whether a run trigger should be disabled
    pub fn is_busy(&self) -> bool {
        !matches!(self, RunState::Idle)
    }
}

/// An error reported by one step during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedError {
    /// Id of the failing step
    pub step_id: String,

    /// Display name of the failing step
    pub step_name: String,

    /// Label of the first image that failed, when the failure was per item
    pub label: Option<String>,

    /// Error text
    pub message: String,
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Number of images processed
    pub image_count: usize,

    /// Number of steps executed
    pub steps_run: usize,

    /// Number of enabled steps
    pub total_steps: usize,

    /// Errors, at most one per step
    pub errors: Vec<ReportedError>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished or stopped
    pub finished_at: Option<DateTime<Utc>>,

    /// Stopped early because a newer run was requested
    pub superseded: bool,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            image_count: 0,
            steps_run: 0,
            total_steps: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            superseded: false,
        }
    }

    pub fn record_error(
        &mut self,
        step_id: &str,
        step_name: &str,
        label: Option<&str>,
        error: &StepError,
    ) {
        self.errors.push(ReportedError {
            step_id: step_id.to_string(),
            step_name: step_name.to_string(),
            label: label.map(str::to_string),
            message: error.to_string(),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn supersede(&mut self) {
        self.superseded = true;
        self.finish();
    }

    /// Every enabled step ran, regardless of per-item errors
    pub fn is_complete(&self) -> bool {
        !self.superseded && self.steps_run == self.total_steps
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
