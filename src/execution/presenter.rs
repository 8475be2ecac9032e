//! Presentation seam between a run and whatever displays it

use crate::core::{MoveDirection, RunSummary, StepError};
use crate::execution::engine::{Batch, ItemError};
use crate::execution::orchestrator::RunError;
use crate::vision::LoadedItem;
use std::fmt;
use std::sync::Weak;

/// Receives the progress of a run
///
/// Methods are called from the run task and must not block on the run
/// itself; a callback fired from here should be spawned, not awaited.
pub trait Presenter<B>: Send + Sync {
    /// A run is starting; forget previous output
    fn clear(&self);

    /// The decoded images, before any step
    fn render_originals(&self, items: &[LoadedItem]);

    /// One step has been applied to the whole batch
    fn render_step(&self, view: StepView<'_, B>);

    /// The batch after the last step
    fn show_final_result(&self, batch: &Batch<B>);

    /// Nothing to show, with the reason
    fn show_no_images(&self, reason: &str);
}

/// What a presenter gets for one step
pub struct StepView<'a, B> {
    /// Id of the step's definition
    pub step_id: &'a str,

    /// Display name (suffixed for a degraded step)
    pub name: &'a str,

    /// Position among the enabled steps
    pub index: usize,

    /// Number of enabled steps
    pub total: usize,

    /// Batch after this step
    pub batch: &'a Batch<B>,

    /// First per-item failure
    pub error: Option<&'a ItemError>,

    /// Parse failure of a degraded step
    pub syntax_error: Option<&'a StepError>,

    /// Items that kept their input because they failed
    pub fallbacks: usize,

    /// Mutations a user can trigger on this step
    pub callbacks: StepCallbacks,
}

/// Step mutations that re-run the pipeline afterwards
#[async_trait::async_trait]
pub trait StepActions: Send + Sync {
    async fn edit_step(&self, id: &str, name: &str, code: &str) -> Result<RunSummary, RunError>;

    async fn move_step_by(&self, id: &str, direction: MoveDirection)
        -> Result<RunSummary, RunError>;

    async fn delete_step(&self, id: &str) -> Result<RunSummary, RunError>;

    async fn set_step_enabled(&self, id: &str, enabled: bool) -> Result<RunSummary, RunError>;
}

/// Handle bound to one step, valid as long as its orchestrator lives
#[derive(Clone)]
pub struct StepCallbacks {
    step_id: String,
    actions: Weak<dyn StepActions>,
}

impl StepCallbacks {
    pub fn new(step_id: impl Into<String>, actions: Weak<dyn StepActions>) -> Self {
        Self {
            step_id: step_id.into(),
            actions,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    fn actions(&self) -> Result<std::sync::Arc<dyn StepActions>, RunError> {
        self.actions.upgrade().ok_or(RunError::Detached)
    }

    /// Save new name and code, then re-run
    pub async fn edit(&self, name: &str, code: &str) -> Result<RunSummary, RunError> {
        self.actions()?.edit_step(&self.step_id, name, code).await
    }

    /// Move one place, then re-run
    pub async fn move_by(&self, direction: MoveDirection) -> Result<RunSummary, RunError> {
        self.actions()?.move_step_by(&self.step_id, direction).await
    }

    /// Delete the step, then re-run
    pub async fn delete(&self) -> Result<RunSummary, RunError> {
        self.actions()?.delete_step(&self.step_id).await
    }

    /// Enable or disable the step, then re-run
    pub async fn set_enabled(&self, enabled: bool) -> Result<RunSummary, RunError> {
        self.actions()?.set_step_enabled(&self.step_id, enabled).await
    }
}

impl fmt::Debug for StepCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepCallbacks")
            .field("step_id", &self.step_id)
            .field("attached", &(self.actions.strong_count() > 0))
            .finish()
    }
}
