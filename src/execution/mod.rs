//! Pipeline execution: compiling steps, applying them to a batch, and
//! orchestrating runs

pub mod compiler;
pub mod engine;
pub mod orchestrator;
pub mod presenter;

pub use compiler::StepCompiler;
pub use engine::{Batch, ItemError, PipelineEngine, StepPass};
pub use orchestrator::{Orchestrator, RunError};
pub use presenter::{Presenter, StepActions, StepCallbacks, StepView};
