//! image-pipeline - A scriptable image-processing pipeline
//!
//! An ordered list of user-editable steps, each a small Rhai snippet that
//! turns one image into another, runs over a batch of images. Intermediate
//! results of every step are handed to a [`Presenter`](execution::Presenter).

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod vision;

// Re-export commonly used types
pub use core::{AppConfig, CallableStep, MoveDirection, RunState, RunSummary, StepDefinition, StepError, StepStore, StepTemplate};
pub use execution::{Batch, Orchestrator, PipelineEngine, Presenter, RunError, StepCallbacks, StepCompiler, StepView};
pub use persistence::{InMemoryStorage, StorageBackend};
pub use vision::{ImageBuffer, ImageSource, ImageVision, Mat, Vision};
