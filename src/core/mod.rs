//! Core domain models
//!
//! Step definitions and their compiled form, the persisted step store,
//! run state, and application configuration.

pub mod config;
pub mod defaults;
pub mod state;
pub mod step;
pub mod step_store;

pub use config::AppConfig;
pub use state::*;
pub use step::*;
pub use step_store::StepStore;
