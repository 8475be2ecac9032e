//! Scenario-based tests for image-pipeline

mod fault_isolation;
mod run_ordering;
mod persistence;
