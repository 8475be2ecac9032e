//! CLI command definitions

use crate::core::{MoveDirection, StepDefinition};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Run the pipeline over a batch of images
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Image files or http(s) URLs; the configured default images when empty
    pub images: Vec<String>,

    /// Directory to write result images to (overrides the config)
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Don't show a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Manage the saved steps
#[derive(Debug, Args, Clone)]
pub struct StepsCommand {
    #[command(subcommand)]
    pub action: StepsAction,
}

/// Step management actions
///
/// Steps are addressed by id, a unique id prefix, or 1-based position.
#[derive(Debug, Subcommand, Clone)]
pub enum StepsAction {
    /// List steps in execution order
    List {
        /// Show each step's code
        #[arg(long)]
        code: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Append a step
    Add {
        /// Step name
        name: String,

        #[command(flatten)]
        code: CodeArgs,
    },

    /// Change a step's name and/or code
    Edit {
        /// Step id, id prefix or position
        step: String,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        #[command(flatten)]
        code: CodeArgs,
    },

    /// Delete a step
    Remove {
        /// Step id, id prefix or position
        step: String,
    },

    /// Move a step one place up or down
    Move {
        /// Step id, id prefix or position
        step: String,

        /// Direction to move
        #[arg(value_enum)]
        direction: DirectionArg,
    },

    /// Enable a step
    Enable {
        /// Step id, id prefix or position
        step: String,
    },

    /// Disable a step without deleting it
    Disable {
        /// Step id, id prefix or position
        step: String,
    },

    /// Replace all steps with the defaults
    Reset {
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Where step code comes from
#[derive(Debug, Args, Clone, Default)]
pub struct CodeArgs {
    /// Step code
    #[arg(long, conflicts_with = "file")]
    pub code: Option<String>,

    /// Read step code from a file
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

impl CodeArgs {
    /// The code given, if any
    pub fn read(&self) -> Result<Option<String>> {
        match (&self.code, &self.file) {
            (Some(code), _) => Ok(Some(code.clone())),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read step code from {}", path.display()))
                .map(Some),
            (None, None) => Ok(None),
        }
    }
}

/// Validate the configuration and the saved steps
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Move direction argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DirectionArg {
    Up,
    Down,
}

impl From<DirectionArg> for MoveDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Up => MoveDirection::Up,
            DirectionArg::Down => MoveDirection::Down,
        }
    }
}

/// Find a step by exact id, 1-based position, or unique id prefix
pub fn resolve_step(steps: &[StepDefinition], key: &str) -> Result<String, String> {
    if let Some(step) = steps.iter().find(|s| s.id == key) {
        return Ok(step.id.clone());
    }

    if let Ok(position) = key.parse::<usize>() {
        if (1..=steps.len()).contains(&position) {
            return Ok(steps[position - 1].id.clone());
        }
    }

    let matches: Vec<&StepDefinition> = steps.iter().filter(|s| s.id.starts_with(key)).collect();
    match matches.as_slice() {
        [step] => Ok(step.id.clone()),
        [] => Err(format!("No step matches '{}'", key)),
        _ => Err(format!("'{}' matches {} steps; use a longer id", key, matches.len())),
    }
}
