//! Command-line interface

pub mod commands;
pub mod output;
pub mod terminal_output;

use clap::{Parser, Subcommand};
use commands::{RunCommand, StepsCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Scriptable image-processing pipeline
#[derive(Debug, Parser, Clone)]
#[command(name = "image-pipeline")]
#[command(version)]
#[command(about = "Run an editable sequence of image-processing steps over a batch of images", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the pipeline
    Run(RunCommand),

    /// List and edit the saved steps
    Steps(StepsCommand),

    /// Validate the configuration and step code
    Validate(ValidateCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
