//! Step domain model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Suffix appended to the name of a step whose code does not parse
pub const SYNTAX_ERROR_SUFFIX: &str = " (syntax error)";

/// A persisted, user-editable step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Stable identifier, kept across edits and reorders
    pub id: String,

    /// Display label
    pub name: String,

    /// Step source code; may be invalid
    pub code: String,

    /// Disabled steps are kept but skipped when compiling
    pub enabled: bool,
}

impl StepDefinition {
    /// Create an enabled step with a fresh id
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            code: code.into(),
            enabled: true,
        }
    }
}

/// Seed for a step definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,
    pub code: String,
}

impl StepTemplate {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }

    pub fn instantiate(&self) -> StepDefinition {
        StepDefinition::new(self.name.clone(), self.code.clone())
    }
}

/// Where in the step source something went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, " (line {}, column {})", line, column),
            (Some(line), None) => write!(f, " (line {})", line),
            _ => Ok(()),
        }
    }
}

/// Failure of a step's code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The code could not be parsed
    #[error("Syntax error: {message}{position}")]
    Syntax {
        message: String,
        position: SourcePosition,
    },

    /// The code raised an error while processing an image
    #[error("Runtime error: {message}{position}")]
    Runtime {
        message: String,
        position: SourcePosition,
    },

    /// The transform panicked
    #[error("Step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    pub fn runtime(message: impl Into<String>) -> Self {
        StepError::Runtime {
            message: message.into(),
            position: SourcePosition::default(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StepError::Syntax { message, .. } | StepError::Runtime { message, .. } => message,
            StepError::Panicked(message) => message,
        }
    }

    pub fn position(&self) -> SourcePosition {
        match self {
            StepError::Syntax { position, .. } | StepError::Runtime { position, .. } => *position,
            StepError::Panicked(_) => SourcePosition::default(),
        }
    }
}

/// Direction for reordering a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

impl MoveDirection {
    /// Neighbour index, if it is not below zero
    pub fn target(self, index: usize) -> Option<usize> {
        match self {
            MoveDirection::Up => index.checked_sub(1),
            MoveDirection::Down => index.checked_add(1),
        }
    }
}

impl TryFrom<i64> for MoveDirection {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(MoveDirection::Up),
            1 => Ok(MoveDirection::Down),
            other => Err(format!("Move direction must be -1 or 1, got {}", other)),
        }
    }
}

/// Image transformation produced by compiling a step
pub type Transform<B> = Arc<dyn Fn(&B) -> Result<B, StepError> + Send + Sync>;

/// A compiled step, ready to run over a batch
///
/// Rebuilt on every run and never persisted.
pub struct CallableStep<B> {
    /// Id of the definition this was compiled from
    pub id: String,

    /// Display name, suffixed when the code does not parse
    pub name: String,

    /// Parse failure, for a degraded step
    pub syntax_error: Option<StepError>,

    transform: Transform<B>,
}

impl<B> CallableStep<B> {
    pub fn new(id: impl Into<String>, name: impl Into<String>, transform: Transform<B>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            syntax_error: None,
            transform,
        }
    }

    /// Stand-in for a step whose code does not parse
    pub fn degraded(
        id: impl Into<String>,
        name: &str,
        error: StepError,
        transform: Transform<B>,
    ) -> Self {
        Self {
            id: id.into(),
            name: format!("{}{}", name, SYNTAX_ERROR_SUFFIX),
            syntax_error: Some(error),
            transform,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.syntax_error.is_some()
    }

    /// Apply the transformation to one image
    pub fn apply(&self, input: &B) -> Result<B, StepError> {
        (self.transform)(input)
    }

    pub fn transform(&self) -> &Transform<B> {
        &self.transform
    }
}

impl<B> Clone for CallableStep<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            syntax_error: self.syntax_error.clone(),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<B> fmt::Debug for CallableStep<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableStep")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("syntax_error", &self.syntax_error)
            .finish_non_exhaustive()
    }
}
