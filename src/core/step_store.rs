//! Ordered, persisted list of step definitions

use crate::core::{CallableStep, MoveDirection, StepDefinition, StepTemplate};
use crate::execution::StepCompiler;
use crate::persistence::StorageBackend;
use crate::vision::Vision;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Step definitions in execution order, written through to storage on
/// every mutation
pub struct StepStore {
    backend: Arc<dyn StorageBackend>,
    key: String,
    steps: Vec<StepDefinition>,
}

impl StepStore {
    /// Create an empty store; call [`load`](Self::load) to populate it
    pub fn new(backend: Arc<dyn StorageBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            steps: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the stored list, or seed it from `defaults`
    ///
    /// Never fails. A missing or corrupt blob falls back to the defaults,
    /// which are then written back so their ids stay stable. When storage
    /// cannot be read at all the defaults are used for this session only and
    /// the stored list is left alone.
    pub async fn load(&mut self, defaults: &[StepTemplate]) {
        match self.read_stored().await {
            Stored::Steps(steps) => {
                debug!("Loaded {} steps from '{}'", steps.len(), self.key);
                self.steps = steps;
            }
            Stored::Missing => {
                self.steps = seed(defaults);
                if let Err(e) = self.write(&self.steps).await {
                    warn!("Failed to save seeded steps: {:#}", e);
                }
            }
            Stored::Unavailable => {
                self.steps = seed(defaults);
            }
        }
    }

    async fn read_stored(&self) -> Stored {
        let blob = match self.backend.get(&self.key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return Stored::Missing,
            Err(e) => {
                warn!("Failed to read stored steps, using defaults without saving: {:#}", e);
                return Stored::Unavailable;
            }
        };

        match serde_json::from_str::<Vec<StepDefinition>>(&blob) {
            Ok(steps) => Stored::Steps(steps),
            Err(e) => {
                warn!("Stored steps under '{}' are corrupt, using defaults: {}", self.key, e);
                Stored::Missing
            }
        }
    }

    async fn write(&self, steps: &[StepDefinition]) -> Result<()> {
        let blob = serde_json::to_string(steps).context("Failed to serialize steps")?;
        self.backend
            .set(&self.key, &blob)
            .await
            .with_context(|| format!("Failed to save steps under '{}'", self.key))
    }

    /// Persist `steps`, then make them current; on error nothing changes
    async fn commit(&mut self, steps: Vec<StepDefinition>) -> Result<()> {
        self.write(&steps).await?;
        self.steps = steps;
        Ok(())
    }

    /// Definitions in execution order
    pub fn list(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Append an enabled step with a fresh id
    pub async fn add(&mut self, name: &str, code: &str) -> Result<StepDefinition> {
        let step = StepDefinition::new(name, code);
        let mut steps = self.steps.clone();
        steps.push(step.clone());
        self.commit(steps).await?;
        info!("Added step '{}' ({})", step.name, step.id);
        Ok(step)
    }

    /// Replace name and code; an unknown id is ignored
    pub async fn update(&mut self, id: &str, name: &str, code: &str) -> Result<()> {
        let Some(index) = self.position(id) else {
            debug!("Update of unknown step {} ignored", id);
            return Ok(());
        };
        let mut steps = self.steps.clone();
        steps[index].name = name.to_string();
        steps[index].code = code.to_string();
        self.commit(steps).await
    }

    /// Enable or disable a step; an unknown id is ignored
    pub async fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let Some(index) = self.position(id) else {
            debug!("Toggle of unknown step {} ignored", id);
            return Ok(());
        };
        let mut steps = self.steps.clone();
        steps[index].enabled = enabled;
        self.commit(steps).await
    }

    /// Delete the step with `id`
    pub async fn remove(&mut self, id: &str) -> Result<()> {
        let steps = self.steps.iter().filter(|s| s.id != id).cloned().collect();
        self.commit(steps).await
    }

    /// Swap the step at `index` with its neighbour in `direction`
    ///
    /// Moving past either end leaves the order unchanged. The list is saved
    /// either way.
    pub async fn move_step(&mut self, index: usize, direction: MoveDirection) -> Result<()> {
        let mut steps = self.steps.clone();
        match direction.target(index) {
            Some(target) if index < steps.len() && target < steps.len() => {
                steps.swap(index, target);
            }
            _ => debug!("Move of step {} {:?} is out of range", index, direction),
        }
        self.commit(steps).await
    }

    /// Drop the stored list and start over from `defaults`
    pub async fn reset(&mut self, defaults: &[StepTemplate]) -> Result<()> {
        self.backend
            .remove(&self.key)
            .await
            .with_context(|| format!("Failed to remove steps under '{}'", self.key))?;
        self.commit(seed(defaults)).await
    }

    /// Compile the enabled steps, in order
    pub fn compile<V: Vision>(&self, compiler: &StepCompiler<V>) -> Vec<CallableStep<V::Buffer>> {
        self.steps
            .iter()
            .filter(|s| s.enabled)
            .map(|s| compiler.compile(s))
            .collect()
    }
}

/// Outcome of reading the stored list
enum Stored {
    Steps(Vec<StepDefinition>),
    /// Absent or unparsable; safe to overwrite
    Missing,
    /// The backend failed; must not be overwritten
    Unavailable,
}

fn seed(defaults: &[StepTemplate]) -> Vec<StepDefinition> {
    info!("Seeding {} default steps", defaults.len());
    defaults.iter().map(StepTemplate::instantiate).collect()
}
