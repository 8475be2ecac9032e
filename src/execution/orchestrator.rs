//! Runs the compiled steps over a loaded batch and routes step edits back
//! through the store

use crate::core::{MoveDirection, RunState, RunSummary, StepStore};
use crate::execution::compiler::StepCompiler;
use crate::execution::engine::PipelineEngine;
use crate::execution::presenter::{Presenter, StepActions, StepCallbacks, StepView};
use crate::vision::{ImageSource, LoadError, Vision};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Why a run (or a step mutation) did not complete
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to load images: {0}")]
    Load(#[from] LoadError),

    #[error("No images to process")]
    NoImages,

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("The pipeline this step belonged to is gone")]
    Detached,

    #[error("Unknown step: {0}")]
    UnknownStep(String),
}

/// Composes the step store, compiler and engine into runs
///
/// Runs are serialised. Each request bumps a generation counter before it
/// queues, and a run in flight stops at the next step boundary once a newer
/// request exists.
pub struct Orchestrator<V: Vision> {
    me: Weak<Self>,
    vision: Arc<V>,
    compiler: StepCompiler<V>,
    store: Mutex<StepStore>,
    engine: Mutex<PipelineEngine<V::Buffer>>,
    presenter: Arc<dyn Presenter<V::Buffer>>,
    source: std::sync::Mutex<ImageSource>,
    run_lock: Mutex<()>,
    generation: AtomicU64,
    state: watch::Sender<RunState>,
}

impl<V: Vision> Orchestrator<V> {
    /// `store` should already be loaded; `source` is used until `run` is
    /// given another one
    pub fn new(
        compiler: StepCompiler<V>,
        store: StepStore,
        presenter: Arc<dyn Presenter<V::Buffer>>,
        source: ImageSource,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(RunState::Idle);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            vision: Arc::clone(compiler.vision()),
            compiler,
            store: Mutex::new(store),
            engine: Mutex::new(PipelineEngine::new()),
            presenter,
            source: std::sync::Mutex::new(source),
            run_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            state,
        })
    }

    /// Observe run state changes
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// The step store, for edits that should not trigger a run
    pub fn store(&self) -> &Mutex<StepStore> {
        &self.store
    }

    pub fn source(&self) -> ImageSource {
        self.source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make `source` the current image source and run the pipeline on it
    pub async fn run(&self, source: ImageSource) -> Result<RunSummary, RunError> {
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = source;
        self.rerun().await
    }

    /// Run the pipeline on the current image source
    pub async fn rerun(&self) -> Result<RunSummary, RunError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _running = self.run_lock.lock().await;

        let mut summary = RunSummary::start();
        if self.is_stale(generation) {
            debug!("Run request {} superseded before it started", generation);
            summary.supersede();
            return Ok(summary);
        }

        let source = self.source();
        let result = self.execute(generation, &source, summary).await;
        self.state.send_replace(RunState::Idle);
        result
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    async fn execute(
        &self,
        generation: u64,
        source: &ImageSource,
        mut summary: RunSummary,
    ) -> Result<RunSummary, RunError> {
        info!("Starting run {} ({} images)", summary.run_id, source.len());
        self.presenter.clear();
        self.state.send_replace(RunState::LoadingImages);

        let items = match source.load().await {
            Ok(items) => items,
            Err(e) => {
                warn!("Image load failed: {}", e);
                // Results of the previous source must not outlive it.
                self.engine.lock().await.reset();
                self.presenter.show_no_images(&e.to_string());
                return Err(RunError::Load(e));
            }
        };

        if self.is_stale(generation) {
            summary.supersede();
            return Ok(summary);
        }

        let mut engine = self.engine.lock().await;
        let items = engine.load_batch(self.vision.as_ref(), items);
        if engine.is_empty() {
            engine.reset();
            self.presenter.show_no_images("No images to process");
            return Err(RunError::NoImages);
        }
        summary.image_count = engine.len();
        self.presenter.render_originals(&items);
        drop(items);
        self.state.send_replace(RunState::Ready);

        let steps = self.store.lock().await.compile(&self.compiler);
        let total = steps.len();
        summary.total_steps = total;

        for (index, step) in steps.iter().enumerate() {
            tokio::task::yield_now().await;
            if self.is_stale(generation) {
                info!("Run {} superseded after {} of {} steps", summary.run_id, index, total);
                summary.supersede();
                return Ok(summary);
            }

            self.state.send_replace(RunState::RunningStep { index, total });
            debug!("Running step {}/{}: {}", index + 1, total, step.name);

            let pass = engine.execute_step(|input| step.apply(input));
            if let Some(e) = &step.syntax_error {
                summary.record_error(&step.id, &step.name, None, e);
            }
            if let Some(item) = &pass.error {
                summary.record_error(&step.id, &step.name, Some(&item.label), &item.error);
            }

            self.presenter.render_step(StepView {
                step_id: &step.id,
                name: &step.name,
                index,
                total,
                batch: pass.batch,
                error: pass.error.as_ref(),
                syntax_error: step.syntax_error.as_ref(),
                fallbacks: pass.fallbacks,
                callbacks: self.callbacks(&step.id),
            });
            summary.steps_run += 1;
        }

        summary.finish();
        info!(
            "Run {} finished: {} steps over {} images, {} errors",
            summary.run_id,
            summary.steps_run,
            summary.image_count,
            summary.errors.len()
        );
        Ok(summary)
    }

    fn callbacks(&self, step_id: &str) -> StepCallbacks {
        let actions: Weak<dyn StepActions> = self.me.clone();
        StepCallbacks::new(step_id, actions)
    }

    /// Hand the current batch to the presenter
    ///
    /// Returns `false` when there is nothing to show.
    pub async fn show_final_result(&self) -> bool {
        let engine = self.engine.lock().await;
        if engine.is_empty() {
            info!("No results to display");
            self.presenter.show_no_images("No results to display!");
            return false;
        }
        self.presenter.show_final_result(engine.batch());
        true
    }
}

#[async_trait::async_trait]
impl<V: Vision> StepActions for Orchestrator<V> {
    async fn edit_step(&self, id: &str, name: &str, code: &str) -> Result<RunSummary, RunError> {
        self.store
            .lock()
            .await
            .update(id, name, code)
            .await
            .map_err(RunError::Storage)?;
        self.rerun().await
    }

    async fn move_step_by(
        &self,
        id: &str,
        direction: MoveDirection,
    ) -> Result<RunSummary, RunError> {
        {
            let mut store = self.store.lock().await;
            let index = store
                .position(id)
                .ok_or_else(|| RunError::UnknownStep(id.to_string()))?;
            store
                .move_step(index, direction)
                .await
                .map_err(RunError::Storage)?;
        }
        self.rerun().await
    }

    async fn delete_step(&self, id: &str) -> Result<RunSummary, RunError> {
        self.store
            .lock()
            .await
            .remove(id)
            .await
            .map_err(RunError::Storage)?;
        self.rerun().await
    }

    async fn set_step_enabled(&self, id: &str, enabled: bool) -> Result<RunSummary, RunError> {
        self.store
            .lock()
            .await
            .set_enabled(id, enabled)
            .await
            .map_err(RunError::Storage)?;
        self.rerun().await
    }
}
