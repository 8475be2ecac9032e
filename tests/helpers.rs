//! Test utility functions for image-pipeline
#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma};
use image_pipeline::core::StepTemplate;
use image_pipeline::execution::{Batch, ItemError, Presenter, StepCallbacks, StepView};
use image_pipeline::persistence::InMemoryStorage;
use image_pipeline::vision::{ImageBuffer, ImageSource, LoadedItem, Vision};
use image_pipeline::core::config::SandboxConfig;
use image_pipeline::{Orchestrator, StepCompiler, StepStore};
use rhai::{Engine, EvalAltResult, ImmutableString, Module};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every buffer created and every release call
#[derive(Default)]
pub struct Ledger {
    next_id: AtomicUsize,
    releases: Mutex<HashMap<usize, usize>>,
}

impl Ledger {
    fn register(&self) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.releases.lock().unwrap().insert(id, 0);
        id
    }

    fn release(&self, id: usize) {
        *self.releases.lock().unwrap().entry(id).or_insert(0) += 1;
    }

    fn release_count(&self, id: usize) -> usize {
        self.releases.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    /// Number of buffers ever created
    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Buffers released more than once
    pub fn double_releases(&self) -> Vec<usize> {
        self.releases
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, &n)| n > 1)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Buffers never released
    pub fn live(&self) -> Vec<usize> {
        let mut live: Vec<usize> = self
            .releases
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, &n)| n == 0)
            .map(|(&id, _)| id)
            .collect();
        live.sort_unstable();
        live
    }
}

struct FakeInner {
    id: usize,
    value: Mutex<Option<i64>>,
    ledger: Arc<Ledger>,
}

/// Buffer holding a single number, with every release recorded
#[derive(Clone)]
pub struct FakeBuffer {
    inner: Arc<FakeInner>,
}

impl FakeBuffer {
    fn new(ledger: &Arc<Ledger>, value: Option<i64>) -> Self {
        Self {
            inner: Arc::new(FakeInner {
                id: ledger.register(),
                value: Mutex::new(value),
                ledger: Arc::clone(ledger),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn value(&self) -> Option<i64> {
        if self.is_released() {
            None
        } else {
            *self.inner.value.lock().unwrap()
        }
    }

    fn set(&self, value: i64) -> Result<(), Box<EvalAltResult>> {
        if self.is_released() {
            return Err("write to released buffer".into());
        }
        *self.inner.value.lock().unwrap() = Some(value);
        Ok(())
    }

    fn read(&self) -> Result<i64, Box<EvalAltResult>> {
        self.value().ok_or_else(|| "read of empty buffer".into())
    }
}

impl std::fmt::Debug for FakeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FakeBuffer#{}({:?})", self.inner.id, self.value())
    }
}

impl ImageBuffer for FakeBuffer {
    fn duplicate(&self) -> Self {
        FakeBuffer::new(&self.inner.ledger, self.value())
    }

    fn is_empty(&self) -> bool {
        self.value().is_none()
    }

    fn is_released(&self) -> bool {
        self.inner.ledger.release_count(self.inner.id) > 0
    }

    fn release(&self) {
        self.inner.ledger.release(self.inner.id);
    }

    fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Vision whose "images" are numbers
///
/// Step code gets `cv::set(dst, n)`, `cv::add(src, dst, n)`, `cv::fail(msg)`,
/// `cv::boom()` (panics) and a `value` property.
#[derive(Default)]
pub struct FakeVision {
    pub ledger: Arc<Ledger>,
}

impl FakeVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self, value: i64) -> FakeBuffer {
        FakeBuffer::new(&self.ledger, Some(value))
    }
}

impl Vision for FakeVision {
    type Buffer = FakeBuffer;

    fn empty(&self) -> FakeBuffer {
        FakeBuffer::new(&self.ledger, None)
    }

    fn from_bitmap(&self, bitmap: &DynamicImage) -> FakeBuffer {
        let value = bitmap.to_luma8().get_pixel(0, 0)[0] as i64;
        FakeBuffer::new(&self.ledger, Some(value))
    }

    fn register(&self, engine: &mut Engine, cv: &mut Module) {
        engine.register_get("value", |b: &mut FakeBuffer| b.value().unwrap_or(-1));
        cv.set_native_fn("set", |dst: FakeBuffer, value: i64| dst.set(value));
        cv.set_native_fn("add", |src: FakeBuffer, dst: FakeBuffer, n: i64| {
            let value = src.read()?;
            dst.set(value + n)
        });
        cv.set_native_fn("fail", |message: ImmutableString| -> Result<(), Box<EvalAltResult>> {
            Err(message.to_string().into())
        });
        cv.set_native_fn("boom", || -> Result<(), Box<EvalAltResult>> {
            panic!("boom from step code")
        });
    }
}

/// Everything a presenter was told
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Clear,
    Originals(Vec<String>),
    Step {
        step_id: String,
        name: String,
        index: usize,
        total: usize,
        values: Vec<Option<i64>>,
        labels: Vec<String>,
        error: Option<ItemError>,
        syntax_error: bool,
        fallbacks: usize,
    },
    Final(Vec<Option<i64>>),
    NoImages(String),
}

type StepHook = Box<dyn Fn(&StepCallbacks, usize) + Send + Sync>;

/// Presenter that records calls and keeps each step's callbacks
#[derive(Default)]
pub struct RecordingPresenter {
    events: Mutex<Vec<Event>>,
    callbacks: Mutex<Vec<StepCallbacks>>,
    on_step: Mutex<Option<StepHook>>,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Step events only
    pub fn steps(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Step { .. }))
            .collect()
    }

    /// Callbacks handed out for the most recent run, in step order
    pub fn callbacks(&self) -> Vec<StepCallbacks> {
        self.callbacks.lock().unwrap().clone()
    }

    /// Run `hook` synchronously inside every `render_step`
    pub fn on_step(&self, hook: impl Fn(&StepCallbacks, usize) + Send + Sync + 'static) {
        *self.on_step.lock().unwrap() = Some(Box::new(hook));
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Presenter<FakeBuffer> for RecordingPresenter {
    fn clear(&self) {
        self.callbacks.lock().unwrap().clear();
        self.push(Event::Clear);
    }

    fn render_originals(&self, items: &[LoadedItem]) {
        self.push(Event::Originals(items.iter().map(|i| i.name.clone()).collect()));
    }

    fn render_step(&self, view: StepView<'_, FakeBuffer>) {
        self.push(Event::Step {
            step_id: view.step_id.to_string(),
            name: view.name.to_string(),
            index: view.index,
            total: view.total,
            values: view.batch.images().iter().map(FakeBuffer::value).collect(),
            labels: view.batch.labels().to_vec(),
            error: view.error.cloned(),
            syntax_error: view.syntax_error.is_some(),
            fallbacks: view.fallbacks,
        });
        self.callbacks.lock().unwrap().push(view.callbacks.clone());
        if let Some(hook) = self.on_step.lock().unwrap().as_ref() {
            hook(&view.callbacks, view.index);
        }
    }

    fn show_final_result(&self, batch: &Batch<FakeBuffer>) {
        self.push(Event::Final(batch.images().iter().map(FakeBuffer::value).collect()));
    }

    fn show_no_images(&self, reason: &str) {
        self.push(Event::NoImages(reason.to_string()));
    }
}

/// One-pixel gray PNGs named `<name>.png` holding `value`
pub fn write_images(dir: &std::path::Path, images: &[(&str, u8)]) -> Vec<PathBuf> {
    images
        .iter()
        .map(|(name, value)| {
            let path = dir.join(format!("{}.png", name));
            GrayImage::from_pixel(1, 1, Luma([*value])).save(&path).unwrap();
            path
        })
        .collect()
}

/// Steps from `(name, code)` pairs
pub fn templates(steps: &[(&str, &str)]) -> Vec<StepTemplate> {
    steps
        .iter()
        .map(|(name, code)| StepTemplate::new(*name, *code))
        .collect()
}

/// A ready orchestrator over fake images
pub struct Harness {
    pub vision: Arc<FakeVision>,
    pub storage: Arc<InMemoryStorage>,
    pub presenter: Arc<RecordingPresenter>,
    pub orchestrator: Arc<Orchestrator<FakeVision>>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new(steps: &[(&str, &str)], images: &[(&str, u8)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_images(dir.path(), images);

        let vision = Arc::new(FakeVision::new());
        let storage = Arc::new(InMemoryStorage::new());
        let mut store = StepStore::new(storage.clone(), "steps");
        store.load(&templates(steps)).await;

        let presenter = RecordingPresenter::new();
        let compiler = StepCompiler::new(Arc::clone(&vision), &SandboxConfig::default());
        let orchestrator = Orchestrator::new(
            compiler,
            store,
            presenter.clone(),
            ImageSource::Files(paths),
        );

        Self {
            vision,
            storage,
            presenter,
            orchestrator,
            dir,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.vision.ledger
    }

    pub async fn step_ids(&self) -> Vec<String> {
        self.orchestrator
            .store()
            .lock()
            .await
            .list()
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }
}

/// Values of the last rendered step
pub fn last_values(presenter: &RecordingPresenter) -> Vec<Option<i64>> {
    match presenter.steps().last() {
        Some(Event::Step { values, .. }) => values.clone(),
        _ => panic!("no step was rendered"),
    }
}

/// Assert no buffer was released twice
pub fn assert_no_double_release(ledger: &Ledger) {
    let doubles = ledger.double_releases();
    assert!(doubles.is_empty(), "buffers released more than once: {:?}", doubles);
}
