//! Batch execution engine - applies one step across every image

use crate::core::StepError;
use crate::vision::{ImageBuffer, LoadedItem, Scoped, Vision};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Images and their labels, index-aligned
#[derive(Debug)]
pub struct Batch<B> {
    images: Vec<B>,
    labels: Vec<String>,
}

impl<B> Default for Batch<B> {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl<B> Batch<B> {
    pub fn images(&self) -> &[B] {
        &self.images
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// `(label, image)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &B)> {
        self.labels.iter().map(String::as_str).zip(self.images.iter())
    }
}

/// First failing item of a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub index: usize,
    pub label: String,
    pub error: StepError,
}

/// Result of running one step over the batch
#[derive(Debug)]
pub struct StepPass<'a, B> {
    /// The new current batch
    pub batch: &'a Batch<B>,

    /// First failure, if any item failed
    pub error: Option<ItemError>,

    /// Number of items that kept a copy of their input because they failed
    pub fallbacks: usize,
}

/// Owns the current batch of image handles
///
/// Every handle the engine drops is released exactly once, whether a step
/// succeeds, fails, or panics.
pub struct PipelineEngine<B: ImageBuffer> {
    batch: Batch<B>,
}

impl<B: ImageBuffer> Default for PipelineEngine<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ImageBuffer> PipelineEngine<B> {
    pub fn new() -> Self {
        Self {
            batch: Batch::default(),
        }
    }

    /// Release every image and clear the batch
    pub fn reset(&mut self) {
        let released = self.batch.images.len();
        for image in self.batch.images.drain(..) {
            if !image.is_released() {
                image.release();
            }
        }
        self.batch.labels.clear();
        if released > 0 {
            debug!("Released {} images", released);
        }
    }

    /// Replace the batch with buffers built from `items`
    ///
    /// Returns the items so the caller can show the originals.
    pub fn load_batch<V>(&mut self, vision: &V, items: Vec<LoadedItem>) -> Vec<LoadedItem>
    where
        V: Vision<Buffer = B>,
    {
        self.reset();
        for item in &items {
            self.batch.images.push(vision.from_bitmap(&item.image));
            self.batch.labels.push(item.name.clone());
        }
        debug!("Loaded batch of {} images", self.batch.len());
        items
    }

    /// Apply `transform` to every image and make the results the new batch
    ///
    /// A failing item keeps a copy of its input. Only the first failure is
    /// reported; the rest are counted in `fallbacks`.
    pub fn execute_step<F>(&mut self, transform: F) -> StepPass<'_, B>
    where
        F: Fn(&B) -> Result<B, StepError>,
    {
        let previous: Vec<Scoped<B>> = std::mem::take(&mut self.batch.images)
            .into_iter()
            .map(Scoped::new)
            .collect();
        let mut next: Vec<Scoped<B>> = Vec::with_capacity(previous.len());
        let mut error = None;
        let mut fallbacks = 0;

        for (index, image) in previous.iter().enumerate() {
            let input = image.get();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| transform(input)))
                .unwrap_or_else(|payload| Err(StepError::Panicked(panic_message(payload.as_ref()))));

            match outcome {
                // The input is released below, so an alias of it cannot be kept.
                Ok(output) if output.same_handle(input) => next.push(Scoped::new(input.duplicate())),
                Ok(output) => next.push(Scoped::new(output)),
                Err(e) => {
                    let label = self.batch.labels.get(index).cloned().unwrap_or_default();
                    warn!("Step failed on image {} ('{}'): {}", index, label, e);
                    fallbacks += 1;
                    if error.is_none() {
                        error = Some(ItemError {
                            index,
                            label,
                            error: e,
                        });
                    }
                    next.push(Scoped::new(input.duplicate()));
                }
            }
        }

        drop(previous);
        self.batch.images = next.into_iter().map(Scoped::keep).collect();

        StepPass {
            batch: &self.batch,
            error,
            fallbacks,
        }
    }

    pub fn batch(&self) -> &Batch<B> {
        &self.batch
    }

    pub fn labels(&self) -> &[String] {
        &self.batch.labels
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

impl<B: ImageBuffer> Drop for PipelineEngine<B> {
    fn drop(&mut self) {
        self.reset();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
