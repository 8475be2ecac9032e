//! Vision capability: image handles and the operations step code can call

pub mod mat;
pub mod ops;
pub mod source;

use image::DynamicImage;
use rhai::{Engine, Module};

pub use mat::Mat;
pub use ops::ImageVision;
pub use source::{derive_label, ImageSource, LoadError, LoadedItem};

/// Handle to decoded pixel data that must be released explicitly
///
/// `Clone` copies the handle, not the pixels: both copies refer to the same
/// instance and releasing one releases the other. Use [`duplicate`] for an
/// independent instance.
///
/// [`duplicate`]: ImageBuffer::duplicate
pub trait ImageBuffer: Clone + Send + Sync + 'static {
    /// Deep copy into a new instance with its own release obligation
    fn duplicate(&self) -> Self;

    /// True when no operation has populated this buffer
    fn is_empty(&self) -> bool;

    /// True once `release` has been called on this instance
    fn is_released(&self) -> bool;

    /// Free the underlying pixels
    fn release(&self);

    /// Whether two handles refer to the same instance
    fn same_handle(&self, other: &Self) -> bool;
}

/// The vision library as seen by the pipeline core
///
/// Implementations construct buffers and publish their operations to step
/// code. Operations go into the `cv` module (`cv::threshold(...)` in a step);
/// methods on the buffer type go straight onto the engine.
pub trait Vision: Send + Sync + 'static {
    type Buffer: ImageBuffer;

    /// A fresh, empty buffer
    fn empty(&self) -> Self::Buffer;

    /// A buffer holding a copy of a decoded bitmap
    fn from_bitmap(&self, bitmap: &DynamicImage) -> Self::Buffer;

    /// Register buffer methods on `engine` and operations into `cv`
    fn register(&self, engine: &mut Engine, cv: &mut Module);
}

/// Owns a buffer and releases it when dropped, unless kept
///
/// Every acquisition in the compiler and engine goes through this guard so
/// error returns and unwinding cannot leak a handle.
pub struct Scoped<B: ImageBuffer> {
    buffer: Option<B>,
}

impl<B: ImageBuffer> Scoped<B> {
    pub fn new(buffer: B) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }

    /// Borrow the guarded buffer
    pub fn get(&self) -> &B {
        // Only `keep` takes the buffer, and it consumes the guard.
        self.buffer.as_ref().expect("scoped buffer already taken")
    }

    /// Disarm the guard and hand ownership to the caller
    pub fn keep(mut self) -> B {
        self.buffer.take().expect("scoped buffer already taken")
    }
}

impl<B: ImageBuffer> Drop for Scoped<B> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if !buffer.is_released() {
                buffer.release();
            }
        }
    }
}
