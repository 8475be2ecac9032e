//! `Mat`: the image handle handed to step code

use crate::vision::ImageBuffer;
use image::DynamicImage;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
enum Slot {
    Empty,
    Pixels(DynamicImage),
    Released,
}

/// Shared handle to pixel data
///
/// Copies of a `Mat` (including the ones Rhai makes when a script passes it
/// to a function) alias the same slot, so `cv::threshold(src, dst, ...)`
/// writes into the caller's `dst`.
#[derive(Clone)]
pub struct Mat {
    slot: Arc<RwLock<Slot>>,
}

impl Mat {
    pub fn empty() -> Self {
        Self::with_slot(Slot::Empty)
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self::with_slot(Slot::Pixels(image))
    }

    fn with_slot(slot: Slot) -> Self {
        Self {
            slot: Arc::new(RwLock::new(slot)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the pixels, if the handle is populated and live
    pub fn to_image(&self) -> Option<DynamicImage> {
        match &*self.read() {
            Slot::Pixels(image) => Some(image.clone()),
            _ => None,
        }
    }

    /// Run `f` against the pixels without copying them
    pub fn with_image<T>(&self, f: impl FnOnce(&DynamicImage) -> T) -> Result<T, MatError> {
        match &*self.read() {
            Slot::Pixels(image) => Ok(f(image)),
            Slot::Empty => Err(MatError::Empty),
            Slot::Released => Err(MatError::Released),
        }
    }

    /// Replace the contents; fails on a released handle
    pub fn set_image(&self, image: DynamicImage) -> Result<(), MatError> {
        let mut slot = self.write();
        if matches!(*slot, Slot::Released) {
            return Err(MatError::Released);
        }
        *slot = Slot::Pixels(image);
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.with_image(|image| image.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.with_image(|image| image.height()).unwrap_or(0)
    }

    pub fn channels(&self) -> u8 {
        self.with_image(|image| image.color().channel_count())
            .unwrap_or(0)
    }
}

impl ImageBuffer for Mat {
    fn duplicate(&self) -> Self {
        match &*self.read() {
            Slot::Pixels(image) => Mat::from_image(image.clone()),
            _ => Mat::empty(),
        }
    }

    fn is_empty(&self) -> bool {
        match &*self.read() {
            Slot::Pixels(image) => image.width() == 0 || image.height() == 0,
            Slot::Empty | Slot::Released => true,
        }
    }

    fn is_released(&self) -> bool {
        matches!(*self.read(), Slot::Released)
    }

    fn release(&self) {
        *self.write() = Slot::Released;
    }

    fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for Mat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.read() {
            Slot::Pixels(image) => write!(
                f,
                "Mat({}x{}, {} ch)",
                image.width(),
                image.height(),
                image.color().channel_count()
            ),
            Slot::Empty => write!(f, "Mat(empty)"),
            Slot::Released => write!(f, "Mat(released)"),
        }
    }
}

/// Misuse of a `Mat` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MatError {
    #[error("Mat is empty")]
    Empty,

    #[error("Mat was already released")]
    Released,
}
