//! `ImageVision`: image operations exposed to step code under `cv::`
//!
//! Names and constants follow OpenCV so step snippets read the way image
//! people expect (`cv::cvt_color(src, dst, cv::COLOR_RGB2HSV)`), while the
//! pixels are handled by the `image` and `imageproc` crates.

use crate::vision::{mat::MatError, Mat, Vision};
use image::{DynamicImage, GrayImage, ImageBuffer as PixelBuffer, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity};
use rhai::{Engine, EvalAltResult, Module};
use std::sync::Arc;
use thiserror::Error;

pub const COLOR_RGBA2RGB: i64 = 1;
pub const COLOR_BGR2GRAY: i64 = 6;
pub const COLOR_RGB2GRAY: i64 = 7;
pub const COLOR_GRAY2RGB: i64 = 8;
pub const COLOR_GRAY2RGBA: i64 = 9;
pub const COLOR_RGBA2GRAY: i64 = 11;
pub const COLOR_RGB2HSV: i64 = 41;

pub const THRESH_BINARY: i64 = 0;
pub const THRESH_BINARY_INV: i64 = 1;
pub const THRESH_TRUNC: i64 = 2;
pub const THRESH_TOZERO: i64 = 3;
pub const THRESH_TOZERO_INV: i64 = 4;
pub const THRESH_OTSU: i64 = 8;

pub const MORPH_ERODE: i64 = 0;
pub const MORPH_DILATE: i64 = 1;
pub const MORPH_OPEN: i64 = 2;
pub const MORPH_CLOSE: i64 = 3;

/// Failure inside a vision operation
#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Mat(#[from] MatError),

    #[error("unsupported conversion code: {0}")]
    UnsupportedCode(i64),

    #[error("channel {index} out of range for a {channels}-channel image")]
    Channel { index: i64, channels: u8 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

type OpResult<T> = Result<T, OpError>;

fn script_err(e: OpError) -> Box<EvalAltResult> {
    e.to_string().into()
}

/// Vision capability backed by the `image`/`imageproc` crates
#[derive(Debug, Clone, Default)]
pub struct ImageVision;

impl ImageVision {
    pub fn new() -> Self {
        Self
    }
}

impl Vision for ImageVision {
    type Buffer = Mat;

    fn empty(&self) -> Mat {
        Mat::empty()
    }

    fn from_bitmap(&self, bitmap: &DynamicImage) -> Mat {
        Mat::from_image(bitmap.clone())
    }

    fn register(&self, engine: &mut Engine, cv: &mut Module) {
        register_mat_api(engine);
        register_constants(cv);
        register_operations(cv);
        engine.register_type_with_name::<Components>("Components");
        engine.register_fn("len", |c: &mut Components| c.len() as i64);
        engine.register_fn("area", |c: &mut Components, i: i64| {
            c.stat(i).map(|s| s.area as i64).unwrap_or(0)
        });
        engine.register_fn("width", |c: &mut Components, i: i64| {
            c.stat(i).map(|s| s.width() as i64).unwrap_or(0)
        });
        engine.register_fn("height", |c: &mut Components, i: i64| {
            c.stat(i).map(|s| s.height() as i64).unwrap_or(0)
        });
    }
}

fn register_mat_api(engine: &mut Engine) {
    engine.register_get("width", |m: &mut Mat| m.width() as i64);
    engine.register_get("height", |m: &mut Mat| m.height() as i64);
    engine.register_get("channels", |m: &mut Mat| m.channels() as i64);
    engine.register_fn(
        "copy_to",
        |src: &mut Mat, dst: Mat| -> Result<(), Box<EvalAltResult>> {
            copy_to(src, &dst).map_err(script_err)
        },
    );
}

fn register_constants(cv: &mut Module) {
    for (name, value) in [
        ("COLOR_RGBA2RGB", COLOR_RGBA2RGB),
        ("COLOR_BGR2GRAY", COLOR_BGR2GRAY),
        ("COLOR_RGB2GRAY", COLOR_RGB2GRAY),
        ("COLOR_GRAY2RGB", COLOR_GRAY2RGB),
        ("COLOR_GRAY2RGBA", COLOR_GRAY2RGBA),
        ("COLOR_RGBA2GRAY", COLOR_RGBA2GRAY),
        ("COLOR_RGB2HSV", COLOR_RGB2HSV),
        ("THRESH_BINARY", THRESH_BINARY),
        ("THRESH_BINARY_INV", THRESH_BINARY_INV),
        ("THRESH_TRUNC", THRESH_TRUNC),
        ("THRESH_TOZERO", THRESH_TOZERO),
        ("THRESH_TOZERO_INV", THRESH_TOZERO_INV),
        ("THRESH_OTSU", THRESH_OTSU),
        ("MORPH_ERODE", MORPH_ERODE),
        ("MORPH_DILATE", MORPH_DILATE),
        ("MORPH_OPEN", MORPH_OPEN),
        ("MORPH_CLOSE", MORPH_CLOSE),
    ] {
        cv.set_var(name, value);
    }
}

fn register_operations(cv: &mut Module) {
    cv.set_native_fn("cvt_color", |src: Mat, dst: Mat, code: i64| {
        cvt_color(&src, &dst, code).map_err(script_err)
    });
    cv.set_native_fn("extract_channel", |src: Mat, dst: Mat, index: i64| {
        extract_channel(&src, &dst, index).map_err(script_err)
    });
    cv.set_native_fn(
        "threshold",
        |src: Mat, dst: Mat, thresh: i64, max_value: i64, kind: i64| {
            threshold(&src, &dst, thresh, max_value, kind).map_err(script_err)
        },
    );
    cv.set_native_fn("gaussian_blur", |src: Mat, dst: Mat, sigma: f64| {
        gaussian_blur(&src, &dst, sigma).map_err(script_err)
    });
    cv.set_native_fn("canny", |src: Mat, dst: Mat, low: f64, high: f64| {
        canny(&src, &dst, low, high).map_err(script_err)
    });
    cv.set_native_fn(
        "morphology_ex",
        |src: Mat, dst: Mat, op: i64, kernel_w: i64, kernel_h: i64| {
            morphology_ex(&src, &dst, op, kernel_w, kernel_h).map_err(script_err)
        },
    );
    cv.set_native_fn("bitwise_not", |src: Mat, dst: Mat| {
        bitwise_not(&src, &dst).map_err(script_err)
    });
    cv.set_native_fn("copy_to", |src: Mat, dst: Mat| {
        copy_to(&src, &dst).map_err(script_err)
    });
    cv.set_native_fn("connected_components", |src: Mat| {
        Components::label(&src).map_err(script_err)
    });
    cv.set_native_fn(
        "erase_component",
        |dst: Mat, components: Components, index: i64| {
            components.erase(&dst, index).map_err(script_err)
        },
    );
}

// All operations read `src` into a new image before touching `dst`, so
// `src` and `dst` may be the same handle.

pub fn copy_to(src: &Mat, dst: &Mat) -> OpResult<()> {
    let image = src.with_image(|image| image.clone())?;
    dst.set_image(image)?;
    Ok(())
}

pub fn cvt_color(src: &Mat, dst: &Mat, code: i64) -> OpResult<()> {
    let converted = src.with_image(|image| match code {
        COLOR_RGBA2GRAY | COLOR_RGB2GRAY | COLOR_BGR2GRAY => {
            Ok(DynamicImage::ImageLuma8(image.to_luma8()))
        }
        COLOR_GRAY2RGB | COLOR_RGBA2RGB => Ok(DynamicImage::ImageRgb8(image.to_rgb8())),
        COLOR_GRAY2RGBA => Ok(DynamicImage::ImageRgba8(image.to_rgba8())),
        COLOR_RGB2HSV => Ok(DynamicImage::ImageRgb8(rgb_to_hsv(&image.to_rgb8()))),
        other => Err(OpError::UnsupportedCode(other)),
    })??;
    dst.set_image(converted)?;
    Ok(())
}

/// 8-bit HSV with H in [0, 180), S and V in [0, 255]
fn rgb_to_hsv(rgb: &RgbImage) -> RgbImage {
    let mut out = rgb.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b] = pixel.0.map(|c| c as f32);
        let v = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = v - min;
        let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };
        let mut h = if delta == 0.0 {
            0.0
        } else if v == r {
            60.0 * (g - b) / delta
        } else if v == g {
            120.0 + 60.0 * (b - r) / delta
        } else {
            240.0 + 60.0 * (r - g) / delta
        };
        if h < 0.0 {
            h += 360.0;
        }
        pixel.0 = [
            (h / 2.0).round().min(179.0) as u8,
            s.round() as u8,
            v as u8,
        ];
    }
    out
}

pub fn extract_channel(src: &Mat, dst: &Mat, index: i64) -> OpResult<()> {
    let channel = src.with_image(|image| {
        let channels = image.color().channel_count();
        if index < 0 || index >= channels as i64 {
            return Err(OpError::Channel { index, channels });
        }
        let raw = match channels {
            1 => image.to_luma8().into_raw(),
            2 => image.to_luma_alpha8().into_raw(),
            3 => image.to_rgb8().into_raw(),
            _ => image.to_rgba8().into_raw(),
        };
        let plane: Vec<u8> = raw
            .chunks_exact(channels as usize)
            .map(|px| px[index as usize])
            .collect();
        GrayImage::from_raw(image.width(), image.height(), plane)
            .ok_or_else(|| OpError::InvalidArgument("channel plane size mismatch".to_string()))
    })??;
    dst.set_image(DynamicImage::ImageLuma8(channel))?;
    Ok(())
}

/// OpenCV-style threshold; returns the level actually used
pub fn threshold(src: &Mat, dst: &Mat, thresh: i64, max_value: i64, kind: i64) -> OpResult<i64> {
    let gray = src.with_image(|image| image.to_luma8())?;
    let level = if kind & THRESH_OTSU != 0 {
        imageproc::contrast::otsu_level(&gray)
    } else {
        thresh.clamp(0, 255) as u8
    };
    let max_value = max_value.clamp(0, 255) as u8;
    let mode = kind & !THRESH_OTSU;
    if !(THRESH_BINARY..=THRESH_TOZERO_INV).contains(&mode) {
        return Err(OpError::UnsupportedCode(kind));
    }

    let out = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        let above = v > level;
        Luma([match mode {
            THRESH_BINARY => if above { max_value } else { 0 },
            THRESH_BINARY_INV => if above { 0 } else { max_value },
            THRESH_TRUNC => if above { level } else { v },
            THRESH_TOZERO => if above { v } else { 0 },
            _ => if above { 0 } else { v },
        }])
    });
    dst.set_image(DynamicImage::ImageLuma8(out))?;
    Ok(level as i64)
}

pub fn gaussian_blur(src: &Mat, dst: &Mat, sigma: f64) -> OpResult<()> {
    if sigma <= 0.0 {
        return Err(OpError::InvalidArgument(format!(
            "sigma must be positive, got {}",
            sigma
        )));
    }
    let blurred = src.with_image(|image| match image {
        DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(
            imageproc::filter::gaussian_blur_f32(gray, sigma as f32),
        ),
        other => other.blur(sigma as f32),
    })?;
    dst.set_image(blurred)?;
    Ok(())
}

pub fn canny(src: &Mat, dst: &Mat, low: f64, high: f64) -> OpResult<()> {
    if low > high {
        return Err(OpError::InvalidArgument(
            "canny low threshold exceeds high threshold".to_string(),
        ));
    }
    let gray = src.with_image(|image| image.to_luma8())?;
    let edges = imageproc::edges::canny(&gray, low as f32, high as f32);
    dst.set_image(DynamicImage::ImageLuma8(edges))?;
    Ok(())
}

pub fn morphology_ex(src: &Mat, dst: &Mat, op: i64, kernel_w: i64, kernel_h: i64) -> OpResult<()> {
    // A rectangular kernel becomes a square L-inf neighbourhood with the
    // larger half-extent.
    let radius = (kernel_w.max(kernel_h) / 2).clamp(1, 255) as u8;
    let gray = src.with_image(|image| image.to_luma8())?;
    let out = match op {
        MORPH_ERODE => imageproc::morphology::erode(&gray, Norm::LInf, radius),
        MORPH_DILATE => imageproc::morphology::dilate(&gray, Norm::LInf, radius),
        MORPH_OPEN => imageproc::morphology::open(&gray, Norm::LInf, radius),
        MORPH_CLOSE => imageproc::morphology::close(&gray, Norm::LInf, radius),
        other => return Err(OpError::UnsupportedCode(other)),
    };
    dst.set_image(DynamicImage::ImageLuma8(out))?;
    Ok(())
}

pub fn bitwise_not(src: &Mat, dst: &Mat) -> OpResult<()> {
    let mut image = src.with_image(|image| image.clone())?;
    image.invert();
    dst.set_image(image)?;
    Ok(())
}

/// Bounding box and pixel count of one connected component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStats {
    pub area: u64,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl ComponentStats {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// 8-connected foreground components of a gray image (background is 0)
#[derive(Debug, Clone)]
pub struct Components {
    labels: Arc<PixelBuffer<Luma<u32>, Vec<u32>>>,
    stats: Arc<Vec<ComponentStats>>,
}

impl Components {
    pub fn label(src: &Mat) -> OpResult<Self> {
        let gray = src.with_image(|image| image.to_luma8())?;
        let labels = connected_components(&gray, Connectivity::Eight, Luma([0u8]));

        let mut stats: Vec<ComponentStats> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if stats.len() < label {
                stats.resize(
                    label,
                    ComponentStats {
                        area: 0,
                        min_x: u32::MAX,
                        min_y: u32::MAX,
                        max_x: 0,
                        max_y: 0,
                    },
                );
            }
            let s = &mut stats[label - 1];
            s.area += 1;
            s.min_x = s.min_x.min(x);
            s.min_y = s.min_y.min(y);
            s.max_x = s.max_x.max(x);
            s.max_y = s.max_y.max(y);
        }

        Ok(Self {
            labels: Arc::new(labels),
            stats: Arc::new(stats),
        })
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn stat(&self, index: i64) -> Option<&ComponentStats> {
        usize::try_from(index).ok().and_then(|i| self.stats.get(i))
    }

    /// Paint component `index` black in `dst`
    pub fn erase(&self, dst: &Mat, index: i64) -> OpResult<()> {
        if self.stat(index).is_none() {
            return Err(OpError::InvalidArgument(format!(
                "component {} out of range ({} components)",
                index,
                self.len()
            )));
        }
        let target = index as u32 + 1;
        let mut gray = dst.with_image(|image| image.to_luma8())?;
        if gray.dimensions() != self.labels.dimensions() {
            return Err(OpError::InvalidArgument(
                "destination size differs from labelled image".to_string(),
            ));
        }
        for (x, y, label) in self.labels.enumerate_pixels() {
            if label[0] == target {
                gray.put_pixel(x, y, Luma([0]));
            }
        }
        dst.set_image(DynamicImage::ImageLuma8(gray))?;
        Ok(())
    }
}
