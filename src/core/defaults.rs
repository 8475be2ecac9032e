//! Built-in steps seeded into an empty store

use crate::core::StepTemplate;

/// Code given to a step added without any
pub const NEW_STEP_CODE: &str = "src.copy_to(dst);";

const HSV: &str = "cv::cvt_color(src, dst, cv::COLOR_RGB2HSV);";

const SATURATION: &str = "\
// The saturation channel separates this kind of captcha best
cv::extract_channel(src, dst, 1);";

const OTSU: &str = "cv::threshold(src, dst, 0, 255, cv::THRESH_BINARY | cv::THRESH_OTSU);";

const REMOVE_SMALL_BLOBS: &str = "\
src.copy_to(dst);
let blobs = cv::connected_components(src);

let max_area = 0;
for i in 0..blobs.len() {
    if blobs.area(i) > max_area { max_area = blobs.area(i); }
}

let min_area = max_area.to_float() * 0.15;
if min_area < 80.0 { min_area = 80.0; }

for i in 0..blobs.len() {
    let w = blobs.width(i).to_float();
    let h = blobs.height(i).to_float();

    let is_trash = blobs.area(i).to_float() < min_area || h < 10.0;
    // Tall, thin strokes are characters like i, l and 1
    let is_skinny_char = h > 12.0 && w / h < 0.4;

    if is_trash && !is_skinny_char {
        cv::erase_component(dst, blobs, i);
    }
}";

const MORPH_CLOSE: &str = "cv::morphology_ex(src, dst, cv::MORPH_CLOSE, 3, 2);";

const BITWISE_NOT: &str = "cv::bitwise_not(src, dst);";

/// The default pipeline, in execution order
pub fn default_steps() -> Vec<StepTemplate> {
    vec![
        StepTemplate::new("hsv", HSV),
        StepTemplate::new("get channel s", SATURATION),
        StepTemplate::new("otsu", OTSU),
        StepTemplate::new("remove small blobs", REMOVE_SMALL_BLOBS),
        StepTemplate::new("morph close", MORPH_CLOSE),
        StepTemplate::new("bitwise not", BITWISE_NOT),
    ]
}

/// Sample images used when no source is given
pub fn default_images() -> Vec<String> {
    (1..=6).map(|i| format!("img/{}.jpg", i)).collect()
}
