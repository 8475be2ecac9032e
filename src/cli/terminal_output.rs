//! Terminal presenter
//!
//! Prints one row per step and writes every intermediate image to disk:
//!
//! ```text
//! <out>/00_original/<label>.png
//! <out>/01_<step-slug>/<label>.png
//! ...
//! <out>/final/<label>.png
//! ```

use crate::cli::output::{create_progress_bar, style, CHECK, CROSS, INFO, PICTURE, WARN};
use crate::execution::{Batch, Presenter, StepView};
use crate::vision::{LoadedItem, Mat};
use image::DynamicImage;
use indicatif::ProgressBar;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::{debug, warn};

fn non_slug_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"))
}

fn unsafe_file_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1f]+"#).expect("valid file name regex"))
}

fn output_dir_entry() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2}_.+|final)$").expect("valid entry regex"))
}

/// `Remove Small Blobs (syntax error)` -> `remove-small-blobs-syntax-error`
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    let slug = non_slug_chars().replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "step".to_string()
    } else {
        slug.to_string()
    }
}

/// Image label as a file name; an empty label becomes `Image <n>`
pub fn image_file_name(label: &str, position: usize) -> String {
    let label = if label.trim().is_empty() {
        format!("Image {}", position)
    } else {
        label.to_string()
    };
    format!("{}.png", unsafe_file_chars().replace_all(&label, "_"))
}

/// Presenter that writes PNGs under an output directory
pub struct TerminalPresenter {
    out_dir: PathBuf,
    progress: Mutex<Option<ProgressBar>>,
    show_progress: bool,
}

impl TerminalPresenter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            progress: Mutex::new(None),
            show_progress: true,
        }
    }

    /// No progress bar, for non-interactive use
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn print(&self, line: String) {
        match &*self.progress.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }

    fn write_images<'a>(&self, dir_name: &str, images: impl Iterator<Item = (&'a str, Option<DynamicImage>)>) {
        let dir = self.out_dir.join(dir_name);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("Failed to create {}: {}", dir.display(), e);
            return;
        }
        for (position, (label, image)) in images.enumerate() {
            let path = dir.join(image_file_name(label, position + 1));
            match image {
                Some(image) => {
                    if let Err(e) = image.save(&path) {
                        warn!("Failed to write {}: {}", path.display(), e);
                    }
                }
                None => debug!("Skipping empty image {}", path.display()),
            }
        }
    }

    fn finish_progress(&self) {
        if let Some(bar) = self.progress.lock().unwrap_or_else(|e| e.into_inner()).take() {
            bar.finish_and_clear();
        }
    }
}

impl Presenter<Mat> for TerminalPresenter {
    fn clear(&self) {
        self.finish_progress();
        let Ok(entries) = std::fs::read_dir(&self.out_dir) else {
            return;
        };
        // Only remove what an earlier run wrote.
        for entry in entries.flatten() {
            let name = entry.file_name();
            if output_dir_entry().is_match(&name.to_string_lossy()) && entry.path().is_dir() {
                if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                    warn!("Failed to remove {}: {}", entry.path().display(), e);
                }
            }
        }
    }

    fn render_originals(&self, items: &[LoadedItem]) {
        println!(
            "{}Loaded {} images: {}",
            PICTURE,
            style(items.len()).cyan(),
            items
                .iter()
                .map(|i| i.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.write_images(
            "00_original",
            items.iter().map(|i| (i.name.as_str(), Some(i.image.clone()))),
        );
    }

    fn render_step(&self, view: StepView<'_, Mat>) {
        if self.show_progress {
            let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
            if progress.is_none() {
                *progress = Some(create_progress_bar(view.total));
            }
            if let Some(bar) = progress.as_ref() {
                bar.set_message(view.name.to_string());
            }
        }

        let dir_name = format!("{:02}_{}", view.index + 1, slugify(view.name));
        self.write_images(
            &dir_name,
            view.batch.iter().map(|(label, mat)| (label, mat.to_image())),
        );

        let header = format!(
            "[{}/{}] {}",
            view.index + 1,
            view.total,
            style(view.name).bold()
        );
        if let Some(e) = view.syntax_error {
            self.print(format!("{}{} {}", WARN, header, style(e).yellow()));
        } else if let Some(item) = view.error {
            let others = view.fallbacks.saturating_sub(1);
            let more = if others > 0 {
                format!(" (+{} more)", others)
            } else {
                String::new()
            };
            self.print(format!(
                "{}{} failed on '{}'{}: {}",
                CROSS,
                header,
                item.label,
                more,
                style(&item.error).red()
            ));
        } else {
            self.print(format!("{}{}", CHECK, header));
        }

        if let Some(bar) = self.progress.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            bar.inc(1);
        }
        if view.index + 1 == view.total {
            self.finish_progress();
        }
    }

    fn show_final_result(&self, batch: &Batch<Mat>) {
        self.finish_progress();
        self.write_images(
            "final",
            batch.iter().map(|(label, mat)| (label, mat.to_image())),
        );
        println!(
            "{}Final results ({} images) in {}",
            INFO,
            style(batch.len()).cyan(),
            style(self.out_dir.join("final").display()).underlined()
        );
        for (position, (label, mat)) in batch.iter().enumerate() {
            let label = if label.trim().is_empty() {
                format!("Image {}", position + 1)
            } else {
                label.to_string()
            };
            println!(
                "   {} {}",
                style(label).bold(),
                style(format!("{}x{}, {} ch", mat.width(), mat.height(), mat.channels())).dim()
            );
        }
    }

    fn show_no_images(&self, reason: &str) {
        self.finish_progress();
        println!("{}{}", WARN, style(reason).yellow());
    }
}
