//! Image acquisition: local files or remote URLs, decoded up front

use image::DynamicImage;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors while loading a batch of images
///
/// Any single failure fails the whole load; no partial batch is produced.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("No images to load")]
    Empty,
}

/// A decoded image and its display name
#[derive(Debug, Clone)]
pub struct LoadedItem {
    pub name: String,
    pub image: DynamicImage,
}

/// Where a batch of images comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Local files picked by the user
    Files(Vec<PathBuf>),
    /// Remote (or relative) URLs, e.g. the bundled sample images
    Urls(Vec<String>),
}

impl ImageSource {
    pub fn len(&self) -> usize {
        match self {
            ImageSource::Files(paths) => paths.len(),
            ImageSource::Urls(urls) => urls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode every image in order
    pub async fn load(&self) -> Result<Vec<LoadedItem>, LoadError> {
        if self.is_empty() {
            return Err(LoadError::Empty);
        }

        let items = match self {
            ImageSource::Files(paths) => {
                let mut items = Vec::with_capacity(paths.len());
                for path in paths {
                    items.push(load_file(path).await?);
                }
                items
            }
            ImageSource::Urls(urls) => {
                let client = reqwest::Client::new();
                let mut items = Vec::with_capacity(urls.len());
                for url in urls {
                    items.push(load_url(&client, url).await?);
                }
                items
            }
        };

        info!("Loaded {} images", items.len());
        Ok(items)
    }
}

async fn load_file(path: &Path) -> Result<LoadedItem, LoadError> {
    debug!("Reading image file {}", path.display());
    let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    decode(&file_name, &bytes)
}

async fn load_url(client: &reqwest::Client, url: &str) -> Result<LoadedItem, LoadError> {
    debug!("Fetching image {}", url);
    let http_err = |source| LoadError::Http {
        url: url.to_string(),
        source,
    };
    let bytes = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(http_err)?
        .bytes()
        .await
        .map_err(http_err)?;
    decode(url_file_name(url), &bytes)
}

fn decode(file_name: &str, bytes: &[u8]) -> Result<LoadedItem, LoadError> {
    let image = image::load_from_memory(bytes).map_err(|source| LoadError::Decode {
        name: file_name.to_string(),
        source,
    })?;
    Ok(LoadedItem {
        name: derive_label(file_name).to_string(),
        image,
    })
}

/// Last path segment of a URL, ignoring any query or fragment
fn url_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Display label: the name without its last extension
///
/// A name whose only dot is the first character (".hidden") or that has no
/// dot at all is used as is.
pub fn derive_label(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    }
}
