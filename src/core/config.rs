//! Application configuration from YAML

use crate::core::{defaults, StepTemplate};
use crate::vision::ImageSource;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage key the step list is saved under unless configured otherwise
pub const DEFAULT_STORAGE_KEY: &str = "image_pipeline_steps";

/// Top-level configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where step definitions are persisted
    #[serde(default)]
    pub storage: StorageConfig,

    /// Images processed when no source is given on the command line
    #[serde(default = "defaults::default_images")]
    pub default_images: Vec<String>,

    /// Limits applied to step code
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Directory result images are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Replaces the built-in default steps when seeding an empty store
    #[serde(default)]
    pub default_steps: Option<Vec<StepTemplate>>,
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: StorageKind,

    /// Database file (sqlite) or directory (file); a per-user data
    /// directory when omitted
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Key the step list is stored under
    #[serde(default = "default_storage_key")]
    pub key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            path: None,
            key: default_storage_key(),
        }
    }
}

impl StorageConfig {
    /// Configured path, or the per-user default for the backend
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("image-pipeline");
        match self.backend {
            StorageKind::Sqlite => data_dir.join("steps.db"),
            StorageKind::File | StorageKind::Memory => data_dir.join("steps"),
        }
    }
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Sqlite,
    File,
    Memory,
}

impl Default for StorageKind {
    fn default() -> Self {
        if cfg!(feature = "sqlite") {
            StorageKind::Sqlite
        } else {
            StorageKind::File
        }
    }
}

/// Resource limits for the step scripting engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Maximum operations per step invocation (0 = unlimited)
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Maximum function call nesting
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Maximum expression nesting depth
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    /// Maximum string length in bytes
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Maximum array length
    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_array_size(),
        }
    }
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("pipeline-output")
}

fn default_max_operations() -> u64 {
    10_000_000
}

fn default_max_call_levels() -> usize {
    32
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_string_size() -> usize {
    1 << 20
}

fn default_max_array_size() -> usize {
    100_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            default_images: defaults::default_images(),
            sandbox: SandboxConfig::default(),
            output_dir: default_output_dir(),
            default_steps: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path if given, else the per-user config file if it exists,
    /// else built-in defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::user_config_path() {
            Some(path) if path.exists() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/image-pipeline/config.yaml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("image-pipeline").join("config.yaml"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.key.trim().is_empty() {
            anyhow::bail!("Storage key must not be empty");
        }

        if self.sandbox.max_call_levels == 0 {
            anyhow::bail!("sandbox.max_call_levels must be at least 1");
        }
        if self.sandbox.max_expr_depth == 0 {
            anyhow::bail!("sandbox.max_expr_depth must be at least 1");
        }

        let remote = self.default_images.iter().filter(|s| is_url(s)).count();
        if remote != 0 && remote != self.default_images.len() {
            anyhow::bail!("default_images must be all URLs or all file paths, not a mix");
        }

        if let Some(steps) = &self.default_steps {
            for (i, step) in steps.iter().enumerate() {
                if step.name.trim().is_empty() {
                    anyhow::bail!("default_steps[{}] has an empty name", i);
                }
            }
        }

        Ok(())
    }

    /// Steps used to seed an empty store
    pub fn seed_steps(&self) -> Vec<StepTemplate> {
        self.default_steps
            .clone()
            .unwrap_or_else(defaults::default_steps)
    }

    /// Source for the configured default images
    pub fn default_source(&self) -> ImageSource {
        source_from_locations(&self.default_images)
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Treat locations as URLs when they all carry an http(s) scheme, else as
/// file paths
pub fn source_from_locations<S: AsRef<str>>(locations: &[S]) -> ImageSource {
    if !locations.is_empty() && locations.iter().all(|l| is_url(l.as_ref())) {
        ImageSource::Urls(locations.iter().map(|l| l.as_ref().to_string()).collect())
    } else {
        ImageSource::Files(locations.iter().map(|l| PathBuf::from(l.as_ref())).collect())
    }
}
