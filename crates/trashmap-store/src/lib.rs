//! Flat-file result store: `detections.json`, `insights.json`, and an image
//! directory under a single data root.

mod files;
mod store;

use std::path::PathBuf;

use thiserror::Error;

pub use files::image_digest;
pub use store::ResultStore;

const DEFAULT_MAX_DETECTIONS: usize = 100;
const DEFAULT_MAX_INSIGHTS: usize = 288;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Oldest detections are evicted beyond this many; `0` keeps everything.
    pub max_detections: usize,
    /// Oldest insights are evicted beyond this many; `0` keeps everything.
    pub max_insights: usize,
}

impl StoreConfig {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_detections: DEFAULT_MAX_DETECTIONS,
            max_insights: DEFAULT_MAX_INSIGHTS,
        }
    }

    #[must_use]
    pub fn from_app_config(config: &trashmap_core::AppConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            max_detections: config.max_detections,
            max_insights: config.max_insights,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("detection '{0}' already exists")]
    Duplicate(String),

    #[error("record not found")]
    NotFound,

    #[error("invalid image name '{0}'")]
    InvalidImageName(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON encoding error for {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
