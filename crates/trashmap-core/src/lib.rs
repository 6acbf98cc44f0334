//! Shared domain types, configuration loading, and pure analytics for the
//! trash-detection backend.

pub mod analytics;
pub mod app_config;
pub mod config;
pub mod detection;
pub mod insight;

use thiserror::Error;

pub use analytics::{
    build_heatmap, compute_predictions, compute_stats, summarize, top_hotspots, HeatmapPoint,
    LocationTrend, PeakHour, Predictions, Stats, Summary, Trend,
};
pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use detection::{
    image_file_name, parse_timestamp, validate_detection_id, Contamination, DetectedItem,
    Detection, DetectionMetadata, DisposalCategory, GpsFix, UploadMetadata, ValidatedUpload,
};
pub use insight::{empty_insight, fallback_insight, Hotspot, Insight, InsightDraft, InsightSource};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Rejections raised while validating upload metadata.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("metadata is not valid JSON: {0}")]
    MalformedMetadata(String),

    #[error("metadata must include gps latitude and longitude")]
    MissingCoordinates,

    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("invalid detection_id '{0}': use 1-128 characters from [A-Za-z0-9_-]")]
    InvalidDetectionId(String),

    #[error("invalid timestamp '{0}': expected ISO-8601")]
    InvalidTimestamp(String),
}
