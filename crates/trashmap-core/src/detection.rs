//! Detection records and the upload metadata they are built from.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::ValidationError;

const MAX_DETECTION_ID_LEN: usize = 128;

/// Where a classified item belongs once collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum DisposalCategory {
    Recyclable,
    Compost,
    Landfill,
    #[default]
    Unknown,
}

impl From<Option<String>> for DisposalCategory {
    fn from(raw: Option<String>) -> Self {
        raw.map_or(Self::Unknown, Self::from)
    }
}

impl From<String> for DisposalCategory {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "recyclable" | "recycle" | "recycling" => Self::Recyclable,
            "compost" | "compostable" | "organic" => Self::Compost,
            "landfill" | "trash" | "garbage" => Self::Landfill,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DisposalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recyclable => write!(f, "recyclable"),
            Self::Compost => write!(f, "compost"),
            Self::Landfill => write!(f, "landfill"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// How soiled an item is; drives whether a recyclable actually gets recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum Contamination {
    None,
    Low,
    Medium,
    High,
    #[default]
    Unknown,
}

impl From<Option<String>> for Contamination {
    fn from(raw: Option<String>) -> Self {
        raw.map_or(Self::Unknown, Self::from)
    }
}

impl From<String> for Contamination {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "clean" => Self::None,
            "low" => Self::Low,
            "medium" | "moderate" => Self::Medium,
            "high" | "heavy" => Self::High,
            _ => Self::Unknown,
        }
    }
}

/// One item the classifier found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedItem {
    #[serde(rename = "type", deserialize_with = "lenient_text")]
    pub item_type: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub material: String,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub disposal_category: DisposalCategory,
    #[serde(default)]
    pub contamination: Contamination,
}

/// `null` reads as an empty string.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Models sometimes quote the score (`"0.8"`) or send `null`; anything that is
/// not a number reads as `0.0`.
fn lenient_confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

impl DetectedItem {
    /// Trims text fields and clamps confidence into `[0, 1]`.
    ///
    /// Returns `None` for items without a type, which carry no usable
    /// classification.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let item_type = self.item_type.trim().to_string();
        if item_type.is_empty() {
            return None;
        }
        let material = match self.material.trim() {
            "" => "unknown".to_string(),
            m => m.to_lowercase(),
        };
        let confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(Self {
            item_type,
            material,
            confidence,
            disposal_category: self.disposal_category,
            contamination: self.contamination,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
}

impl GpsFix {
    /// Checks the coordinate pair is finite and within WGS-84 bounds.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::LatitudeOutOfRange(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::LongitudeOutOfRange(self.longitude));
        }
        Ok(())
    }

    /// Location label used for grouping; unnamed fixes share `"Unknown"`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.location_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawGps {
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy: Option<f64>,
    location_name: Option<String>,
}

/// Metadata part of an upload, as sent by the producer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadMetadata {
    pub detection_id: Option<String>,
    pub timestamp: Option<String>,
    pub device_id: Option<String>,
    gps: Option<RawGps>,
    pub sensors: Option<Value>,
}

/// Upload metadata after validation; every field is ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUpload {
    pub detection_id: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub gps: GpsFix,
    pub sensors: Option<Value>,
}

impl UploadMetadata {
    /// Parses the `metadata` form field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedMetadata`] when the text is not a
    /// JSON object of the expected shape.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|e| ValidationError::MalformedMetadata(e.to_string()))
    }

    /// Validates coordinates, identifier and timestamp, filling in defaults
    /// relative to `received_at`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate(self, received_at: DateTime<Utc>) -> Result<ValidatedUpload, ValidationError> {
        let raw_gps = self.gps.unwrap_or_default();
        let (Some(latitude), Some(longitude)) = (raw_gps.latitude, raw_gps.longitude) else {
            return Err(ValidationError::MissingCoordinates);
        };
        let gps = GpsFix {
            latitude,
            longitude,
            accuracy: raw_gps.accuracy.filter(|a| a.is_finite() && *a >= 0.0),
            location_name: raw_gps
                .location_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        };
        gps.validate()?;

        let detection_id = match self.detection_id {
            Some(id) => {
                validate_detection_id(&id)?;
                id
            }
            None => generate_detection_id(received_at),
        };

        let timestamp = match self.timestamp.as_deref().map(str::trim) {
            Some(ts) if !ts.is_empty() => parse_timestamp(ts)?,
            _ => received_at,
        };

        let device_id = self
            .device_id
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ValidatedUpload {
            detection_id,
            timestamp,
            device_id,
            gps,
            sensors: self.sensors.filter(|s| !s.is_null()),
        })
    }
}

/// Identifiers double as image file names, so only `[A-Za-z0-9_-]` is allowed.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidDetectionId`] for empty, overlong, or
/// otherwise unsafe identifiers.
pub fn validate_detection_id(id: &str) -> Result<(), ValidationError> {
    let ok = !id.is_empty()
        && id.len() <= MAX_DETECTION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidDetectionId(id.to_string()))
    }
}

fn generate_detection_id(at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("det_{}_{}", at.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Parses RFC 3339, falling back to naive ISO-8601 interpreted as UTC.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidTimestamp`] if no format matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetadata {
    pub device_id: String,
    pub model_version: String,
    pub total_items: usize,
}

/// A classified frame as persisted in the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub detection_id: String,
    pub timestamp: DateTime<Utc>,
    pub gps: GpsFix,
    pub detections: Vec<DetectedItem>,
    pub image_url: String,
    pub image_sha256: String,
    pub metadata: DetectionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Value>,
}

impl Detection {
    /// Builds a record from a validated upload and the classifier's items.
    ///
    /// Returns `None` when `items` is empty: frames without trash are never
    /// stored.
    #[must_use]
    pub fn from_classification(
        upload: ValidatedUpload,
        items: Vec<DetectedItem>,
        image_sha256: String,
        model_version: &str,
    ) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        let image_url = format!("/images/{}", image_file_name(&upload.detection_id));
        Some(Self {
            metadata: DetectionMetadata {
                device_id: upload.device_id,
                model_version: model_version.to_string(),
                total_items: items.len(),
            },
            detection_id: upload.detection_id,
            timestamp: upload.timestamp,
            gps: upload.gps,
            detections: items,
            image_url,
            image_sha256,
            sensors: upload.sensors,
        })
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.detections.len()
    }

    #[must_use]
    pub fn image_file_name(&self) -> String {
        image_file_name(&self.detection_id)
    }
}

/// File name under the image directory for a detection id.
#[must_use]
pub fn image_file_name(detection_id: &str) -> String {
    format!("{detection_id}.jpeg")
}

#[cfg(test)]
#[path = "detection_test.rs"]
mod tests;
