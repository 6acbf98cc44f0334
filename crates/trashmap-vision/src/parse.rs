//! Turning model text into typed values.

use serde_json::Value;
use trashmap_core::{DetectedItem, InsightDraft};

use crate::error::VisionError;

/// Returns the body of the first markdown code fence, or the whole text when
/// there is none. A ```` ```json ```` fence wins over a bare one.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let inner = if let Some((_, rest)) = text.split_once("```json") {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some((_, rest)) = text.split_once("```") {
        rest.split("```").next().unwrap_or(rest)
    } else {
        text
    };
    inner.trim()
}

/// Parses a classification reply into normalized items.
///
/// The reply must be a JSON array (optionally fenced). Individual entries that
/// do not look like an item are skipped rather than failing the whole frame,
/// but a non-empty array with no usable entry is an error: `[]` is the only
/// way to say "no trash".
pub(crate) fn parse_items(text: &str) -> Result<Vec<DetectedItem>, VisionError> {
    let raw: Vec<Value> =
        serde_json::from_str(strip_code_fences(text)).map_err(|source| VisionError::Deserialize {
            context: "classification items".to_string(),
            source,
        })?;

    let total = raw.len();
    let items: Vec<DetectedItem> = raw
        .into_iter()
        .filter_map(|value| serde_json::from_value::<DetectedItem>(value).ok())
        .filter_map(DetectedItem::normalized)
        .collect();

    if total > 0 && items.is_empty() {
        return Err(VisionError::Deserialize {
            context: "classification items".to_string(),
            source: serde::de::Error::custom(format!(
                "none of the {total} returned entries is a usable item"
            )),
        });
    }
    if items.len() < total {
        tracing::debug!(
            skipped = total - items.len(),
            kept = items.len(),
            "vision: dropped malformed classification entries"
        );
    }
    Ok(items)
}

pub(crate) fn parse_insight(text: &str) -> Result<InsightDraft, VisionError> {
    let draft: InsightDraft =
        serde_json::from_str(strip_code_fences(text)).map_err(|source| VisionError::Deserialize {
            context: "insight draft".to_string(),
            source,
        })?;
    if draft.summary.trim().is_empty() {
        return Err(VisionError::EmptyResponse("insight summary".to_string()));
    }
    Ok(draft)
}
