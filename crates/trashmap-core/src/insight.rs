//! Insight records produced by the periodic summary job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics::Summary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotspot {
    pub location: String,
    pub items_count: usize,
    pub top_types: Vec<String>,
}

/// How the insight text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource {
    /// Written by the text model.
    Model,
    /// The model call failed; text is derived from the aggregates alone.
    Fallback,
    /// There were no detections to summarise.
    Empty,
}

/// Model-authored part of an insight, as parsed from the model's JSON reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InsightDraft {
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub hotspot_analysis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub insight_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub detection_count: usize,
    pub total_items: usize,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub hotspot_analysis: Vec<String>,
    pub hotspots: Vec<Hotspot>,
    pub source: InsightSource,
}

const FALLBACK_RECOMMENDATIONS: [&str; 4] = [
    "Focus cleanup efforts on high-traffic areas",
    "Install more recycling bins in detected hotspots",
    "Organize community cleanup events",
    "Increase public awareness about proper waste disposal",
];

impl Insight {
    #[must_use]
    pub fn from_draft(draft: InsightDraft, summary: &Summary, generated_at: DateTime<Utc>) -> Self {
        Self {
            insight_id: Uuid::new_v4(),
            generated_at,
            detection_count: summary.detection_count,
            total_items: summary.total_items,
            summary: draft.summary.trim().to_string(),
            recommendations: clean_lines(draft.recommendations),
            hotspot_analysis: clean_lines(draft.hotspot_analysis),
            hotspots: summary.hotspots.clone(),
            source: InsightSource::Model,
        }
    }
}

fn clean_lines(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Insight written when the store holds no detections.
#[must_use]
pub fn empty_insight(generated_at: DateTime<Utc>) -> Insight {
    Insight {
        insight_id: Uuid::new_v4(),
        generated_at,
        detection_count: 0,
        total_items: 0,
        summary: "No data available yet. Waiting for the robot to start detecting trash."
            .to_string(),
        recommendations: Vec::new(),
        hotspot_analysis: Vec::new(),
        hotspots: Vec::new(),
        source: InsightSource::Empty,
    }
}

/// Deterministic insight built from the aggregates when the model is unavailable.
#[must_use]
pub fn fallback_insight(summary: &Summary, generated_at: DateTime<Utc>) -> Insight {
    let most_common = summary.most_common_type().unwrap_or("none");
    Insight {
        insight_id: Uuid::new_v4(),
        generated_at,
        detection_count: summary.detection_count,
        total_items: summary.total_items,
        summary: format!(
            "Detected {} items across {} locations. Most common: {most_common}.",
            summary.total_items, summary.detection_count
        ),
        recommendations: FALLBACK_RECOMMENDATIONS
            .iter()
            .map(ToString::to_string)
            .collect(),
        hotspot_analysis: summary
            .hotspots
            .iter()
            .map(|h| format!("{}: {} items", h.location, h.items_count))
            .collect(),
        hotspots: summary.hotspots.clone(),
        source: InsightSource::Fallback,
    }
}
