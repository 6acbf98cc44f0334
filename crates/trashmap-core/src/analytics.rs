//! Derived views over the detection set: heatmap, stats, hotspots and
//! time-of-day predictions. Everything here is pure so both the HTTP layer and
//! the scheduled insight job can share it.

use std::collections::{BTreeMap, HashMap};

use chrono::Timelike;
use serde::Serialize;

use crate::detection::Detection;
use crate::insight::Hotspot;

/// Heatmap cell edge in degrees (~110 m of latitude).
pub const GRID_SIZE_DEG: f64 = 0.001;

/// Inverse of [`GRID_SIZE_DEG`]. Cell corners are `index / 1000.0`, which
/// lands on the nearest double to the 3-decimal value.
const CELLS_PER_DEGREE: f64 = 1000.0;

/// Item count at which a heatmap cell saturates at intensity 1.0.
const SATURATION_ITEMS: f64 = 10.0;

const MIN_DETECTIONS_FOR_PREDICTIONS: usize = 5;

/// `[latitude, longitude, intensity]`, the tuple shape Leaflet.heat consumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatmapPoint(pub f64, pub f64, pub f64);

/// Buckets detections onto a [`GRID_SIZE_DEG`] grid and weights each cell by
/// the number of items found in it.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn build_heatmap(detections: &[Detection]) -> Vec<HeatmapPoint> {
    let mut grid: BTreeMap<(i64, i64), usize> = BTreeMap::new();

    for detection in detections {
        let key = (
            grid_index(detection.gps.latitude),
            grid_index(detection.gps.longitude),
        );
        *grid.entry(key).or_default() += detection.item_count();
    }

    grid.into_iter()
        .map(|((lat_idx, lon_idx), items)| {
            let intensity = (items as f64 / SATURATION_ITEMS).min(1.0);
            HeatmapPoint(
                lat_idx as f64 / CELLS_PER_DEGREE,
                lon_idx as f64 / CELLS_PER_DEGREE,
                intensity,
            )
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn grid_index(coord: f64) -> i64 {
    (coord * CELLS_PER_DEGREE).round() as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_detections: usize,
    pub total_items: usize,
    pub trash_types: BTreeMap<String, usize>,
    pub disposal_categories: BTreeMap<String, usize>,
}

#[must_use]
pub fn compute_stats(detections: &[Detection]) -> Stats {
    let mut trash_types = BTreeMap::new();
    let mut disposal_categories = BTreeMap::new();

    for item in detections.iter().flat_map(|d| &d.detections) {
        *trash_types.entry(item.item_type.clone()).or_default() += 1;
        *disposal_categories
            .entry(item.disposal_category.to_string())
            .or_default() += 1;
    }

    Stats {
        total_detections: detections.len(),
        total_items: detections.iter().map(Detection::item_count).sum(),
        trash_types,
        disposal_categories,
    }
}

/// Ranks named locations by total items found there.
///
/// Ties break on location name so the output is stable. Each hotspot lists
/// up to three of its most frequent item types.
#[must_use]
pub fn top_hotspots(detections: &[Detection], limit: usize) -> Vec<Hotspot> {
    let mut by_location: HashMap<&str, (usize, BTreeMap<&str, usize>)> = HashMap::new();

    for detection in detections {
        let entry = by_location.entry(detection.gps.label()).or_default();
        entry.0 += detection.item_count();
        for item in &detection.detections {
            *entry.1.entry(item.item_type.as_str()).or_default() += 1;
        }
    }

    let mut hotspots: Vec<Hotspot> = by_location
        .into_iter()
        .map(|(location, (items_count, types))| {
            let mut ranked: Vec<(&str, usize)> = types.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            Hotspot {
                location: location.to_string(),
                items_count,
                top_types: ranked
                    .into_iter()
                    .take(3)
                    .map(|(t, _)| t.to_string())
                    .collect(),
            }
        })
        .collect();

    hotspots.sort_by(|a, b| {
        b.items_count
            .cmp(&a.items_count)
            .then_with(|| a.location.cmp(&b.location))
    });
    hotspots.truncate(limit);
    hotspots
}

/// Aggregates handed to the insight generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub detection_count: usize,
    pub total_items: usize,
    pub trash_types: BTreeMap<String, usize>,
    pub hotspots: Vec<Hotspot>,
}

impl Summary {
    /// Most frequent item type, ties broken alphabetically.
    #[must_use]
    pub fn most_common_type(&self) -> Option<&str> {
        self.trash_types
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(t, _)| t.as_str())
    }
}

#[must_use]
pub fn summarize(detections: &[Detection]) -> Summary {
    let stats = compute_stats(detections);
    Summary {
        detection_count: stats.total_detections,
        total_items: stats.total_items,
        trash_types: stats.trash_types,
        hotspots: top_hotspots(detections, 3),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeakHour {
    pub hour: u32,
    pub expected_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationTrend {
    pub location: String,
    pub visits: usize,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Predictions {
    pub peak_trash_hours: Vec<PeakHour>,
    pub high_risk_locations: Vec<LocationTrend>,
    pub recommendation: String,
}

/// Hour-of-day (UTC) and per-location patterns.
///
/// Returns `None` until at least five detections exist.
#[must_use]
pub fn compute_predictions(detections: &[Detection]) -> Option<Predictions> {
    if detections.len() < MIN_DETECTIONS_FOR_PREDICTIONS {
        return None;
    }

    let mut by_hour: BTreeMap<u32, usize> = BTreeMap::new();
    let mut visits: BTreeMap<&str, usize> = BTreeMap::new();
    for detection in detections {
        *by_hour.entry(detection.timestamp.hour()).or_default() += detection.item_count();
        *visits.entry(detection.gps.label()).or_default() += 1;
    }

    let mut hours: Vec<PeakHour> = by_hour
        .into_iter()
        .map(|(hour, expected_items)| PeakHour {
            hour,
            expected_items,
        })
        .collect();
    hours.sort_by(|a, b| {
        b.expected_items
            .cmp(&a.expected_items)
            .then_with(|| a.hour.cmp(&b.hour))
    });
    hours.truncate(3);

    let mut locations: Vec<LocationTrend> = visits
        .into_iter()
        .map(|(location, visits)| LocationTrend {
            location: location.to_string(),
            visits,
            trend: if visits > 2 {
                Trend::Increasing
            } else {
                Trend::Stable
            },
        })
        .collect();
    locations.sort_by(|a, b| b.visits.cmp(&a.visits).then_with(|| a.location.cmp(&b.location)));
    locations.truncate(5);

    let peak = hours.first().map_or(0, |h| h.hour);
    Some(Predictions {
        peak_trash_hours: hours,
        high_risk_locations: locations,
        recommendation: format!(
            "Focus patrols around {peak:02}:00 UTC when trash accumulation is highest."
        ),
    })
}

#[cfg(test)]
#[path = "analytics_test.rs"]
mod tests;
