use std::fmt::Write as _;

use trashmap_core::Summary;

pub(crate) const CLASSIFY_PROMPT: &str = r#"Analyze this image and identify any trash or waste items visible.

For each item you detect, provide:
1. "type": the kind of trash (e.g. plastic bottle, paper cup, cardboard box, glass bottle, aluminium can, food waste, cigarette butt)
2. "material": what it is made of (plastic, paper, cardboard, glass, metal, organic)
3. "confidence": your confidence from 0.0 to 1.0
4. "disposal_category": one of "recyclable", "compost", "landfill"
5. "contamination": one of "none", "low", "medium", "high"

Only identify actual trash or waste. Ignore people, buildings, vehicles and plants.
Respond with a JSON array only, for example:
[
  {
    "type": "plastic water bottle",
    "material": "plastic",
    "confidence": 0.95,
    "disposal_category": "recyclable",
    "contamination": "low"
  }
]
If no trash is visible, respond with an empty array: []"#;

/// Builds the insight prompt from pre-computed aggregates.
pub(crate) fn insight_prompt(summary: &Summary) -> String {
    let mut prompt = String::from(
        "Analyze this trash detection data and provide environmental insights.\n\n",
    );
    let _ = writeln!(prompt, "Total trash items detected: {}", summary.total_items);
    let _ = writeln!(
        prompt,
        "Number of locations scanned: {}",
        summary.detection_count
    );

    prompt.push_str("\nTrash breakdown:\n");
    for (kind, count) in &summary.trash_types {
        let _ = writeln!(prompt, "- {kind}: {count}");
    }

    prompt.push_str("\nTop trash hotspots:\n");
    for hotspot in &summary.hotspots {
        let _ = writeln!(
            prompt,
            "- {}: {} items (types: {})",
            hotspot.location,
            hotspot.items_count,
            hotspot.top_types.join(", ")
        );
    }

    prompt.push_str(
        "\nPlease provide:\n\
         1. A brief summary of the trash situation (2-3 sentences)\n\
         2. 3-5 specific, actionable recommendations for cleanup and prevention\n\
         3. Analysis of which locations need immediate attention and why\n\n\
         Respond with JSON using the keys \"summary\" (string), \"recommendations\" \
         (array of strings) and \"hotspot_analysis\" (array of strings). \
         Be encouraging and solution-focused.",
    );
    prompt
}
