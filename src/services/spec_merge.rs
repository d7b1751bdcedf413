// src/services/spec_merge.rs
use crate::errors::StudioError;
use crate::models::*;
use log::debug;
use serde_json::Value;
use std::collections::HashSet;

pub const DEFAULT_SILHOUETTE: &str = "oversized";

const PALETTE_FROM_A: usize = 2;
const PALETTE_FROM_B: usize = 1;
const MOTIFS_FROM_A: usize = 2;
const MOTIFS_FROM_B: usize = 1;
const MAX_MATERIALS: usize = 3;
const MAX_DETAILS: usize = 5;

/// Combines the per-image analyses into the spec of the fused design.
///
/// Both inputs must be JSON objects. List fields that are missing or not
/// arrays count as empty.
pub fn merge_specs(spec_a: &Value, spec_b: &Value) -> Result<FusionSpec, StudioError> {
    let a = spec_a
        .as_object()
        .ok_or_else(|| StudioError::Merge("specA is not a valid object".to_string()))?;
    let b = spec_b
        .as_object()
        .ok_or_else(|| StudioError::Merge("specB is not a valid object".to_string()))?;

    let mut palette: Vec<PaletteColor> = list(a.get("palette"))
        .iter()
        .take(PALETTE_FROM_A)
        .chain(list(b.get("palette")).iter().take(PALETTE_FROM_B))
        .filter_map(parse_color)
        .collect();

    let total_weight: f64 = palette.iter().map(|c| c.weight).sum();
    if total_weight > 0.0 {
        for color in palette.iter_mut() {
            color.weight /= total_weight;
        }
    }

    let silhouette = non_empty_str(a.get("silhouette"))
        .or_else(|| non_empty_str(b.get("silhouette")))
        .unwrap_or(DEFAULT_SILHOUETTE)
        .to_string();

    let materials = unique_strings(list(a.get("materials")), list(b.get("materials")), MAX_MATERIALS);

    let motif_abstractions: Vec<MotifAbstraction> = list(a.get("motif_abstractions"))
        .iter()
        .take(MOTIFS_FROM_A)
        .chain(list(b.get("motif_abstractions")).iter().take(MOTIFS_FROM_B))
        .filter_map(|m| serde_json::from_value(m.clone()).ok())
        .collect();

    let details = unique_strings(list(a.get("details")), list(b.get("details")), MAX_DETAILS);

    debug!(
        "Merged spec: palette={}, materials={}, motifs={}, details={}",
        palette.len(),
        materials.len(),
        motif_abstractions.len(),
        details.len()
    );

    Ok(FusionSpec {
        palette,
        silhouette,
        materials,
        motif_abstractions,
        details,
        ..FusionSpec::default()
    })
}

fn list(value: Option<&Value>) -> &[Value] {
    value
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn parse_color(value: &Value) -> Option<PaletteColor> {
    let color = value.as_object()?;
    Some(PaletteColor {
        name: color.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
        hex: color.get("hex").and_then(Value::as_str).unwrap_or("").to_string(),
        weight: color.get("weight").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

fn unique_strings(first: &[Value], second: &[Value], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .iter()
        .chain(second)
        .filter_map(Value::as_str)
        .filter(|s| seen.insert(*s))
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// Renders the text prompt sent to image generation.
pub fn spec_to_prompt(spec: &FusionSpec) -> String {
    let colors = spec
        .palette
        .iter()
        .map(|c| format!("{} ({}%)", c.name, (c.weight * 100.0).round()))
        .collect::<Vec<_>>()
        .join(", ");

    let motifs = spec
        .motif_abstractions
        .iter()
        .map(|m| {
            format!(
                "{} with {} style at {} scale on {}",
                m.operation,
                m.style,
                m.scale,
                m.placement.join("/")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");

    format!(
        "Fashion design with {} silhouette. Color palette: {}. Materials: {}. \
         Design elements: {}. Details: {}. \
         Professional fashion photography, full body shot, studio lighting, clean background.",
        spec.silhouette,
        colors,
        spec.materials.join(", "),
        motifs,
        spec.details.join(", ")
    )
}
