//! Depth-breakdown calculator: how a discovery composes from origin
//! primitives, expressed as percentages.

use serde_json::{json, Map, Value};

use crate::services::origins;

/// Normalize a raw contribution value: fractions scale to percent, anything
/// else rounds. Result is always within [0, 100].
pub fn normalize_pct(v: f64) -> f64 {
    let v = if v <= 1.0 { v * 100.0 } else { v.round() };
    v.clamp(0.0, 100.0)
}

/// Luminance model for colors without a stored breakdown: black = 1−L,
/// white = L, each kept when ≥1%.
pub fn luminance_breakdown(r: i32, g: i32, b: i32) -> (Map<String, Value>, f64) {
    let lum = (r + g + b) as f64 / 765.0;
    let black = ((1.0 - lum) * 100.0).round();
    let white = (lum * 100.0).round();

    let mut map = Map::new();
    if black >= 1.0 {
        map.insert("black".to_string(), json!(black));
    }
    if white >= 1.0 {
        map.insert("white".to_string(), json!(white));
    }
    (map, black.max(white))
}

/// A stored color breakdown split into its destinations: color primitives
/// stay, opacity moves aside, preset/theme keys move to theme_breakdown.
#[derive(Debug, Default)]
pub struct SplitBreakdown {
    pub depth: Map<String, Value>,
    pub theme: Map<String, Value>,
    pub opacity_pct: Option<i32>,
    pub depth_pct: f64,
}

pub fn split_color_breakdown(raw: &Value) -> SplitBreakdown {
    let mut split = SplitBreakdown::default();
    let Some(obj) = raw.as_object() else {
        return split;
    };

    for (key, value) in obj {
        let Some(n) = value.as_f64() else { continue };
        let pct = normalize_pct(n);
        let key = key.trim().to_lowercase();
        if key == "opacity" {
            split.opacity_pct = Some(pct.round() as i32);
        } else if origins::is_color_primitive(&key) {
            split.depth.insert(key, json!(pct));
        } else if !key.is_empty() {
            split.theme.insert(key, json!(pct));
        }
    }

    let max_primitive = split
        .depth
        .values()
        .filter_map(Value::as_f64)
        .fold(0.0f64, f64::max);
    split.depth_pct = if split.depth.is_empty() {
        if split.theme.is_empty() && split.opacity_pct.is_none() {
            0.0
        } else {
            100.0
        }
    } else {
        max_primitive
    };
    split
}

/// Flattens a nested numeric map into dot-joined leaf paths. depth_pct is the
/// max leaf value.
pub fn flatten_blend_depths(raw: &Value) -> (Map<String, Value>, f64) {
    let mut out = Map::new();
    walk("", raw, &mut out);
    let max = out.values().filter_map(Value::as_f64).fold(0.0f64, f64::max);
    (out, max)
}

fn walk(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                walk(&path, v, out);
            }
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !prefix.is_empty() {
                    out.insert(prefix.to_string(), json!(normalize_pct(f)));
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pct() {
        assert_eq!(normalize_pct(0.42), 42.0);
        assert_eq!(normalize_pct(1.0), 100.0);
        assert_eq!(normalize_pct(37.4), 37.0);
        assert_eq!(normalize_pct(137.0), 100.0);
        assert_eq!(normalize_pct(-3.0), 0.0);
    }

    #[test]
    fn test_luminance_breakdown() {
        let (map, pct) = luminance_breakdown(0, 0, 0);
        assert_eq!(map.get("black").and_then(Value::as_f64), Some(100.0));
        assert!(map.get("white").is_none());
        assert_eq!(pct, 100.0);

        // L = 375/765 ≈ 0.49: both ends kept.
        let (map, pct) = luminance_breakdown(100, 125, 150);
        assert_eq!(map.get("black").and_then(Value::as_f64), Some(51.0));
        assert_eq!(map.get("white").and_then(Value::as_f64), Some(49.0));
        assert_eq!(pct, 51.0);
    }

    #[test]
    fn test_split_redirects_non_primitives() {
        let raw = json!({
            "black": 0.6,
            "opacity": 0.85,
            "neon_noir": 40,
            "teal": 12.0,
        });
        let split = split_color_breakdown(&raw);
        assert_eq!(split.depth.get("black").and_then(Value::as_f64), Some(60.0));
        assert_eq!(split.depth.get("teal").and_then(Value::as_f64), Some(12.0));
        assert!(split.depth.get("opacity").is_none());
        assert!(split.depth.get("neon_noir").is_none());
        assert_eq!(split.opacity_pct, Some(85));
        assert_eq!(
            split.theme.get("neon_noir").and_then(Value::as_f64),
            Some(40.0)
        );
        assert_eq!(split.depth_pct, 60.0);
    }

    #[test]
    fn test_split_theme_only_is_full_depth() {
        let split = split_color_breakdown(&json!({"vaporwave": 80}));
        assert!(split.depth.is_empty());
        assert_eq!(split.depth_pct, 100.0);
    }

    #[test]
    fn test_flatten_nested_maps() {
        let raw = json!({
            "gradient": {"linear": 0.7, "radial": 20},
            "noise": 5,
        });
        let (flat, max) = flatten_blend_depths(&raw);
        assert_eq!(
            flat.get("gradient.linear").and_then(Value::as_f64),
            Some(70.0)
        );
        assert_eq!(
            flat.get("gradient.radial").and_then(Value::as_f64),
            Some(20.0)
        );
        assert_eq!(flat.get("noise").and_then(Value::as_f64), Some(5.0));
        assert_eq!(max, 70.0);
    }
}
