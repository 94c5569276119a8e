use axum::extract::{Query, State};
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

use crate::error::ApiError;
use crate::models::{Interpretation, LearnedBlend, LinguisticVariant, NarrativeEntry, StaticColor, StaticSound};
use crate::services::registry_service::parse_color_key;
use crate::services::{depth, origins, progress};
use crate::AppState;

const LIMIT_MAX: i64 = 500;
/// Entries seen fewer times than this display their raw value, not the
/// allocated name.
const NARRATIVE_NAME_MIN_COUNT: i32 = 5;

#[derive(Debug, Deserialize)]
pub struct RegistriesQuery {
    pub limit: Option<i64>,
}

/// Max stored contribution, used as the headline depth of a row.
fn stored_depth_pct(raw: Option<&str>) -> Option<f64> {
    let parsed: Value = serde_json::from_str(raw?).ok()?;
    let obj = parsed.as_object()?;
    let max = obj
        .values()
        .filter_map(Value::as_f64)
        .fold(f64::NEG_INFINITY, f64::max);
    if max.is_finite() {
        Some(max)
    } else {
        None
    }
}

fn parse_json(raw: Option<&str>) -> Value {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or(Value::Null)
}

/// Second and later occurrences of a display name get the key appended.
fn disambiguate(entries: &mut [Value]) {
    let mut seen: HashSet<String> = HashSet::new();
    for entry in entries.iter_mut() {
        let name = match entry.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if seen.insert(name.clone()) {
            continue;
        }
        let key = entry
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        entry["name"] = json!(format!("{name} ({key})"));
    }
}

fn fix_narrative_typo(text: &str) -> String {
    let lower = text.to_lowercase();
    for (wrong, right) in origins::NARRATIVE_TYPO_FIXES {
        if lower == wrong {
            return right.to_string();
        }
    }
    text.to_string()
}

fn profile_entries(
    rows: Vec<(String, String, i32, Option<String>)>,
    origin_keys: &[&str],
    prefix_match: bool,
) -> Vec<Value> {
    let mut entries: Vec<Value> = rows
        .iter()
        .map(|(key, name, count, depth_json)| {
            json!({
                "key": key,
                "name": name,
                "count": count,
                "depth_pct": stored_depth_pct(depth_json.as_deref()),
                "depth_breakdown": parse_json(depth_json.as_deref()),
            })
        })
        .collect();

    for origin in origin_keys {
        let discovered = rows.iter().any(|(key, _, _, _)| {
            key == origin || (prefix_match && key.starts_with(&format!("{origin}_")))
        });
        if !discovered {
            entries.push(json!({
                "key": origin,
                "name": origin,
                "count": 0,
                "origin": true,
            }));
        }
    }

    disambiguate(&mut entries);
    entries
}

macro_rules! load_profiles {
    ($conn:expr, $tables:expr, $limit:expr, $table:ident) => {{
        if $tables.has(stringify!($table)) {
            use crate::schema::$table::dsl;
            dsl::$table
                .order(dsl::count.desc())
                .limit($limit)
                .select((
                    dsl::profile_key,
                    dsl::name,
                    dsl::count,
                    dsl::depth_breakdown_json,
                ))
                .load::<(String, String, i32, Option<String>)>($conn)?
        } else {
            Vec::new()
        }
    }};
}

/// The three-tier composite the UI renders: fixed primitives, canonical
/// dynamic sets, and everything discovered so far.
pub async fn get_registries(
    State(state): State<AppState>,
    Query(query): Query<RegistriesQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(200).clamp(1, LIMIT_MAX);
    let mut conn = state.conn()?;
    let tables = &state.tables;

    // Static tier: per-frame colors and sounds, origins always present.
    let mut static_colors: Vec<Value> = Vec::new();
    let mut seen_color_keys: HashSet<String> = HashSet::new();
    if tables.has("static_colors") {
        use crate::schema::static_colors::dsl;
        let rows: Vec<StaticColor> = dsl::static_colors
            .order(dsl::count.desc())
            .limit(limit)
            .select(StaticColor::as_select())
            .load(&mut conn)?;
        for row in rows {
            // Legacy rows may still carry an opacity suffix in the key.
            let key = match parse_color_key(&row.color_key) {
                Some((r, g, b, _)) => format!("{r},{g},{b}"),
                None => row.color_key.clone(),
            };
            seen_color_keys.insert(key.clone());
            let depth_pct = stored_depth_pct(row.depth_breakdown_json.as_deref())
                .unwrap_or_else(|| depth::luminance_breakdown(row.r, row.g, row.b).1);
            static_colors.push(json!({
                "key": key,
                "name": row.name,
                "count": row.count,
                "depth_pct": depth_pct,
                "depth_breakdown": parse_json(row.depth_breakdown_json.as_deref()),
                "opacity_pct": row.opacity_pct,
                "theme_breakdown": parse_json(row.theme_breakdown_json.as_deref()),
            }));
        }
    }
    for (name, r, g, b) in origins::COLOR_PRIMITIVES {
        let key = format!("{r},{g},{b}");
        if !seen_color_keys.contains(&key) {
            let (breakdown, depth_pct) = depth::luminance_breakdown(r, g, b);
            static_colors.push(json!({
                "key": key,
                "name": name,
                "count": 0,
                "origin": true,
                "depth_pct": depth_pct,
                "depth_breakdown": Value::Object(breakdown),
            }));
        }
    }
    disambiguate(&mut static_colors);

    let mut static_sounds: Vec<Value> = Vec::new();
    let mut seen_timbres: HashSet<String> = HashSet::new();
    if tables.has("static_sounds") {
        use crate::schema::static_sounds::dsl;
        let rows: Vec<StaticSound> = dsl::static_sounds
            .order(dsl::count.desc())
            .limit(limit)
            .select(StaticSound::as_select())
            .load(&mut conn)?;
        for row in rows {
            seen_timbres.insert(row.timbre.clone());
            static_sounds.push(json!({
                "key": row.sound_key,
                "name": row.name,
                "count": row.count,
                "tone": row.tone,
                "timbre": row.timbre,
                "strength_pct": row.strength_pct,
                "depth_breakdown": parse_json(row.depth_breakdown_json.as_deref()),
            }));
        }
    }
    for primitive in origins::SOUND_PRIMITIVES {
        if !seen_timbres.contains(primitive) {
            static_sounds.push(json!({
                "key": primitive,
                "name": primitive,
                "count": 0,
                "origin": true,
            }));
        }
    }
    disambiguate(&mut static_sounds);

    // Dynamic tier: blended profiles per domain.
    let colors = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_colors),
        &[],
        false,
    );
    let motion = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_motion),
        &origins::MOTION_LEVELS,
        true,
    );
    let gradient = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_gradient),
        &origins::GRADIENT_TYPES,
        false,
    );
    let camera = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_camera),
        &origins::CAMERA_MOTIONS,
        false,
    );
    let sound = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_audio_semantic),
        &[],
        false,
    );
    let lighting = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_lighting),
        &[],
        false,
    );
    let composition = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_composition),
        &[],
        false,
    );
    let graphics = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_graphics),
        &[],
        false,
    );
    let temporal = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_temporal),
        &[],
        false,
    );
    let technical = profile_entries(
        load_profiles!(&mut conn, tables, limit, learned_technical),
        &[],
        false,
    );

    let blend_rows: Vec<LearnedBlend> = if tables.has("learned_blends") {
        use crate::schema::learned_blends::dsl;
        dsl::learned_blends
            .order(dsl::created_at.desc())
            .limit(limit)
            .select(LearnedBlend::as_select())
            .load(&mut conn)?
    } else {
        Vec::new()
    };
    let mut colors_from_blends: Vec<Value> = blend_rows
        .iter()
        .filter(|b| b.domain == "color")
        .map(|b| json!({ "key": b.name, "name": b.name, "count": 1 }))
        .collect();
    disambiguate(&mut colors_from_blends);
    let blends: Vec<Value> = blend_rows
        .iter()
        .map(|b| {
            json!({
                "key": b.name,
                "name": b.name,
                "domain": b.domain,
                "inputs": parse_json(Some(&b.inputs_json)),
                "output": parse_json(Some(&b.output_json)),
                "primitive_depths": parse_json(b.primitive_depths_json.as_deref()),
            })
        })
        .collect();

    // Semantic tier.
    let mut narrative: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for aspect in origins::NARRATIVE_ASPECTS {
        narrative.insert(aspect.to_string(), Vec::new());
    }
    if tables.has("narrative_entries") {
        use crate::schema::narrative_entries::dsl;
        let rows: Vec<NarrativeEntry> = dsl::narrative_entries
            .order(dsl::count.desc())
            .limit(limit)
            .select(NarrativeEntry::as_select())
            .load(&mut conn)?;
        for row in rows {
            let value = fix_narrative_typo(&row.value);
            let display = if row.count < NARRATIVE_NAME_MIN_COUNT {
                value.clone()
            } else {
                fix_narrative_typo(&row.name)
            };
            narrative.entry(row.aspect.clone()).or_default().push(json!({
                "key": row.entry_key,
                "name": display,
                "value": value,
                "count": row.count,
            }));
        }
    }
    for entries in narrative.values_mut() {
        disambiguate(entries);
    }

    let interpretation: Vec<Value> = {
        use crate::schema::interpretations::dsl;
        let rows: Vec<Interpretation> = dsl::interpretations
            .order(dsl::created_at.desc())
            .limit(limit)
            .select(Interpretation::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|row| {
                json!({
                    "id": row.id,
                    "prompt": row.prompt,
                    "status": row.status,
                    "source": row.source,
                })
            })
            .collect()
    };

    let linguistic: Vec<Value> = if tables.has("linguistic_variants") {
        use crate::schema::linguistic_variants::dsl;
        let rows: Vec<LinguisticVariant> = dsl::linguistic_variants
            .order(dsl::count.desc())
            .limit(limit)
            .select(LinguisticVariant::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|row| {
                json!({
                    "span": row.span,
                    "canonical": row.canonical,
                    "domain": row.domain,
                    "variant_type": row.variant_type,
                    "count": row.count,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let primitive_colors: Vec<Value> = origins::COLOR_PRIMITIVES
        .iter()
        .map(|(name, r, g, b)| json!({ "name": name, "key": format!("{r},{g},{b}") }))
        .collect();

    Ok(Json(json!({
        "static_primitives": {
            "colors": primitive_colors,
            "sound": origins::SOUND_PRIMITIVES,
        },
        "dynamic_canonical": {
            "gradient_type": origins::GRADIENT_TYPES,
            "camera_motion": origins::CAMERA_MOTIONS,
            "motion": origins::MOTION_LEVELS,
            "sound": origins::SOUND_PRIMITIVES,
        },
        "static": {
            "colors": static_colors,
            "sound": static_sounds,
        },
        "dynamic": {
            "colors": colors,
            "motion": motion,
            "gradient": gradient,
            "camera": camera,
            "sound": sound,
            "colors_from_blends": colors_from_blends,
            "lighting": lighting,
            "composition": composition,
            "graphics": graphics,
            "temporal": temporal,
            "technical": technical,
            "blends": blends,
        },
        "narrative": narrative,
        "interpretation": interpretation,
        "linguistic": linguistic,
    })))
}

pub async fn get_coverage(
    State(state): State<AppState>,
) -> Result<Json<progress::CoverageSnapshot>, ApiError> {
    let mut conn = state.conn()?;
    let snapshot = progress::compute_coverage(&mut conn, &state.tables)?;
    Ok(Json(snapshot))
}
