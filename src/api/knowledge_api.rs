use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::error::ApiError;
use crate::models::{LearnedBlend, LearnedMotion, StaticColor, StaticSound};
use crate::services::origins;
use crate::services::registry_service::{self, DiscoveryBatch};
use crate::AppState;

/// The hot write path: a batched, deduplicating, name-allocating ingest.
/// Mid-loop store failures return 500 with the partial results so the caller
/// can retry the remainder.
pub async fn post_discoveries(
    State(state): State<AppState>,
    Json(batch): Json<DiscoveryBatch>,
) -> Result<Response, ApiError> {
    for aspect in batch.narrative.keys() {
        if !origins::NARRATIVE_ASPECTS.contains(&aspect.as_str()) {
            return Err(ApiError::Validation(format!(
                "narrative aspect '{aspect}' is not allowed"
            )));
        }
    }

    let mut conn = state.conn()?;
    match registry_service::ingest_batch(&mut conn, &state.tables, &batch) {
        Ok(outcome) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "ok": true,
                "truncated": outcome.truncated,
                "results": outcome.results,
            })),
        )
            .into_response()),
        Err(failure) => {
            tracing::error!("discovery ingestion failed: {:#}", failure.error);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "discovery ingestion failed",
                    "details": format!("{:#}", failure.error),
                    "results": failure.results,
                })),
            )
                .into_response())
        }
    }
}

fn parse_json(raw: Option<&str>) -> Value {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or(Value::Null)
}

/// The creation-side view the renderer reads before synthesizing a video:
/// everything learned so far plus the canonical origin lists.
pub async fn for_creation(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut conn = state.conn()?;
    let tables = &state.tables;

    let mut learned_colors = Map::new();
    if tables.has("learned_colors") {
        use crate::schema::learned_colors::dsl;
        let rows: Vec<crate::models::LearnedColor> = dsl::learned_colors
            .order(dsl::count.desc())
            .select(crate::models::LearnedColor::as_select())
            .load(&mut conn)?;
        for row in rows {
            learned_colors.insert(
                row.profile_key.clone(),
                json!({
                    "name": row.name,
                    "count": row.count,
                    "depth_breakdown": parse_json(row.depth_breakdown_json.as_deref()),
                }),
            );
        }
    }

    let learned_motion: Vec<Value> = if tables.has("learned_motion") {
        use crate::schema::learned_motion::dsl;
        let rows: Vec<LearnedMotion> = dsl::learned_motion
            .order(dsl::count.desc())
            .select(LearnedMotion::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|row| {
                json!({
                    "key": row.profile_key,
                    "name": row.name,
                    "count": row.count,
                    "motion_level": row.motion_level,
                    "motion_std": row.motion_std,
                    "motion_trend": row.motion_trend,
                    "direction": row.direction,
                    "rhythm": row.rhythm,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let blends: Vec<LearnedBlend> = if tables.has("learned_blends") {
        use crate::schema::learned_blends::dsl;
        dsl::learned_blends
            .order(dsl::created_at.desc())
            .select(LearnedBlend::as_select())
            .load(&mut conn)?
    } else {
        Vec::new()
    };

    let learned_audio: Vec<Value> = blends
        .iter()
        .filter(|b| b.domain == "audio")
        .map(|b| {
            json!({
                "name": b.name,
                "inputs": parse_json(Some(&b.inputs_json)),
                "output": parse_json(Some(&b.output_json)),
            })
        })
        .collect();

    let learned_gradient = domain_union(&mut conn, tables, &blends, "gradient")?;
    let learned_camera = domain_union(&mut conn, tables, &blends, "camera")?;

    let interpretation_prompts: Vec<String> = {
        use crate::schema::interpretations::dsl;
        dsl::interpretations
            .order(dsl::created_at.desc())
            .limit(500)
            .select(dsl::prompt)
            .load(&mut conn)?
    };

    let static_colors: Vec<Value> = if tables.has("static_colors") {
        use crate::schema::static_colors::dsl;
        let rows: Vec<StaticColor> = dsl::static_colors
            .order(dsl::count.desc())
            .limit(1000)
            .select(StaticColor::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|row| {
                json!({
                    "key": row.color_key,
                    "name": row.name,
                    "count": row.count,
                    "r": row.r, "g": row.g, "b": row.b,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let static_sound: Vec<Value> = if tables.has("static_sounds") {
        use crate::schema::static_sounds::dsl;
        let rows: Vec<StaticSound> = dsl::static_sounds
            .order(dsl::count.desc())
            .limit(1000)
            .select(StaticSound::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|row| {
                json!({
                    "key": row.sound_key,
                    "name": row.name,
                    "count": row.count,
                    "tone": row.tone,
                    "timbre": row.timbre,
                    "strength_pct": row.strength_pct,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(Json(json!({
        "learned_colors": learned_colors,
        "learned_motion": learned_motion,
        "learned_audio": learned_audio,
        "learned_gradient": learned_gradient,
        "learned_camera": learned_camera,
        "origin_gradient": origins::GRADIENT_TYPES,
        "origin_camera": origins::CAMERA_MOTIONS,
        "origin_motion": origins::MOTION_LEVELS,
        "interpretation_prompts": interpretation_prompts,
        "static_colors": static_colors,
        "static_sound": static_sound,
    })))
}

/// Union of the per-domain profile table and same-domain uncategorized
/// blends, deduplicated by display name.
fn domain_union(
    conn: &mut diesel::sqlite::SqliteConnection,
    tables: &crate::db::TableFlags,
    blends: &[LearnedBlend],
    domain: &str,
) -> Result<Vec<Value>, ApiError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    let table = format!("learned_{domain}");
    if tables.has(&table) {
        let rows: Vec<(String, String, i32)> = match domain {
            "gradient" => {
                use crate::schema::learned_gradient::dsl;
                dsl::learned_gradient
                    .order(dsl::count.desc())
                    .select((dsl::profile_key, dsl::name, dsl::count))
                    .load(conn)?
            }
            "camera" => {
                use crate::schema::learned_camera::dsl;
                dsl::learned_camera
                    .order(dsl::count.desc())
                    .select((dsl::profile_key, dsl::name, dsl::count))
                    .load(conn)?
            }
            _ => Vec::new(),
        };
        for (key, name, count) in rows {
            if seen.insert(name.clone()) {
                out.push(json!({ "key": key, "name": name, "count": count }));
            }
        }
    }

    for blend in blends.iter().filter(|b| b.domain == domain) {
        if seen.insert(blend.name.clone()) {
            out.push(json!({
                "key": blend.name,
                "name": blend.name,
                "count": 1,
                "from_blend": true,
            }));
        }
    }

    Ok(out)
}
