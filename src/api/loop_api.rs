use axum::extract::{Query, State};
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::{Job, LoopConfig, LoopState};
use crate::services::kv::{self, LOOP_CONFIG_KEY, LOOP_STATE_KEY};
use crate::services::progress;
use crate::AppState;

const PROGRESS_LAST_MAX: i64 = 100;
const DIAGNOSTICS_LAST_MAX: i64 = 50;
const STATE_ARRAY_CAP: usize = 200;
const STATE_PROMPT_MAX_LEN: usize = 500;
const STATUS_RECENT_RUNS: i64 = 10;

pub async fn get_config(State(state): State<AppState>) -> Result<Json<LoopConfig>, ApiError> {
    let mut conn = state.conn()?;
    let config: LoopConfig = kv::get_json(&mut conn, LOOP_CONFIG_KEY)?.unwrap_or_default();
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
pub struct LoopConfigPatch {
    pub enabled: Option<bool>,
    pub delay_seconds: Option<u32>,
    pub exploit_ratio: Option<f64>,
    pub duration_seconds: Option<f64>,
}

/// Merge-patch: absent fields keep their stored values.
pub async fn post_config(
    State(state): State<AppState>,
    Json(patch): Json<LoopConfigPatch>,
) -> Result<Json<LoopConfig>, ApiError> {
    if let Some(delay) = patch.delay_seconds {
        if delay > 600 {
            return Err(ApiError::Validation(
                "delay_seconds must be within [0, 600]".to_string(),
            ));
        }
    }
    if let Some(ratio) = patch.exploit_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ApiError::Validation(
                "exploit_ratio must be within [0, 1]".to_string(),
            ));
        }
    }
    if let Some(duration) = patch.duration_seconds {
        if !(1.0..=60.0).contains(&duration) {
            return Err(ApiError::Validation(
                "duration_seconds must be within [1, 60]".to_string(),
            ));
        }
    }

    if !state.kv_limiter.check(LOOP_CONFIG_KEY) {
        return Err(ApiError::RateLimited);
    }

    let mut conn = state.conn()?;
    let mut config: LoopConfig = kv::get_json(&mut conn, LOOP_CONFIG_KEY)?.unwrap_or_default();
    if let Some(enabled) = patch.enabled {
        config.enabled = enabled;
    }
    if let Some(delay) = patch.delay_seconds {
        config.delay_seconds = delay;
    }
    if let Some(ratio) = patch.exploit_ratio {
        config.exploit_ratio = ratio;
    }
    if let Some(duration) = patch.duration_seconds {
        config.duration_seconds = duration;
    }
    kv::put_json(&mut conn, LOOP_CONFIG_KEY, &config)?;
    Ok(Json(config))
}

pub async fn get_state(State(state): State<AppState>) -> Result<Json<LoopState>, ApiError> {
    let mut conn = state.conn()?;
    let loop_state: LoopState = kv::get_json(&mut conn, LOOP_STATE_KEY)?.unwrap_or_default();
    Ok(Json(loop_state))
}

fn validate_prompt_list(list: &[String], field: &str) -> Result<(), ApiError> {
    if list.len() > STATE_ARRAY_CAP {
        return Err(ApiError::Validation(format!(
            "{field} exceeds {STATE_ARRAY_CAP} entries"
        )));
    }
    if list
        .iter()
        .any(|p| p.chars().count() > STATE_PROMPT_MAX_LEN)
    {
        return Err(ApiError::Validation(format!(
            "{field} entries must be at most {STATE_PROMPT_MAX_LEN} characters"
        )));
    }
    Ok(())
}

/// Full replace. The version field must not move backward; stale writers get
/// a conflict instead of silently clobbering the loop's state.
pub async fn post_state(
    State(state): State<AppState>,
    Json(incoming): Json<LoopState>,
) -> Result<Json<LoopState>, ApiError> {
    validate_prompt_list(&incoming.good_prompts, "good_prompts")?;
    validate_prompt_list(&incoming.recent_prompts, "recent_prompts")?;

    let mut conn = state.conn()?;
    let stored: LoopState = kv::get_json(&mut conn, LOOP_STATE_KEY)?.unwrap_or_default();
    if incoming.version < stored.version {
        return Err(ApiError::Conflict(format!(
            "state version {} is older than stored version {}",
            incoming.version, stored.version
        )));
    }

    if !state.kv_limiter.check(LOOP_STATE_KEY) {
        return Err(ApiError::RateLimited);
    }

    kv::put_json(&mut conn, LOOP_STATE_KEY, &incoming)?;
    Ok(Json(incoming))
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut conn = state.conn()?;
    let config: LoopConfig = kv::get_json(&mut conn, LOOP_CONFIG_KEY)?.unwrap_or_default();
    let loop_state: LoopState = kv::get_json(&mut conn, LOOP_STATE_KEY)?.unwrap_or_default();

    use crate::schema::jobs::dsl;
    let recent_runs: Vec<Job> = dsl::jobs
        .filter(dsl::status.eq("completed"))
        .order(dsl::updated_at.desc())
        .limit(STATUS_RECENT_RUNS)
        .select(Job::as_select())
        .load(&mut conn)?;

    Ok(Json(json!({
        "config": config,
        "state": loop_state,
        "recent_runs": recent_runs,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LastQuery {
    pub last: Option<i64>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CachedStats {
    computed_at: i64,
    last: i64,
    report: progress::ProgressReport,
}

const STATS_TTL_SECONDS: i64 = 60;

/// Progress is co-requested on every loop poll, so the default window is
/// cached in the KV side-channel for a minute.
pub async fn get_progress(
    State(state): State<AppState>,
    Query(query): Query<LastQuery>,
) -> Result<Json<progress::ProgressReport>, ApiError> {
    let last = query.last.unwrap_or(20).clamp(1, PROGRESS_LAST_MAX);
    let mut conn = state.conn()?;

    let now = chrono::Utc::now().timestamp();
    if let Some(cached) =
        kv::get_json::<CachedStats>(&mut conn, kv::LEARNING_STATS_KEY).unwrap_or(None)
    {
        if cached.last == last && now - cached.computed_at < STATS_TTL_SECONDS {
            return Ok(Json(cached.report));
        }
    }

    let report = progress::compute_progress(&mut conn, &state.tables, last)?;
    if state.kv_limiter.check(kv::LEARNING_STATS_KEY) {
        let cached = CachedStats {
            computed_at: now,
            last,
            report,
        };
        kv::put_json(&mut conn, kv::LEARNING_STATS_KEY, &cached)?;
        return Ok(Json(cached.report));
    }
    Ok(Json(report))
}

pub async fn get_diagnostics(
    State(state): State<AppState>,
    Query(query): Query<LastQuery>,
) -> Result<Json<Vec<progress::JobDiagnostics>>, ApiError> {
    let last = query.last.unwrap_or(20).clamp(1, DIAGNOSTICS_LAST_MAX);
    let mut conn = state.conn()?;
    let diagnostics = progress::compute_diagnostics(&mut conn, &state.tables, last)?;
    Ok(Json(diagnostics))
}
