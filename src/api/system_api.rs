use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::prelude::*;
use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};
use serde_json::json;

use crate::error::ApiError;
use crate::models::LoopState;
use crate::services::{kv, progress};
use crate::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "service": "motion-productions" }))
}

/// Prometheus text exposition. Gauges are sampled from the store at scrape
/// time; no background collector.
pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut conn = state.conn()?;

    let loop_state: LoopState =
        kv::get_json(&mut conn, kv::LOOP_STATE_KEY)?.unwrap_or_default();
    let report = progress::compute_progress(&mut conn, &state.tables, 20)?;
    let jobs_total: i64 = {
        use crate::schema::jobs::dsl;
        dsl::jobs.count().get_result(&mut conn)?
    };

    let registry = Registry::new();
    let total_runs = IntGauge::new("motion_total_runs", "Total learning loop runs")
        .map_err(anyhow::Error::from)?;
    let precision = Gauge::new(
        "motion_precision_pct",
        "Share of recent completed jobs with a learning run",
    )
    .map_err(anyhow::Error::from)?;
    let discovery_rate = Gauge::new(
        "motion_discovery_rate_pct",
        "Share of recent completed jobs with a discovery run",
    )
    .map_err(anyhow::Error::from)?;
    let jobs = IntGauge::new("motion_jobs_total", "Total jobs ever created")
        .map_err(anyhow::Error::from)?;

    registry
        .register(Box::new(total_runs.clone()))
        .map_err(anyhow::Error::from)?;
    registry
        .register(Box::new(precision.clone()))
        .map_err(anyhow::Error::from)?;
    registry
        .register(Box::new(discovery_rate.clone()))
        .map_err(anyhow::Error::from)?;
    registry
        .register(Box::new(jobs.clone()))
        .map_err(anyhow::Error::from)?;

    total_runs.set(loop_state.run_count as i64);
    precision.set(report.precision_pct);
    discovery_rate.set(report.discovery_rate_pct);
    jobs.set(jobs_total);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(anyhow::Error::from)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response())
}
