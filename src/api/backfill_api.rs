use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::services::backfill_service::{self, BackfillOptions, DepthUpdate};
use crate::AppState;

const RENAME_LIMIT_MAX: usize = 200;
const ROWS_LIMIT_MAX: i64 = 500;

fn flag(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

#[derive(Debug, Deserialize)]
pub struct BackfillNamesQuery {
    pub dry_run: Option<String>,
    pub limit: Option<usize>,
    pub table: Option<String>,
    pub word_boundary: Option<String>,
}

/// Replaces gibberish display names and cascades each rename through every
/// referencing column before returning.
pub async fn backfill_names(
    State(state): State<AppState>,
    Query(query): Query<BackfillNamesQuery>,
) -> Result<Json<backfill_service::BackfillReport>, ApiError> {
    let opts = BackfillOptions {
        dry_run: flag(query.dry_run.as_deref()),
        limit: query.limit.unwrap_or(50).clamp(1, RENAME_LIMIT_MAX),
        table: query.table.clone(),
        word_boundary: flag(query.word_boundary.as_deref()),
    };

    let mut conn = state.conn()?;
    let report = backfill_service::backfill_names(&mut conn, &state.tables, &opts)
        .map_err(|e| ApiError::Validation(format!("{e:#}")))?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct BackfillRowsQuery {
    pub table: String,
    pub limit: Option<i64>,
}

pub async fn backfill_rows(
    State(state): State<AppState>,
    Query(query): Query<BackfillRowsQuery>,
) -> Result<Json<Vec<backfill_service::RawRegistryRow>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, ROWS_LIMIT_MAX);
    let mut conn = state.conn()?;
    let rows = backfill_service::raw_rows(&mut conn, &state.tables, &query.table, limit)
        .map_err(|e| ApiError::Validation(format!("{e:#}")))?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct BackfillDepthsRequest {
    pub updates: Vec<DepthUpdate>,
}

pub async fn backfill_depths(
    State(state): State<AppState>,
    Json(req): Json<BackfillDepthsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.conn()?;
    let applied = backfill_service::apply_depth_updates(&mut conn, &state.tables, &req.updates)
        .map_err(|e| ApiError::Validation(format!("{e:#}")))?;
    Ok(Json(json!({ "ok": true, "applied": applied })))
}
