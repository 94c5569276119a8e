use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::{Event, LearningRun, NewEvent, NewLearningRun};
use crate::AppState;

const RUNS_LIMIT_MAX: i64 = 500;
const EVENTS_LIMIT_MAX: i64 = 1000;

pub const EVENT_TYPES: [&str; 7] = [
    "prompt_submitted",
    "job_completed",
    "video_played",
    "video_abandoned",
    "download_clicked",
    "error",
    "feedback",
];

#[derive(Debug, Deserialize)]
pub struct CreateLearningRequest {
    pub job_id: Option<String>,
    pub prompt: String,
    pub spec: Value,
    pub analysis: Value,
}

pub async fn create_learning_run(
    State(state): State<AppState>,
    Json(req): Json<CreateLearningRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = req.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(ApiError::Validation("prompt is required".to_string()));
    }

    let mut conn = state.conn()?;
    use crate::schema::learning_runs::dsl;
    let run: LearningRun = diesel::insert_into(dsl::learning_runs)
        .values(NewLearningRun {
            job_id: req.job_id,
            prompt,
            spec_json: req.spec.to_string(),
            analysis_json: req.analysis.to_string(),
        })
        .returning(LearningRun::as_returning())
        .get_result(&mut conn)?;

    Ok((StatusCode::CREATED, Json(run)))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

pub async fn list_learning_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<LearningRun>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, RUNS_LIMIT_MAX);
    let mut conn = state.conn()?;
    use crate::schema::learning_runs::dsl;
    let runs = dsl::learning_runs
        .order(dsl::created_at.desc())
        .limit(limit)
        .select(LearningRun::as_select())
        .load(&mut conn)?;
    Ok(Json(runs))
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub event_type: String,
    pub job_id: Option<String>,
    pub payload: Option<Value>,
}

pub async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !EVENT_TYPES.contains(&req.event_type.as_str()) {
        return Err(ApiError::Validation(format!(
            "event_type '{}' is not allowed",
            req.event_type
        )));
    }

    let mut conn = state.conn()?;
    use crate::schema::events::dsl;
    diesel::insert_into(dsl::events)
        .values(NewEvent {
            event_type: req.event_type.clone(),
            job_id: req.job_id,
            payload_json: req.payload.map(|p| p.to_string()),
        })
        .execute(&mut conn)?;

    Ok((StatusCode::CREATED, Json(json!({ "ok": true }))))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, EVENTS_LIMIT_MAX);
    let mut conn = state.conn()?;
    use crate::schema::events::dsl;

    let events = match &query.event_type {
        Some(event_type) => dsl::events
            .filter(dsl::event_type.eq(event_type))
            .order(dsl::created_at.desc())
            .limit(limit)
            .select(Event::as_select())
            .load(&mut conn)?,
        None => dsl::events
            .order(dsl::created_at.desc())
            .limit(limit)
            .select(Event::as_select())
            .load(&mut conn)?,
    };
    Ok(Json(events))
}
