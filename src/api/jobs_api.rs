use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::models::{Feedback, Job, NewEvent, NewFeedback, NewJob};
use crate::AppState;

const PROMPT_MAX_LEN: usize = 500;
const COMPLETED_LIMIT_MAX: i64 = 100;

pub const WORKFLOW_TYPES: [&str; 4] = ["explorer", "exploiter", "main", "web"];

fn blob_key(job_id: &str) -> String {
    format!("jobs/{job_id}/video.mp4")
}

fn download_path(job_id: &str) -> String {
    format!("/jobs/{job_id}/download")
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub prompt: String,
    pub duration_seconds: Option<f64>,
    pub workflow_type: Option<String>,
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = req.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(ApiError::Validation("prompt is required".to_string()));
    }
    if prompt.chars().count() > PROMPT_MAX_LEN {
        return Err(ApiError::Validation(format!(
            "prompt exceeds {PROMPT_MAX_LEN} characters"
        )));
    }
    if let Some(duration) = req.duration_seconds {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(ApiError::Validation(
                "duration_seconds must be positive".to_string(),
            ));
        }
    }
    let workflow_type = match req.workflow_type.as_deref() {
        None => None,
        Some(wt) if WORKFLOW_TYPES.contains(&wt) => Some(wt.to_string()),
        Some(other) => {
            return Err(ApiError::Validation(format!(
                "workflow_type '{other}' is not allowed"
            )))
        }
    };

    let mut conn = state.conn()?;
    use crate::schema::jobs::dsl;

    let job: Job = diesel::insert_into(dsl::jobs)
        .values(NewJob::pending(
            prompt,
            req.duration_seconds.map(|d| d as f32),
            workflow_type,
        ))
        .returning(Job::as_returning())
        .get_result(&mut conn)?;

    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let mut conn = state.conn()?;
    use crate::schema::jobs::dsl;

    let jobs = match query.status.as_deref() {
        Some("pending") => dsl::jobs
            .filter(dsl::status.eq("pending"))
            .order(dsl::created_at.asc())
            .select(Job::as_select())
            .load(&mut conn)?,
        Some("completed") => {
            let limit = query
                .limit
                .unwrap_or(COMPLETED_LIMIT_MAX)
                .clamp(1, COMPLETED_LIMIT_MAX);
            dsl::jobs
                .filter(dsl::status.eq("completed"))
                .order(dsl::updated_at.desc())
                .limit(limit)
                .select(Job::as_select())
                .load(&mut conn)?
        }
        Some("failed") => dsl::jobs
            .filter(dsl::status.eq("failed"))
            .order(dsl::updated_at.desc())
            .select(Job::as_select())
            .load(&mut conn)?,
        Some(other) => {
            return Err(ApiError::Validation(format!(
                "status '{other}' is not queryable"
            )))
        }
        None => {
            return Err(ApiError::Validation(
                "status query parameter is required".to_string(),
            ))
        }
    };

    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = fetch_job(&state, &job_id)?;

    let mut body = serde_json::to_value(&job).map_err(anyhow::Error::from)?;
    if job.is_completed() {
        if let Some(r2_key) = &job.r2_key {
            if state.blobs.get(r2_key).await.map_err(ApiError::Internal)?.is_some() {
                body["download_url"] = json!(download_path(&job.id));
            }
        }
    }

    let feedback: Option<Feedback> = {
        let mut conn = state.conn()?;
        use crate::schema::feedback::dsl;
        dsl::feedback
            .filter(dsl::job_id.eq(&job.id))
            .select(Feedback::as_select())
            .first(&mut conn)
            .optional()?
    };
    if let Some(feedback) = feedback {
        body["feedback"] = json!(feedback.rating);
    }

    Ok(Json(body))
}

fn fetch_job(state: &AppState, job_id: &str) -> Result<Job, ApiError> {
    let mut conn = state.conn()?;
    use crate::schema::jobs::dsl;
    dsl::jobs
        .filter(dsl::id.eq(job_id))
        .select(Job::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))
}

/// Accepts the rendered video as either a raw body or a multipart `file`
/// field, flips the job to completed, and records the blob key.
pub async fn upload_video(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    request: Request,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = fetch_job(&state, &job_id)?;
    if job.is_completed() {
        return Err(ApiError::Validation("job already has video".to_string()));
    }

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let bytes: Vec<u8> = if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::Validation(format!("invalid multipart body: {e}")))?;
        let mut data = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(format!("multipart read failed: {e}")))?
        {
            let is_file = field.file_name().is_some() || field.name() == Some("file");
            if is_file {
                data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("multipart read failed: {e}")))?
                    .to_vec();
                break;
            }
        }
        data
    } else {
        axum::body::to_bytes(request.into_body(), super::UPLOAD_BODY_LIMIT)
            .await
            .map_err(|e| ApiError::Validation(format!("body read failed: {e}")))?
            .to_vec()
    };

    if bytes.is_empty() {
        return Err(ApiError::Validation("video payload is empty".to_string()));
    }

    // Sniff the real content type; unknown bytes still ship as mp4.
    let detected = infer::get(&bytes)
        .map(|t| t.mime_type().to_string())
        .filter(|m| m.starts_with("video/"))
        .unwrap_or_else(|| "video/mp4".to_string());

    let key = blob_key(&job_id);
    state
        .blobs
        .put(&key, &bytes, &detected)
        .await
        .map_err(ApiError::Internal)?;

    let mut conn = state.conn()?;
    use crate::schema::jobs::dsl;
    diesel::update(dsl::jobs.filter(dsl::id.eq(&job_id)))
        .set((
            dsl::status.eq("completed"),
            dsl::r2_key.eq(Some(key.clone())),
            dsl::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    use crate::schema::events::dsl as events_dsl;
    diesel::insert_into(events_dsl::events)
        .values(NewEvent {
            event_type: "job_completed".to_string(),
            job_id: Some(job_id.clone()),
            payload_json: Some(json!({ "bytes": bytes.len() }).to_string()),
        })
        .execute(&mut conn)?;

    Ok(Json(json!({
        "ok": true,
        "id": job_id,
        "status": "completed",
        "r2_key": key,
        "download_url": download_path(&job_id),
    })))
}

pub async fn download_video(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = fetch_job(&state, &job_id)?;
    let Some(r2_key) = job.r2_key else {
        return Err(ApiError::NotFound(format!("video for job {job_id}")));
    };
    let Some(blob) = state.blobs.get(&r2_key).await.map_err(ApiError::Internal)? else {
        return Err(ApiError::NotFound(format!("video for job {job_id}")));
    };

    let response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, blob.content_type),
            (header::CONTENT_LENGTH, blob.size.to_string()),
        ],
        blob.bytes,
    )
        .into_response();
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub rating: i32,
}

pub async fn post_feedback(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !(1..=2).contains(&req.rating) {
        return Err(ApiError::Validation(
            "rating must be 1 (down) or 2 (up)".to_string(),
        ));
    }
    fetch_job(&state, &job_id)?;

    let mut conn = state.conn()?;
    use crate::schema::feedback::dsl;

    let exists = dsl::feedback
        .filter(dsl::job_id.eq(&job_id))
        .select(dsl::job_id)
        .first::<String>(&mut conn)
        .optional()?;

    if exists.is_some() {
        diesel::update(dsl::feedback.filter(dsl::job_id.eq(&job_id)))
            .set((
                dsl::rating.eq(req.rating),
                dsl::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
    } else {
        diesel::insert_into(dsl::feedback)
            .values(NewFeedback {
                job_id: job_id.clone(),
                rating: req.rating,
            })
            .execute(&mut conn)?;
    }

    use crate::schema::events::dsl as events_dsl;
    diesel::insert_into(events_dsl::events)
        .values(NewEvent {
            event_type: "feedback".to_string(),
            job_id: Some(job_id.clone()),
            payload_json: Some(json!({ "rating": req.rating }).to_string()),
        })
        .execute(&mut conn)?;

    Ok(Json(json!({ "ok": true, "job_id": job_id, "rating": req.rating })))
}
