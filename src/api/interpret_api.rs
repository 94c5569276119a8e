use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::{Interpretation, NewInterpretation, NewLinguisticVariant};
use crate::services::gibberish;
use crate::AppState;

const PROMPT_MAX_LEN: usize = 500;
const BATCH_MAX: usize = 50;

pub const INTERPRETATION_SOURCES: [&str; 4] = ["web", "worker", "loop", "backfill"];

fn validate_source(source: Option<&str>, default: &str) -> Result<String, ApiError> {
    match source {
        None => Ok(default.to_string()),
        Some(s) if INTERPRETATION_SOURCES.contains(&s) => Ok(s.to_string()),
        Some(other) => Err(ApiError::Validation(format!(
            "source '{other}' is not allowed"
        ))),
    }
}

fn validate_prompt(prompt: &str) -> Result<String, ApiError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::Validation("prompt is required".to_string()));
    }
    if prompt.chars().count() > PROMPT_MAX_LEN {
        return Err(ApiError::Validation(format!(
            "prompt exceeds {PROMPT_MAX_LEN} characters"
        )));
    }
    Ok(prompt.to_string())
}

#[derive(Debug, Deserialize)]
pub struct QueueRequest {
    pub prompt: String,
    pub source: Option<String>,
}

pub async fn queue_interpretation(
    State(state): State<AppState>,
    Json(req): Json<QueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = validate_prompt(&req.prompt)?;
    let source = validate_source(req.source.as_deref(), "web")?;

    let mut conn = state.conn()?;
    use crate::schema::interpretations::dsl;
    let row: Interpretation = diesel::insert_into(dsl::interpretations)
        .values(NewInterpretation {
            id: uuid::Uuid::new_v4().to_string(),
            prompt,
            instruction_json: None,
            source,
            status: "pending".to_string(),
        })
        .returning(Interpretation::as_returning())
        .get_result(&mut conn)?;

    Ok((StatusCode::CREATED, Json(row)))
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub limit: Option<i64>,
}

/// Pending queue, web submissions first, oldest first within a source class.
pub async fn get_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Vec<Interpretation>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let mut conn = state.conn()?;
    use crate::schema::interpretations::dsl;

    let rows = dsl::interpretations
        .filter(dsl::status.eq("pending"))
        .order((
            diesel::dsl::sql::<diesel::sql_types::Integer>(
                "CASE WHEN source = 'web' THEN 0 ELSE 1 END",
            ),
            dsl::created_at.asc(),
        ))
        .limit(limit)
        .select(Interpretation::as_select())
        .load(&mut conn)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct PatchRequest {
    pub instruction: Value,
}

pub async fn patch_interpretation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchRequest>,
) -> Result<Json<Interpretation>, ApiError> {
    let mut conn = state.conn()?;
    use crate::schema::interpretations::dsl;

    let updated: Option<Interpretation> =
        diesel::update(dsl::interpretations.filter(dsl::id.eq(&id)))
            .set((
                dsl::instruction_json.eq(Some(req.instruction.to_string())),
                dsl::status.eq("done"),
                dsl::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .returning(Interpretation::as_returning())
            .get_result(&mut conn)
            .optional()?;

    updated
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("interpretation {id}")))
}

#[derive(Debug, Deserialize)]
pub struct InterpretationItem {
    pub prompt: String,
    pub instruction: Option<Value>,
    pub source: Option<String>,
}

pub async fn create_interpretation(
    State(state): State<AppState>,
    Json(req): Json<InterpretationItem>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = validate_prompt(&req.prompt)?;
    let source = validate_source(req.source.as_deref(), "worker")?;

    // The loop records its own synthesized prompts unchecked.
    if source != "loop" && gibberish::is_gibberish_prompt(&prompt, true) {
        return Err(ApiError::Validation(
            "prompt rejected as gibberish".to_string(),
        ));
    }

    let mut conn = state.conn()?;
    let row = insert_done(&mut conn, &prompt, req.instruction.as_ref(), &source)?;
    Ok((StatusCode::CREATED, Json(row)))
}

fn insert_done(
    conn: &mut diesel::sqlite::SqliteConnection,
    prompt: &str,
    instruction: Option<&Value>,
    source: &str,
) -> Result<Interpretation, ApiError> {
    use crate::schema::interpretations::dsl;
    let row = diesel::insert_into(dsl::interpretations)
        .values(NewInterpretation {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            instruction_json: instruction.map(|i| i.to_string()),
            source: source.to_string(),
            status: "done".to_string(),
        })
        .returning(Interpretation::as_returning())
        .get_result(conn)?;
    Ok(row)
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<InterpretationItem>,
}

pub async fn create_interpretations_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.items.len() > BATCH_MAX {
        return Err(ApiError::PayloadTooLarge(format!(
            "batch exceeds {BATCH_MAX} items"
        )));
    }

    let mut conn = state.conn()?;
    let mut inserted = 0;
    let mut skipped = 0;
    for item in &req.items {
        let Ok(prompt) = validate_prompt(&item.prompt) else {
            skipped += 1;
            continue;
        };
        let source = validate_source(item.source.as_deref(), "worker")?;
        // Gibberish batch items are dropped without failing the batch.
        if source != "loop" && gibberish::is_gibberish_prompt(&prompt, true) {
            skipped += 1;
            continue;
        }
        insert_done(&mut conn, &prompt, item.instruction.as_ref(), &source)?;
        inserted += 1;
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "inserted": inserted, "skipped": skipped })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LinguisticItem {
    pub span: String,
    pub canonical: String,
    pub domain: String,
    pub variant_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinguisticBatchRequest {
    pub items: Vec<LinguisticItem>,
}

/// Interpretation workers report observed wording variants in batches;
/// duplicates on (span, domain) increment.
pub async fn create_linguistic_batch(
    State(state): State<AppState>,
    Json(req): Json<LinguisticBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.items.len() > BATCH_MAX {
        return Err(ApiError::PayloadTooLarge(format!(
            "batch exceeds {BATCH_MAX} items"
        )));
    }
    if !state.tables.has("linguistic_variants") {
        tracing::warn!("linguistic_variants table absent; skipping batch");
        return Ok((
            StatusCode::CREATED,
            Json(json!({ "inserted": 0, "updated": 0 })),
        ));
    }

    let mut conn = state.conn()?;
    use crate::schema::linguistic_variants::dsl;
    let mut inserted = 0;
    let mut updated = 0;

    for item in &req.items {
        let span = item.span.trim().to_lowercase();
        let domain = item.domain.trim().to_lowercase();
        if span.is_empty() || domain.is_empty() {
            continue;
        }

        let exists = dsl::linguistic_variants
            .filter(dsl::span.eq(&span))
            .filter(dsl::domain.eq(&domain))
            .select(dsl::id)
            .first::<Option<i32>>(&mut conn)
            .optional()?;

        if exists.is_some() {
            diesel::update(
                dsl::linguistic_variants
                    .filter(dsl::span.eq(&span))
                    .filter(dsl::domain.eq(&domain)),
            )
            .set(dsl::count.eq(dsl::count + 1))
            .execute(&mut conn)?;
            updated += 1;
        } else {
            diesel::insert_into(dsl::linguistic_variants)
                .values(NewLinguisticVariant {
                    span,
                    canonical: item.canonical.trim().to_string(),
                    domain,
                    variant_type: item
                        .variant_type
                        .as_deref()
                        .unwrap_or("")
                        .trim()
                        .to_string(),
                    count: 1,
                })
                .execute(&mut conn)?;
            inserted += 1;
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "inserted": inserted, "updated": updated })),
    ))
}
