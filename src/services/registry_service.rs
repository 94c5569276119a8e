//! Discovery ingestion: the server-side write path that deduplicates, names,
//! and computes depth breakdowns across the three registry tiers.

use anyhow::Result;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::db::TableFlags;
use crate::models;
use crate::services::depth;
use crate::services::naming::NamePool;

/// New rows allowed per request. The store permits ~50 queries per request
/// and a fresh insert costs ~3 (lookup, name reserve, insert); increments on
/// known keys are cheaper and do not consume the quota.
pub const MAX_ITEMS_PER_BATCH: usize = 14;

/// Source prompts kept per blended row.
const MAX_SOURCES: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryBatch {
    pub job_id: Option<String>,
    #[serde(default)]
    pub static_colors: Vec<StaticColorItem>,
    #[serde(default)]
    pub static_sound: Vec<StaticSoundItem>,
    #[serde(default)]
    pub colors: Vec<ProfileItem>,
    #[serde(default)]
    pub motion: Vec<MotionItem>,
    #[serde(default)]
    pub lighting: Vec<ProfileItem>,
    #[serde(default)]
    pub composition: Vec<ProfileItem>,
    #[serde(default)]
    pub graphics: Vec<ProfileItem>,
    #[serde(default)]
    pub temporal: Vec<ProfileItem>,
    #[serde(default)]
    pub technical: Vec<ProfileItem>,
    #[serde(default)]
    pub audio_semantic: Vec<ProfileItem>,
    #[serde(default)]
    pub time: Vec<ProfileItem>,
    #[serde(default)]
    pub gradient: Vec<ProfileItem>,
    #[serde(default)]
    pub camera: Vec<ProfileItem>,
    #[serde(default)]
    pub transition: Vec<ProfileItem>,
    #[serde(default)]
    pub depth: Vec<ProfileItem>,
    #[serde(default)]
    pub blends: Vec<BlendItem>,
    #[serde(default)]
    pub narrative: BTreeMap<String, Vec<NarrativeItem>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StaticColorItem {
    pub key: Option<String>,
    pub r: Option<i32>,
    pub g: Option<i32>,
    pub b: Option<i32>,
    pub name: Option<String>,
    pub depth_breakdown: Option<Value>,
    pub opacity: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StaticSoundItem {
    pub key: Option<String>,
    pub amplitude: Option<f64>,
    pub strength_pct: Option<f64>,
    pub tone: Option<String>,
    pub timbre: Option<String>,
    pub name: Option<String>,
    pub depth_breakdown: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileItem {
    #[serde(alias = "profile_key")]
    pub key: Option<String>,
    pub name: Option<String>,
    pub source_prompt: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    pub depth_breakdown: Option<Value>,
}

impl ProfileItem {
    fn canonical_key(&self) -> Option<String> {
        let key = self.key.as_deref()?.trim();
        if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        }
    }

    fn source_iter(&self) -> impl Iterator<Item = &str> {
        self.source_prompt
            .iter()
            .map(String::as_str)
            .chain(self.sources.iter().map(String::as_str))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MotionItem {
    #[serde(alias = "profile_key")]
    pub key: Option<String>,
    pub name: Option<String>,
    pub motion_level: Option<f64>,
    pub motion_std: Option<f64>,
    pub motion_trend: Option<String>,
    pub direction: Option<String>,
    pub rhythm: Option<String>,
    pub source_prompt: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    pub depth_breakdown: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlendItem {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub inputs: Option<Value>,
    pub output: Option<Value>,
    pub primitive_depths: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NarrativeItem {
    #[serde(alias = "entry_key")]
    pub key: Option<String>,
    pub value: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryResults {
    pub static_colors: u32,
    pub static_sound: u32,
    pub colors: u32,
    pub motion: u32,
    pub lighting: u32,
    pub composition: u32,
    pub graphics: u32,
    pub temporal: u32,
    pub technical: u32,
    pub audio_semantic: u32,
    pub time: u32,
    pub gradient: u32,
    pub camera: u32,
    pub transition: u32,
    pub depth: u32,
    pub blends: u32,
    pub narrative: u32,
}

impl DiscoveryResults {
    pub fn total(&self) -> u32 {
        self.static_colors
            + self.static_sound
            + self.colors
            + self.motion
            + self.lighting
            + self.composition
            + self.graphics
            + self.temporal
            + self.technical
            + self.audio_semantic
            + self.time
            + self.gradient
            + self.camera
            + self.transition
            + self.depth
            + self.blends
            + self.narrative
    }
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub results: DiscoveryResults,
    pub truncated: bool,
}

/// Carries whatever was written before the store failed so callers can retry
/// the remainder safely.
#[derive(Debug)]
pub struct BatchFailure {
    pub results: DiscoveryResults,
    pub error: anyhow::Error,
}

enum Ingested {
    Counted,
    Skipped,
    Exhausted,
}

struct InsertQuota {
    remaining: usize,
}

impl InsertQuota {
    fn try_take(&mut self) -> bool {
        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}

pub fn ingest_batch(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    batch: &DiscoveryBatch,
) -> std::result::Result<BatchOutcome, Box<BatchFailure>> {
    let mut results = DiscoveryResults::default();
    let mut truncated = false;

    match ingest_inner(conn, tables, batch, &mut results, &mut truncated) {
        Ok(()) => {
            if let Some(job_id) = &batch.job_id {
                if let Err(error) = append_discovery_run(conn, tables, job_id, &results) {
                    return Err(Box::new(BatchFailure { results, error }));
                }
            }
            Ok(BatchOutcome { results, truncated })
        }
        Err(error) => Err(Box::new(BatchFailure { results, error })),
    }
}

macro_rules! ingest_category {
    ($items:expr, $slot:expr, $truncated:expr, $upsert:expr) => {
        for item in $items {
            match $upsert(item)? {
                Ingested::Counted => $slot += 1,
                Ingested::Skipped => {}
                Ingested::Exhausted => {
                    *$truncated = true;
                    return Ok(());
                }
            }
        }
    };
}

fn ingest_inner(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    batch: &DiscoveryBatch,
    results: &mut DiscoveryResults,
    truncated: &mut bool,
) -> Result<()> {
    let mut names = NamePool::load(conn, tables)?;
    let mut quota = InsertQuota {
        remaining: MAX_ITEMS_PER_BATCH,
    };

    ingest_category!(&batch.static_colors, results.static_colors, truncated, |item| {
        upsert_static_color(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.static_sound, results.static_sound, truncated, |item| {
        upsert_static_sound(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.colors, results.colors, truncated, |item| {
        upsert_learned_color(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.motion, results.motion, truncated, |item| {
        upsert_learned_motion(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.lighting, results.lighting, truncated, |item| {
        upsert_learned_lighting(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.composition, results.composition, truncated, |item| {
        upsert_learned_composition(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.graphics, results.graphics, truncated, |item| {
        upsert_learned_graphics(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.temporal, results.temporal, truncated, |item| {
        upsert_learned_temporal(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.technical, results.technical, truncated, |item| {
        upsert_learned_technical(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.audio_semantic, results.audio_semantic, truncated, |item| {
        upsert_learned_audio_semantic(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.time, results.time, truncated, |item| {
        upsert_learned_time(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.gradient, results.gradient, truncated, |item| {
        upsert_learned_gradient(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.camera, results.camera, truncated, |item| {
        upsert_learned_camera(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.transition, results.transition, truncated, |item| {
        upsert_learned_transition(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.depth, results.depth, truncated, |item| {
        upsert_learned_depth(conn, tables, &mut names, &mut quota, item)
    });
    ingest_category!(&batch.blends, results.blends, truncated, |item| {
        insert_blend(conn, tables, &mut names, &mut quota, item)
    });

    for (aspect, items) in &batch.narrative {
        for item in items {
            match upsert_narrative(conn, tables, &mut names, &mut quota, aspect, item)? {
                Ingested::Counted => results.narrative += 1,
                Ingested::Skipped => {}
                Ingested::Exhausted => {
                    *truncated = true;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

pub fn append_discovery_run(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    job_id: &str,
    results: &DiscoveryResults,
) -> Result<()> {
    if !tables.has("discovery_runs") {
        tracing::warn!("discovery_runs table absent; skipping run record");
        return Ok(());
    }
    use crate::schema::discovery_runs::dsl;
    diesel::insert_into(dsl::discovery_runs)
        .values(models::NewDiscoveryRun {
            job_id: Some(job_id.to_string()),
            results_json: serde_json::to_string(results)?,
            total: results.total() as i32,
        })
        .execute(conn)?;
    Ok(())
}

fn is_unique_violation(e: &diesel::result::Error) -> bool {
    matches!(
        e,
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

/// `"r,g,b"` with an optional `_<opacity>` suffix.
pub fn parse_color_key(raw: &str) -> Option<(i32, i32, i32, Option<i32>)> {
    let raw = raw.trim();
    let (base, opacity) = match raw.split_once('_') {
        Some((base, suffix)) => {
            let pct = suffix.parse::<f64>().ok().map(depth::normalize_pct)?;
            (base, Some(pct.round() as i32))
        }
        None => (raw, None),
    };
    let mut parts = base.split(',').map(|p| p.trim().parse::<i32>());
    let r = parts.next()?.ok()?;
    let g = parts.next()?.ok()?;
    let b = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    let in_range = |v: i32| (0..=255).contains(&v);
    if in_range(r) && in_range(g) && in_range(b) {
        Some((r, g, b, opacity))
    } else {
        None
    }
}

fn map_to_json(map: &serde_json::Map<String, Value>) -> Option<String> {
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map.clone()).to_string())
    }
}

fn upsert_static_color(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    names: &mut NamePool,
    quota: &mut InsertQuota,
    item: &StaticColorItem,
) -> Result<Ingested> {
    if !tables.has("static_colors") {
        tracing::warn!("static_colors table absent; skipping write");
        return Ok(Ingested::Skipped);
    }
    use crate::schema::static_colors::dsl;

    let parsed = match item.key.as_deref() {
        Some(key) => parse_color_key(key),
        None => match (item.r, item.g, item.b) {
            (Some(r), Some(g), Some(b)) => Some((r, g, b, None)),
            _ => None,
        },
    };
    let Some((r, g, b, key_opacity)) = parsed else {
        tracing::warn!("static color item without a usable key; skipping");
        return Ok(Ingested::Skipped);
    };
    let color_key = format!("{r},{g},{b}");

    let split = item.depth_breakdown.as_ref().map(depth::split_color_breakdown);
    let opacity_pct = key_opacity
        .or(item.opacity.map(|o| depth::normalize_pct(o).round() as i32))
        .or(split.as_ref().and_then(|s| s.opacity_pct));

    let existing = dsl::static_colors
        .filter(dsl::color_key.eq(&color_key))
        .select(models::StaticColor::as_select())
        .first(conn)
        .optional()?;

    if existing.is_some() {
        increment_static_color(conn, &color_key, split.as_ref(), opacity_pct)?;
        return Ok(Ingested::Counted);
    }

    if !quota.try_take() {
        return Ok(Ingested::Exhausted);
    }

    let (depth_map, theme_map) = match &split {
        Some(s) => (s.depth.clone(), s.theme.clone()),
        None => (depth::luminance_breakdown(r, g, b).0, Default::default()),
    };
    let name = match &item.name {
        Some(name) => {
            let name = name.trim().to_string();
            names.reserve(conn, tables, &name)?;
            name
        }
        None => names.color_name(conn, tables, r, g, b)?,
    };

    let row = models::NewStaticColor {
        color_key: color_key.clone(),
        r,
        g,
        b,
        count: 1,
        name,
        depth_breakdown_json: map_to_json(&depth_map),
        opacity_pct,
        theme_breakdown_json: map_to_json(&theme_map),
    };
    match diesel::insert_into(dsl::static_colors).values(&row).execute(conn) {
        Ok(_) => Ok(Ingested::Counted),
        Err(e) if is_unique_violation(&e) => {
            increment_static_color(conn, &color_key, split.as_ref(), opacity_pct)?;
            Ok(Ingested::Counted)
        }
        Err(e) => Err(e.into()),
    }
}

fn increment_static_color(
    conn: &mut SqliteConnection,
    key: &str,
    split: Option<&depth::SplitBreakdown>,
    opacity_pct: Option<i32>,
) -> Result<()> {
    use crate::schema::static_colors::dsl;
    let now = chrono::Utc::now().naive_utc();
    match split {
        Some(split) => {
            diesel::update(dsl::static_colors.filter(dsl::color_key.eq(key)))
                .set((
                    dsl::count.eq(dsl::count + 1),
                    dsl::depth_breakdown_json.eq(map_to_json(&split.depth)),
                    dsl::theme_breakdown_json.eq(map_to_json(&split.theme)),
                    dsl::updated_at.eq(now),
                ))
                .execute(conn)?;
        }
        None => {
            diesel::update(dsl::static_colors.filter(dsl::color_key.eq(key)))
                .set((dsl::count.eq(dsl::count + 1), dsl::updated_at.eq(now)))
                .execute(conn)?;
        }
    }
    // A resubmitted opacity replaces the stored one; absence preserves it.
    if let Some(opacity) = opacity_pct {
        diesel::update(dsl::static_colors.filter(dsl::color_key.eq(key)))
            .set(dsl::opacity_pct.eq(Some(opacity)))
            .execute(conn)?;
    }
    Ok(())
}

fn sound_strength_label(strength_pct: f64) -> &'static str {
    if strength_pct < 25.0 {
        "quiet"
    } else if strength_pct < 50.0 {
        "soft"
    } else if strength_pct < 75.0 {
        "medium"
    } else {
        "loud"
    }
}

fn upsert_static_sound(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    names: &mut NamePool,
    quota: &mut InsertQuota,
    item: &StaticSoundItem,
) -> Result<Ingested> {
    if !tables.has("static_sounds") {
        tracing::warn!("static_sounds table absent; skipping write");
        return Ok(Ingested::Skipped);
    }
    use crate::schema::static_sounds::dsl;

    let strength_pct = item
        .strength_pct
        .map(depth::normalize_pct)
        .unwrap_or(0.0);
    let tone = item.tone.as_deref().unwrap_or("").trim().to_lowercase();
    let timbre = item.timbre.as_deref().unwrap_or("").trim().to_lowercase();

    let sound_key = match item.key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            if tone.is_empty() || timbre.is_empty() {
                tracing::warn!("static sound item without a usable key; skipping");
                return Ok(Ingested::Skipped);
            }
            format!("{}_{}_{}", sound_strength_label(strength_pct), tone, timbre)
        }
    };

    let existing = dsl::static_sounds
        .filter(dsl::sound_key.eq(&sound_key))
        .select(models::StaticSound::as_select())
        .first(conn)
        .optional()?;

    let now = chrono::Utc::now().naive_utc();
    if existing.is_some() {
        diesel::update(dsl::static_sounds.filter(dsl::sound_key.eq(&sound_key)))
            .set((dsl::count.eq(dsl::count + 1), dsl::updated_at.eq(now)))
            .execute(conn)?;
        return Ok(Ingested::Counted);
    }

    if !quota.try_take() {
        return Ok(Ingested::Exhausted);
    }

    let name = match &item.name {
        Some(name) => {
            let name = name.trim().to_string();
            names.reserve(conn, tables, &name)?;
            name
        }
        None => names.draw_unique(conn, tables)?,
    };
    let depth_json = item
        .depth_breakdown
        .as_ref()
        .map(|raw| depth::flatten_blend_depths(raw).0)
        .as_ref()
        .and_then(map_to_json);

    let row = models::NewStaticSound {
        sound_key: sound_key.clone(),
        amplitude: item.amplitude.unwrap_or(0.0) as f32,
        strength_pct: strength_pct.round() as i32,
        tone,
        timbre,
        count: 1,
        name,
        depth_breakdown_json: depth_json,
    };
    match diesel::insert_into(dsl::static_sounds).values(&row).execute(conn) {
        Ok(_) => Ok(Ingested::Counted),
        Err(e) if is_unique_violation(&e) => {
            diesel::update(dsl::static_sounds.filter(dsl::sound_key.eq(&sound_key)))
                .set((dsl::count.eq(dsl::count + 1), dsl::updated_at.eq(now)))
                .execute(conn)?;
            Ok(Ingested::Counted)
        }
        Err(e) => Err(e.into()),
    }
}

fn merge_sources<'a>(existing_json: &str, additions: impl Iterator<Item = &'a str>) -> String {
    let mut sources: Vec<String> = serde_json::from_str(existing_json).unwrap_or_default();
    for addition in additions {
        let addition = addition.trim();
        if !addition.is_empty() && !sources.iter().any(|s| s == addition) {
            sources.push(addition.to_string());
        }
    }
    sources.truncate(MAX_SOURCES);
    serde_json::to_string(&sources).unwrap_or_else(|_| "[]".to_string())
}

/// Generic upsert over the structurally identical blend-profile tables.
macro_rules! profile_upserts {
    ($($fn_name:ident => $table:ident, $model:ident, $new:ident;)+) => {
        $(
        fn $fn_name(
            conn: &mut SqliteConnection,
            tables: &TableFlags,
            names: &mut NamePool,
            quota: &mut InsertQuota,
            item: &ProfileItem,
        ) -> Result<Ingested> {
            if !tables.has(stringify!($table)) {
                tracing::warn!("{} table absent; skipping write", stringify!($table));
                return Ok(Ingested::Skipped);
            }
            use crate::schema::$table::dsl;

            let Some(key) = item.canonical_key() else {
                return Ok(Ingested::Skipped);
            };

            let existing = dsl::$table
                .filter(dsl::profile_key.eq(&key))
                .select(models::$model::as_select())
                .first(conn)
                .optional()?;

            let now = chrono::Utc::now().naive_utc();
            if let Some(row) = existing {
                let sources = merge_sources(&row.sources_json, item.source_iter());
                diesel::update(dsl::$table.filter(dsl::profile_key.eq(&key)))
                    .set((
                        dsl::count.eq(dsl::count + 1),
                        dsl::sources_json.eq(sources),
                        dsl::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                return Ok(Ingested::Counted);
            }

            if !quota.try_take() {
                return Ok(Ingested::Exhausted);
            }

            let name = match &item.name {
                Some(name) => {
                    let name = name.trim().to_string();
                    names.reserve(conn, tables, &name)?;
                    name
                }
                None => names.draw_unique(conn, tables)?,
            };
            let depth_json = item
                .depth_breakdown
                .as_ref()
                .map(|raw| depth::flatten_blend_depths(raw).0)
                .as_ref()
                .and_then(map_to_json);

            let row = models::$new {
                profile_key: key.clone(),
                count: 1,
                name,
                sources_json: merge_sources("[]", item.source_iter()),
                depth_breakdown_json: depth_json,
            };
            match diesel::insert_into(dsl::$table).values(&row).execute(conn) {
                Ok(_) => Ok(Ingested::Counted),
                Err(e) if is_unique_violation(&e) => {
                    diesel::update(dsl::$table.filter(dsl::profile_key.eq(&key)))
                        .set((dsl::count.eq(dsl::count + 1), dsl::updated_at.eq(now)))
                        .execute(conn)?;
                    Ok(Ingested::Counted)
                }
                Err(e) => Err(e.into()),
            }
        }
        )+
    };
}

profile_upserts! {
    upsert_learned_lighting => learned_lighting, LearnedLighting, NewLearnedLighting;
    upsert_learned_composition => learned_composition, LearnedComposition, NewLearnedComposition;
    upsert_learned_graphics => learned_graphics, LearnedGraphics, NewLearnedGraphics;
    upsert_learned_temporal => learned_temporal, LearnedTemporal, NewLearnedTemporal;
    upsert_learned_technical => learned_technical, LearnedTechnical, NewLearnedTechnical;
    upsert_learned_time => learned_time, LearnedTime, NewLearnedTime;
    upsert_learned_gradient => learned_gradient, LearnedGradient, NewLearnedGradient;
    upsert_learned_camera => learned_camera, LearnedCamera, NewLearnedCamera;
    upsert_learned_transition => learned_transition, LearnedTransition, NewLearnedTransition;
    upsert_learned_depth => learned_depth, LearnedDepth, NewLearnedDepth;
    upsert_learned_audio_semantic => learned_audio_semantic, LearnedAudioSemantic, NewLearnedAudioSemantic;
}

/// Color blends keep only the 16 primitives in their stored breakdown; theme
/// and opacity contributions are view-time concerns for pure colors only.
fn upsert_learned_color(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    names: &mut NamePool,
    quota: &mut InsertQuota,
    item: &ProfileItem,
) -> Result<Ingested> {
    if !tables.has("learned_colors") {
        tracing::warn!("learned_colors table absent; skipping write");
        return Ok(Ingested::Skipped);
    }
    use crate::schema::learned_colors::dsl;

    let Some(key) = item.canonical_key() else {
        return Ok(Ingested::Skipped);
    };

    let depth_json = item
        .depth_breakdown
        .as_ref()
        .map(|raw| depth::split_color_breakdown(raw).depth)
        .as_ref()
        .and_then(map_to_json);

    let existing = dsl::learned_colors
        .filter(dsl::profile_key.eq(&key))
        .select(models::LearnedColor::as_select())
        .first(conn)
        .optional()?;

    let now = chrono::Utc::now().naive_utc();
    if let Some(row) = existing {
        let sources = merge_sources(&row.sources_json, item.source_iter());
        if let Some(depth_json) = depth_json {
            diesel::update(dsl::learned_colors.filter(dsl::profile_key.eq(&key)))
                .set((
                    dsl::count.eq(dsl::count + 1),
                    dsl::sources_json.eq(sources),
                    dsl::depth_breakdown_json.eq(Some(depth_json)),
                    dsl::updated_at.eq(now),
                ))
                .execute(conn)?;
        } else {
            diesel::update(dsl::learned_colors.filter(dsl::profile_key.eq(&key)))
                .set((
                    dsl::count.eq(dsl::count + 1),
                    dsl::sources_json.eq(sources),
                    dsl::updated_at.eq(now),
                ))
                .execute(conn)?;
        }
        return Ok(Ingested::Counted);
    }

    if !quota.try_take() {
        return Ok(Ingested::Exhausted);
    }

    let name = match &item.name {
        Some(name) => {
            let name = name.trim().to_string();
            names.reserve(conn, tables, &name)?;
            name
        }
        None => names.draw_unique(conn, tables)?,
    };
    let row = models::NewLearnedColor {
        profile_key: key.clone(),
        count: 1,
        name,
        sources_json: merge_sources("[]", item.source_iter()),
        depth_breakdown_json: depth_json,
    };
    match diesel::insert_into(dsl::learned_colors).values(&row).execute(conn) {
        Ok(_) => Ok(Ingested::Counted),
        Err(e) if is_unique_violation(&e) => {
            diesel::update(dsl::learned_colors.filter(dsl::profile_key.eq(&key)))
                .set((dsl::count.eq(dsl::count + 1), dsl::updated_at.eq(now)))
                .execute(conn)?;
            Ok(Ingested::Counted)
        }
        Err(e) => Err(e.into()),
    }
}

fn motion_level_label(level: f64) -> &'static str {
    if level < 0.10 {
        "still"
    } else if level < 0.30 {
        "drift"
    } else if level < 0.50 {
        "slow"
    } else if level < 0.70 {
        "medium"
    } else if level < 0.90 {
        "fast"
    } else {
        "frenetic"
    }
}

fn upsert_learned_motion(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    names: &mut NamePool,
    quota: &mut InsertQuota,
    item: &MotionItem,
) -> Result<Ingested> {
    if !tables.has("learned_motion") {
        tracing::warn!("learned_motion table absent; skipping write");
        return Ok(Ingested::Skipped);
    }
    use crate::schema::learned_motion::dsl;

    let key = match item.key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            let Some(trend) = item.motion_trend.as_deref().map(str::trim) else {
                return Ok(Ingested::Skipped);
            };
            if trend.is_empty() {
                return Ok(Ingested::Skipped);
            }
            format!(
                "{}_{}",
                motion_level_label(item.motion_level.unwrap_or(0.0)),
                trend.to_lowercase()
            )
        }
    };

    let existing = dsl::learned_motion
        .filter(dsl::profile_key.eq(&key))
        .select(models::LearnedMotion::as_select())
        .first(conn)
        .optional()?;

    let now = chrono::Utc::now().naive_utc();
    let sources_iter = || {
        item.source_prompt
            .iter()
            .map(String::as_str)
            .chain(item.sources.iter().map(String::as_str))
    };
    if let Some(row) = existing {
        let sources = merge_sources(&row.sources_json, sources_iter());
        diesel::update(dsl::learned_motion.filter(dsl::profile_key.eq(&key)))
            .set((
                dsl::count.eq(dsl::count + 1),
                dsl::sources_json.eq(sources),
                dsl::updated_at.eq(now),
            ))
            .execute(conn)?;
        return Ok(Ingested::Counted);
    }

    if !quota.try_take() {
        return Ok(Ingested::Exhausted);
    }

    let name = match &item.name {
        Some(name) => {
            let name = name.trim().to_string();
            names.reserve(conn, tables, &name)?;
            name
        }
        None => names.draw_unique(conn, tables)?,
    };
    let depth_json = item
        .depth_breakdown
        .as_ref()
        .map(|raw| depth::flatten_blend_depths(raw).0)
        .as_ref()
        .and_then(map_to_json);

    let row = models::NewLearnedMotion {
        profile_key: key.clone(),
        motion_level: item.motion_level.unwrap_or(0.0) as f32,
        motion_std: item.motion_std.unwrap_or(0.0) as f32,
        motion_trend: item
            .motion_trend
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_lowercase(),
        direction: item.direction.clone(),
        rhythm: item.rhythm.clone(),
        count: 1,
        name,
        sources_json: merge_sources("[]", sources_iter()),
        depth_breakdown_json: depth_json,
    };
    match diesel::insert_into(dsl::learned_motion).values(&row).execute(conn) {
        Ok(_) => Ok(Ingested::Counted),
        Err(e) if is_unique_violation(&e) => {
            diesel::update(dsl::learned_motion.filter(dsl::profile_key.eq(&key)))
                .set((dsl::count.eq(dsl::count + 1), dsl::updated_at.eq(now)))
                .execute(conn)?;
            Ok(Ingested::Counted)
        }
        Err(e) => Err(e.into()),
    }
}

/// Uncategorized blends always insert; only the display name is deduplicated.
fn insert_blend(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    names: &mut NamePool,
    quota: &mut InsertQuota,
    item: &BlendItem,
) -> Result<Ingested> {
    if !tables.has("learned_blends") {
        tracing::warn!("learned_blends table absent; skipping write");
        return Ok(Ingested::Skipped);
    }
    use crate::schema::learned_blends::dsl;

    if !quota.try_take() {
        return Ok(Ingested::Exhausted);
    }

    let name = match item.name.as_deref().map(str::trim) {
        Some(base) if !base.is_empty() => names.blend_name(conn, tables, base)?,
        _ => names.draw_unique(conn, tables)?,
    };
    let depths_json = item
        .primitive_depths
        .as_ref()
        .map(|raw| depth::flatten_blend_depths(raw).0)
        .as_ref()
        .and_then(map_to_json);

    let row = models::NewLearnedBlend {
        name,
        domain: item
            .domain
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_lowercase(),
        inputs_json: item
            .inputs
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "[]".to_string()),
        output_json: item
            .output
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string()),
        primitive_depths_json: depths_json,
    };
    diesel::insert_into(dsl::learned_blends)
        .values(&row)
        .execute(conn)?;
    Ok(Ingested::Counted)
}

fn upsert_narrative(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    names: &mut NamePool,
    quota: &mut InsertQuota,
    aspect: &str,
    item: &NarrativeItem,
) -> Result<Ingested> {
    if !tables.has("narrative_entries") {
        tracing::warn!("narrative_entries table absent; skipping write");
        return Ok(Ingested::Skipped);
    }
    use crate::schema::narrative_entries::dsl;

    let raw_key = item
        .key
        .as_deref()
        .or(item.value.as_deref())
        .unwrap_or("");
    let entry_key = raw_key.trim().to_lowercase();
    // Empty keys never count against the quota.
    if entry_key.is_empty() {
        return Ok(Ingested::Skipped);
    }

    let existing = dsl::narrative_entries
        .filter(dsl::aspect.eq(aspect))
        .filter(dsl::entry_key.eq(&entry_key))
        .select(models::NarrativeEntry::as_select())
        .first(conn)
        .optional()?;

    let now = chrono::Utc::now().naive_utc();
    if existing.is_some() {
        diesel::update(
            dsl::narrative_entries
                .filter(dsl::aspect.eq(aspect))
                .filter(dsl::entry_key.eq(&entry_key)),
        )
        .set((dsl::count.eq(dsl::count + 1), dsl::updated_at.eq(now)))
        .execute(conn)?;
        return Ok(Ingested::Counted);
    }

    if !quota.try_take() {
        return Ok(Ingested::Exhausted);
    }

    let value = item
        .value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(&entry_key)
        .to_string();
    let name = item
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&value)
        .to_string();
    names.reserve(conn, tables, &name)?;

    let row = models::NewNarrativeEntry {
        aspect: aspect.to_string(),
        entry_key: entry_key.clone(),
        value,
        count: 1,
        name,
    };
    match diesel::insert_into(dsl::narrative_entries).values(&row).execute(conn) {
        Ok(_) => Ok(Ingested::Counted),
        Err(e) if is_unique_violation(&e) => {
            diesel::update(
                dsl::narrative_entries
                    .filter(dsl::aspect.eq(aspect))
                    .filter(dsl::entry_key.eq(&entry_key)),
            )
            .set((dsl::count.eq(dsl::count + 1), dsl::updated_at.eq(now)))
            .execute(conn)?;
            Ok(Ingested::Counted)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::origins;
    use diesel::prelude::*;
    use diesel::Connection;
    use diesel_migrations::MigrationHarness;

    fn setup() -> (SqliteConnection, TableFlags) {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.run_pending_migrations(crate::db::MIGRATIONS).unwrap();
        let tables = TableFlags::detect(&mut conn).unwrap();
        (conn, tables)
    }

    fn color_item(key: &str) -> StaticColorItem {
        StaticColorItem {
            key: Some(key.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_cap_enforcement_and_reingest() {
        let (mut conn, tables) = setup();

        let keys: Vec<String> = (0..20).map(|i| format!("{},{},{}", i, i, i)).collect();
        let batch = DiscoveryBatch {
            static_colors: keys.iter().map(|k| color_item(k)).collect(),
            ..Default::default()
        };

        let outcome = ingest_batch(&mut conn, &tables, &batch).unwrap();
        assert!(outcome.truncated);
        assert_eq!(outcome.results.static_colors, 14);

        use crate::schema::static_colors::dsl;
        let rows: i64 = dsl::static_colors.count().get_result(&mut conn).unwrap();
        assert_eq!(rows, 14);

        // Same 20 keys again: 14 increments (no quota) plus 6 fresh inserts.
        let outcome = ingest_batch(&mut conn, &tables, &batch).unwrap();
        assert!(!outcome.truncated);
        assert_eq!(outcome.results.static_colors, 20);

        let rows: i64 = dsl::static_colors.count().get_result(&mut conn).unwrap();
        assert_eq!(rows, 20);
        let max_count: i32 = dsl::static_colors
            .select(diesel::dsl::max(dsl::count))
            .first::<Option<i32>>(&mut conn)
            .unwrap()
            .unwrap();
        assert_eq!(max_count, 2);
    }

    #[test]
    fn test_color_key_canonicalization() {
        let (mut conn, tables) = setup();

        let batch = DiscoveryBatch {
            static_colors: vec![color_item("100,125,150_1.0")],
            ..Default::default()
        };
        let outcome = ingest_batch(&mut conn, &tables, &batch).unwrap();
        assert_eq!(outcome.results.static_colors, 1);

        use crate::schema::static_colors::dsl;
        let row: models::StaticColor = dsl::static_colors
            .select(models::StaticColor::as_select())
            .first(&mut conn)
            .unwrap();
        assert_eq!(row.color_key, "100,125,150");
        assert_eq!(row.opacity_pct, Some(100));
        // Luminance model applies when no breakdown is provided.
        let breakdown: serde_json::Value =
            serde_json::from_str(row.depth_breakdown_json.as_deref().unwrap()).unwrap();
        let keys: Vec<&String> = breakdown.as_object().unwrap().keys().collect();
        for key in keys {
            assert!(origins::is_color_primitive(key));
        }
    }

    #[test]
    fn test_breakdown_split_on_ingest() {
        let (mut conn, tables) = setup();

        let batch = DiscoveryBatch {
            static_colors: vec![StaticColorItem {
                key: Some("10,20,30".to_string()),
                depth_breakdown: Some(serde_json::json!({
                    "black": 0.8,
                    "opacity": 50,
                    "neon_noir": 30,
                })),
                ..Default::default()
            }],
            ..Default::default()
        };
        ingest_batch(&mut conn, &tables, &batch).unwrap();

        use crate::schema::static_colors::dsl;
        let row: models::StaticColor = dsl::static_colors
            .select(models::StaticColor::as_select())
            .first(&mut conn)
            .unwrap();
        let depth: serde_json::Value =
            serde_json::from_str(row.depth_breakdown_json.as_deref().unwrap()).unwrap();
        assert_eq!(depth["black"], 80.0);
        assert!(depth.get("opacity").is_none());
        assert!(depth.get("neon_noir").is_none());
        assert_eq!(row.opacity_pct, Some(50));
        let theme: serde_json::Value =
            serde_json::from_str(row.theme_breakdown_json.as_deref().unwrap()).unwrap();
        assert_eq!(theme["neon_noir"], 30.0);
    }

    #[test]
    fn test_narrative_upsert_and_empty_keys() {
        let (mut conn, tables) = setup();

        let mut narrative = BTreeMap::new();
        narrative.insert(
            "genre".to_string(),
            vec![
                NarrativeItem {
                    key: Some("Noir ".to_string()),
                    value: Some("noir".to_string()),
                    name: None,
                },
                NarrativeItem {
                    key: Some("   ".to_string()),
                    value: None,
                    name: None,
                },
            ],
        );
        let batch = DiscoveryBatch {
            narrative,
            ..Default::default()
        };

        let outcome = ingest_batch(&mut conn, &tables, &batch).unwrap();
        assert_eq!(outcome.results.narrative, 1);

        use crate::schema::narrative_entries::dsl;
        let row: models::NarrativeEntry = dsl::narrative_entries
            .select(models::NarrativeEntry::as_select())
            .first(&mut conn)
            .unwrap();
        assert_eq!(row.aspect, "genre");
        assert_eq!(row.entry_key, "noir");
        assert_eq!(row.count, 1);

        let outcome = ingest_batch(&mut conn, &tables, &batch).unwrap();
        assert_eq!(outcome.results.narrative, 1);
        let row: models::NarrativeEntry = dsl::narrative_entries
            .select(models::NarrativeEntry::as_select())
            .first(&mut conn)
            .unwrap();
        assert_eq!(row.count, 2);
    }

    #[test]
    fn test_blends_always_insert_with_unique_names() {
        let (mut conn, tables) = setup();

        let blend = |name: &str| BlendItem {
            name: Some(name.to_string()),
            domain: Some("color".to_string()),
            ..Default::default()
        };
        let batch = DiscoveryBatch {
            blends: vec![blend("duskfall"), blend("duskfall")],
            ..Default::default()
        };
        let outcome = ingest_batch(&mut conn, &tables, &batch).unwrap();
        assert_eq!(outcome.results.blends, 2);

        use crate::schema::learned_blends::dsl;
        let names: Vec<String> = dsl::learned_blends.select(dsl::name).load(&mut conn).unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"duskfall".to_string()));
        assert!(names.contains(&"duskfall2".to_string()));
    }

    #[test]
    fn test_discovery_run_recorded_for_job() {
        let (mut conn, tables) = setup();

        let batch = DiscoveryBatch {
            job_id: Some("job-1".to_string()),
            ..Default::default()
        };
        let outcome = ingest_batch(&mut conn, &tables, &batch).unwrap();
        assert_eq!(outcome.results.total(), 0);

        use crate::schema::discovery_runs::dsl;
        let row: models::DiscoveryRun = dsl::discovery_runs
            .select(models::DiscoveryRun::as_select())
            .first(&mut conn)
            .unwrap();
        assert_eq!(row.job_id.as_deref(), Some("job-1"));
        assert_eq!(row.total, 0);
    }

    #[test]
    fn test_profile_upsert_merges_sources() {
        let (mut conn, tables) = setup();

        let item = |prompt: &str| ProfileItem {
            key: Some("warm_drift".to_string()),
            source_prompt: Some(prompt.to_string()),
            ..Default::default()
        };
        let first = DiscoveryBatch {
            gradient: vec![item("sunset one")],
            ..Default::default()
        };
        let second = DiscoveryBatch {
            gradient: vec![item("sunset two")],
            ..Default::default()
        };
        ingest_batch(&mut conn, &tables, &first).unwrap();
        ingest_batch(&mut conn, &tables, &second).unwrap();

        use crate::schema::learned_gradient::dsl;
        let row: models::LearnedGradient = dsl::learned_gradient
            .select(models::LearnedGradient::as_select())
            .first(&mut conn)
            .unwrap();
        assert_eq!(row.count, 2);
        let sources: Vec<String> = serde_json::from_str(&row.sources_json).unwrap();
        assert_eq!(sources, vec!["sunset one", "sunset two"]);
    }
}
