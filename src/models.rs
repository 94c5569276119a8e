use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

// Job models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::jobs)]
pub struct Job {
    pub id: String,
    pub prompt: String,
    pub duration_seconds: Option<f32>,
    pub status: String,
    pub r2_key: Option<String>,
    pub workflow_type: Option<String>,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
    #[serde(with = "ts_seconds")]
    pub updated_at: NaiveDateTime,
}

impl Job {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

// Timestamps are set from code: job ordering needs sub-second precision,
// which CURRENT_TIMESTAMP does not provide.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::jobs)]
pub struct NewJob {
    pub id: String,
    pub prompt: String,
    pub duration_seconds: Option<f32>,
    pub status: String,
    pub workflow_type: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewJob {
    pub fn pending(
        prompt: String,
        duration_seconds: Option<f32>,
        workflow_type: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        NewJob {
            id: uuid::Uuid::new_v4().to_string(),
            prompt,
            duration_seconds,
            status: "pending".to_string(),
            workflow_type,
            created_at: now,
            updated_at: now,
        }
    }
}

mod ts_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let dt = DateTime::<Utc>::from_naive_utc_and_offset(*date, Utc);
        serializer.serialize_str(&dt.to_rfc3339())
    }

    #[allow(dead_code)]
    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let dt = DateTime::parse_from_rfc3339(&s).map_err(serde::de::Error::custom)?;
        Ok(dt.with_timezone(&Utc).naive_utc())
    }
}

// Learning run models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::learning_runs)]
pub struct LearningRun {
    pub id: Option<i32>,
    pub job_id: Option<String>,
    pub prompt: String,
    pub spec_json: String,
    pub analysis_json: String,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::learning_runs)]
pub struct NewLearningRun {
    pub job_id: Option<String>,
    pub prompt: String,
    pub spec_json: String,
    pub analysis_json: String,
}

// Discovery run models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::discovery_runs)]
pub struct DiscoveryRun {
    pub id: Option<i32>,
    pub job_id: Option<String>,
    pub results_json: String,
    pub total: i32,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::discovery_runs)]
pub struct NewDiscoveryRun {
    pub job_id: Option<String>,
    pub results_json: String,
    pub total: i32,
}

// Event models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::events)]
pub struct Event {
    pub id: Option<i32>,
    pub event_type: String,
    pub job_id: Option<String>,
    pub payload_json: Option<String>,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::events)]
pub struct NewEvent {
    pub event_type: String,
    pub job_id: Option<String>,
    pub payload_json: Option<String>,
}

// Feedback models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::feedback)]
pub struct Feedback {
    pub id: Option<i32>,
    pub job_id: String,
    pub rating: i32,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
    #[serde(with = "ts_seconds")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::feedback)]
pub struct NewFeedback {
    pub job_id: String,
    pub rating: i32,
}

// Interpretation models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::interpretations)]
pub struct Interpretation {
    pub id: String,
    pub prompt: String,
    pub instruction_json: Option<String>,
    pub source: String,
    pub status: String,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
    #[serde(with = "ts_seconds")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::interpretations)]
pub struct NewInterpretation {
    pub id: String,
    pub prompt: String,
    pub instruction_json: Option<String>,
    pub source: String,
    pub status: String,
}

// KV side-channel model; reads select the value column directly.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::kv_store)]
pub struct NewKvEntry {
    pub key: String,
    pub value: String,
}

// Static registry models (pure, per-frame/per-sample)
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::static_colors)]
pub struct StaticColor {
    pub id: Option<i32>,
    pub color_key: String,
    pub r: i32,
    pub g: i32,
    pub b: i32,
    pub count: i32,
    pub name: String,
    pub depth_breakdown_json: Option<String>,
    pub opacity_pct: Option<i32>,
    pub theme_breakdown_json: Option<String>,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
    #[serde(with = "ts_seconds")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::static_colors)]
pub struct NewStaticColor {
    pub color_key: String,
    pub r: i32,
    pub g: i32,
    pub b: i32,
    pub count: i32,
    pub name: String,
    pub depth_breakdown_json: Option<String>,
    pub opacity_pct: Option<i32>,
    pub theme_breakdown_json: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::static_sounds)]
pub struct StaticSound {
    pub id: Option<i32>,
    pub sound_key: String,
    pub amplitude: f32,
    pub strength_pct: i32,
    pub tone: String,
    pub timbre: String,
    pub count: i32,
    pub name: String,
    pub depth_breakdown_json: Option<String>,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
    #[serde(with = "ts_seconds")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::static_sounds)]
pub struct NewStaticSound {
    pub sound_key: String,
    pub amplitude: f32,
    pub strength_pct: i32,
    pub tone: String,
    pub timbre: String,
    pub count: i32,
    pub name: String,
    pub depth_breakdown_json: Option<String>,
}

// Blended registry models. Every domain table shares the profile shape; the
// macro keeps the twelve identical declarations honest.
macro_rules! blend_profile_models {
    ($($table:ident => $model:ident, $new:ident;)+) => {
        $(
            #[derive(Debug, Clone, Queryable, Selectable, Serialize)]
            #[diesel(table_name = crate::schema::$table)]
            pub struct $model {
                pub id: Option<i32>,
                pub profile_key: String,
                pub count: i32,
                pub name: String,
                pub sources_json: String,
                pub depth_breakdown_json: Option<String>,
                #[serde(with = "ts_seconds")]
                pub created_at: NaiveDateTime,
                #[serde(with = "ts_seconds")]
                pub updated_at: NaiveDateTime,
            }

            #[derive(Debug, Insertable)]
            #[diesel(table_name = crate::schema::$table)]
            pub struct $new {
                pub profile_key: String,
                pub count: i32,
                pub name: String,
                pub sources_json: String,
                pub depth_breakdown_json: Option<String>,
            }
        )+
    };
}

blend_profile_models! {
    learned_colors => LearnedColor, NewLearnedColor;
    learned_lighting => LearnedLighting, NewLearnedLighting;
    learned_composition => LearnedComposition, NewLearnedComposition;
    learned_graphics => LearnedGraphics, NewLearnedGraphics;
    learned_temporal => LearnedTemporal, NewLearnedTemporal;
    learned_technical => LearnedTechnical, NewLearnedTechnical;
    learned_time => LearnedTime, NewLearnedTime;
    learned_gradient => LearnedGradient, NewLearnedGradient;
    learned_camera => LearnedCamera, NewLearnedCamera;
    learned_transition => LearnedTransition, NewLearnedTransition;
    learned_depth => LearnedDepth, NewLearnedDepth;
    learned_audio_semantic => LearnedAudioSemantic, NewLearnedAudioSemantic;
}

// Motion carries the measured profile columns on top of the common shape.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::learned_motion)]
pub struct LearnedMotion {
    pub id: Option<i32>,
    pub profile_key: String,
    pub motion_level: f32,
    pub motion_std: f32,
    pub motion_trend: String,
    pub direction: Option<String>,
    pub rhythm: Option<String>,
    pub count: i32,
    pub name: String,
    pub sources_json: String,
    pub depth_breakdown_json: Option<String>,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
    #[serde(with = "ts_seconds")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::learned_motion)]
pub struct NewLearnedMotion {
    pub profile_key: String,
    pub motion_level: f32,
    pub motion_std: f32,
    pub motion_trend: String,
    pub direction: Option<String>,
    pub rhythm: Option<String>,
    pub count: i32,
    pub name: String,
    pub sources_json: String,
    pub depth_breakdown_json: Option<String>,
}

// Uncategorized blend fallback, insert-only.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::learned_blends)]
pub struct LearnedBlend {
    pub id: Option<i32>,
    pub name: String,
    pub domain: String,
    pub inputs_json: String,
    pub output_json: String,
    pub primitive_depths_json: Option<String>,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::learned_blends)]
pub struct NewLearnedBlend {
    pub name: String,
    pub domain: String,
    pub inputs_json: String,
    pub output_json: String,
    pub primitive_depths_json: Option<String>,
}

// Semantic registry models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::narrative_entries)]
pub struct NarrativeEntry {
    pub id: Option<i32>,
    pub aspect: String,
    pub entry_key: String,
    pub value: String,
    pub count: i32,
    pub name: String,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
    #[serde(with = "ts_seconds")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::narrative_entries)]
pub struct NewNarrativeEntry {
    pub aspect: String,
    pub entry_key: String,
    pub value: String,
    pub count: i32,
    pub name: String,
}

// Name reserve model; insert-only, lookups load the name column.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::name_reserve)]
pub struct NewNameReserveEntry {
    pub name: String,
}

// Linguistic variant models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::linguistic_variants)]
pub struct LinguisticVariant {
    pub id: Option<i32>,
    pub span: String,
    pub canonical: String,
    pub domain: String,
    pub variant_type: String,
    pub count: i32,
    #[serde(with = "ts_seconds")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::linguistic_variants)]
pub struct NewLinguisticVariant {
    pub span: String,
    pub canonical: String,
    pub domain: String,
    pub variant_type: String,
    pub count: i32,
}

// Loop blobs live in kv_store as JSON, not in relational tables. The state
// blob is single-writer (the loop controller); version is checked on replace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u32,
    #[serde(default = "default_exploit_ratio")]
    pub exploit_ratio: f64,
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: f64,
}

fn default_delay_seconds() -> u32 {
    30
}

fn default_exploit_ratio() -> f64 {
    0.5
}

fn default_duration_seconds() -> f64 {
    6.0
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            enabled: false,
            delay_seconds: default_delay_seconds(),
            exploit_ratio: default_exploit_ratio(),
            duration_seconds: default_duration_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopState {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub good_prompts: Vec<String>,
    #[serde(default)]
    pub recent_prompts: Vec<String>,
    #[serde(default)]
    pub duration_base: f64,
    #[serde(default)]
    pub exploit_count: u64,
    #[serde(default)]
    pub explore_count: u64,
    #[serde(default)]
    pub last_run_at: Option<String>,
    #[serde(default)]
    pub last_prompt: Option<String>,
    #[serde(default)]
    pub last_job_id: Option<String>,
}
