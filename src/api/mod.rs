pub mod backfill_api;
pub mod interpret_api;
pub mod jobs_api;
pub mod knowledge_api;
pub mod learning_api;
pub mod loop_api;
pub mod registries_api;
pub mod system_api;

mod jobs_test;
mod knowledge_test;

use crate::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;

/// Loop state payload ceiling (25 MB).
pub const LOOP_STATE_BODY_LIMIT: usize = 25 * 1024 * 1024;
/// Rendered videos can be large; uploads get their own ceiling.
pub const UPLOAD_BODY_LIMIT: usize = 512 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        // Jobs
        .route("/jobs", post(jobs_api::create_job).get(jobs_api::list_jobs))
        .route("/jobs/:id", get(jobs_api::get_job))
        .route(
            "/jobs/:id/upload",
            post(jobs_api::upload_video).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/jobs/:id/download", get(jobs_api::download_video))
        .route("/jobs/:id/feedback", post(jobs_api::post_feedback))
        // Learning & events
        .route("/learning", post(learning_api::create_learning_run))
        .route("/learning/runs", get(learning_api::list_learning_runs))
        .route(
            "/events",
            post(learning_api::create_event).get(learning_api::list_events),
        )
        // Interpretations
        .route(
            "/interpret/queue",
            post(interpret_api::queue_interpretation).get(interpret_api::get_queue),
        )
        .route("/interpret/:id", patch(interpret_api::patch_interpretation))
        .route("/interpretations", post(interpret_api::create_interpretation))
        .route(
            "/interpretations/batch",
            post(interpret_api::create_interpretations_batch),
        )
        .route(
            "/linguistic/batch",
            post(interpret_api::create_linguistic_batch),
        )
        // Knowledge
        .route(
            "/knowledge/discoveries",
            post(knowledge_api::post_discoveries),
        )
        .route("/knowledge/for-creation", get(knowledge_api::for_creation))
        // Registries
        .route("/registries", get(registries_api::get_registries))
        .route("/registries/coverage", get(registries_api::get_coverage))
        .route(
            "/registries/backfill-names",
            post(backfill_api::backfill_names),
        )
        .route(
            "/registries/backfill-rows",
            get(backfill_api::backfill_rows),
        )
        .route(
            "/registries/backfill-depths",
            post(backfill_api::backfill_depths),
        )
        // Loop
        .route(
            "/loop/config",
            get(loop_api::get_config).post(loop_api::post_config),
        )
        .route(
            "/loop/state",
            get(loop_api::get_state)
                .post(loop_api::post_state)
                .layer(DefaultBodyLimit::max(LOOP_STATE_BODY_LIMIT)),
        )
        .route("/loop/status", get(loop_api::get_status))
        .route("/loop/progress", get(loop_api::get_progress))
        .route("/loop/diagnostics", get(loop_api::get_diagnostics))
        // System
        .route("/health", get(system_api::health))
        .route("/api/health", get(system_api::health))
        .route("/metrics", get(system_api::metrics))
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::config::Config;
    use crate::db::{self, TableFlags};
    use crate::services::kv::KvWriteLimiter;
    use crate::storage::FsBlobStore;
    use diesel::r2d2::{ConnectionManager, Pool};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// One pooled connection over a shared in-memory database; the TempDir
    /// must outlive the state to keep the blob root alive.
    pub fn test_state() -> (AppState, TempDir) {
        let manager = ConnectionManager::<diesel::sqlite::SqliteConnection>::new(":memory:");
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        {
            let mut conn = pool.get().unwrap();
            db::run_migrations(&mut conn).unwrap();
        }
        let tables = {
            let mut conn = pool.get().unwrap();
            TableFlags::detect(&mut conn).unwrap()
        };
        let dir = TempDir::new().unwrap();
        let config: Config = toml::from_str(Config::default_template()).unwrap();
        let state = AppState {
            db: pool,
            config: Arc::new(config),
            tables: Arc::new(tables),
            blobs: Arc::new(FsBlobStore::new(dir.path()).unwrap()),
            kv_limiter: Arc::new(KvWriteLimiter::new()),
        };
        (state, dir)
    }

    pub fn test_app() -> (axum::Router, TempDir) {
        let (state, dir) = test_state();
        (routes().with_state(state), dir)
    }
}
