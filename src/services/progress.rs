//! Read-side projections: learning precision, discovery rate, repetition
//! score, and registry coverage. Everything here is stateless and cheap
//! enough to co-request on every loop poll.

use anyhow::Result;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::TableFlags;
use crate::services::origins;

/// Headline goal shown next to the measured precision.
pub const TARGET_PRECISION_PCT: f64 = 95.0;

/// Rows considered "concentrated" for the repetition score.
const REPETITION_TOP_N: usize = 20;

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressReport {
    pub total_runs: i64,
    pub with_learning: i64,
    pub with_discovery: i64,
    pub precision_pct: f64,
    pub discovery_rate_pct: f64,
    pub target_pct: f64,
    pub repetition_score: f64,
    pub coverage: CoverageSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub static_color_count: i64,
    pub static_color_coverage_pct: f64,
    pub narrative: BTreeMap<String, AspectCoverage>,
    pub sound_primitives: BTreeMap<String, bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AspectCoverage {
    pub count: i64,
    pub target: i64,
    pub pct: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobDiagnostics {
    pub job_id: String,
    pub prompt: String,
    pub status: String,
    pub has_learning: bool,
    pub has_discovery: bool,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn pct(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 * 100.0 / whole as f64)
    }
}

fn recent_completed_job_ids(conn: &mut SqliteConnection, last: i64) -> Result<Vec<String>> {
    use crate::schema::jobs::dsl;
    let ids = dsl::jobs
        .filter(dsl::status.eq("completed"))
        .order(dsl::updated_at.desc())
        .limit(last)
        .select(dsl::id)
        .load::<String>(conn)?;
    Ok(ids)
}

fn jobs_with_learning(conn: &mut SqliteConnection, ids: &[String]) -> Result<i64> {
    use crate::schema::learning_runs::dsl;
    let hit: Vec<Option<String>> = dsl::learning_runs
        .filter(dsl::job_id.eq_any(ids))
        .select(dsl::job_id)
        .distinct()
        .load(conn)?;
    Ok(hit.into_iter().flatten().count() as i64)
}

fn jobs_with_discovery(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    ids: &[String],
) -> Result<i64> {
    if !tables.has("discovery_runs") {
        return Ok(0);
    }
    use crate::schema::discovery_runs::dsl;
    let hit: Vec<Option<String>> = dsl::discovery_runs
        .filter(dsl::job_id.eq_any(ids))
        .select(dsl::job_id)
        .distinct()
        .load(conn)?;
    Ok(hit.into_iter().flatten().count() as i64)
}

/// Share of the learned_motion total concentrated in its top rows, 0..1.
pub fn repetition_score(conn: &mut SqliteConnection, tables: &TableFlags) -> Result<f64> {
    if !tables.has("learned_motion") {
        return Ok(0.0);
    }
    use crate::schema::learned_motion::dsl;
    let counts: Vec<i32> = dsl::learned_motion
        .order(dsl::count.desc())
        .select(dsl::count)
        .load(conn)?;
    let total: i64 = counts.iter().map(|c| *c as i64).sum();
    if total == 0 {
        return Ok(0.0);
    }
    let top: i64 = counts
        .iter()
        .take(REPETITION_TOP_N)
        .map(|c| *c as i64)
        .sum();
    Ok(round2(top as f64 / total as f64))
}

pub fn compute_coverage(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
) -> Result<CoverageSnapshot> {
    let static_color_count: i64 = if tables.has("static_colors") {
        use crate::schema::static_colors::dsl;
        dsl::static_colors.count().get_result(conn)?
    } else {
        0
    };

    let mut narrative = BTreeMap::new();
    for (aspect, target) in origins::NARRATIVE_ORIGIN_SIZES {
        let count: i64 = if tables.has("narrative_entries") {
            use crate::schema::narrative_entries::dsl;
            dsl::narrative_entries
                .filter(dsl::aspect.eq(aspect))
                .count()
                .get_result(conn)?
        } else {
            0
        };
        narrative.insert(
            aspect.to_string(),
            AspectCoverage {
                count,
                target,
                pct: pct(count, target).min(100.0),
            },
        );
    }

    let mut sound_primitives = BTreeMap::new();
    for primitive in origins::SOUND_PRIMITIVES {
        let present = if tables.has("static_sounds") {
            use crate::schema::static_sounds::dsl;
            let n: i64 = dsl::static_sounds
                .filter(dsl::timbre.eq(primitive))
                .count()
                .get_result(conn)?;
            n > 0
        } else {
            false
        };
        sound_primitives.insert(primitive.to_string(), present);
    }

    Ok(CoverageSnapshot {
        static_color_count,
        static_color_coverage_pct: pct(static_color_count, origins::STATIC_COLOR_TARGET),
        narrative,
        sound_primitives,
    })
}

pub fn compute_progress(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    last: i64,
) -> Result<ProgressReport> {
    let ids = recent_completed_job_ids(conn, last)?;
    let total_runs = ids.len() as i64;
    let with_learning = jobs_with_learning(conn, &ids)?;
    let with_discovery = jobs_with_discovery(conn, tables, &ids)?;

    Ok(ProgressReport {
        total_runs,
        with_learning,
        with_discovery,
        precision_pct: pct(with_learning, total_runs),
        discovery_rate_pct: pct(with_discovery, total_runs),
        target_pct: TARGET_PRECISION_PCT,
        repetition_score: repetition_score(conn, tables)?,
        coverage: compute_coverage(conn, tables)?,
    })
}

pub fn compute_diagnostics(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    last: i64,
) -> Result<Vec<JobDiagnostics>> {
    use crate::schema::jobs::dsl;
    let jobs: Vec<(String, String, String)> = dsl::jobs
        .order(dsl::created_at.desc())
        .limit(last)
        .select((dsl::id, dsl::prompt, dsl::status))
        .load(conn)?;

    let ids: Vec<String> = jobs.iter().map(|(id, _, _)| id.clone()).collect();

    let learned: Vec<Option<String>> = {
        use crate::schema::learning_runs::dsl as lr;
        lr::learning_runs
            .filter(lr::job_id.eq_any(&ids))
            .select(lr::job_id)
            .distinct()
            .load(conn)?
    };
    let learned: std::collections::HashSet<String> = learned.into_iter().flatten().collect();

    let discovered: std::collections::HashSet<String> = if tables.has("discovery_runs") {
        use crate::schema::discovery_runs::dsl as dr;
        let rows: Vec<Option<String>> = dr::discovery_runs
            .filter(dr::job_id.eq_any(&ids))
            .select(dr::job_id)
            .distinct()
            .load(conn)?;
        rows.into_iter().flatten().collect()
    } else {
        Default::default()
    };

    Ok(jobs
        .into_iter()
        .map(|(id, prompt, status)| JobDiagnostics {
            has_learning: learned.contains(&id),
            has_discovery: discovered.contains(&id),
            job_id: id,
            prompt,
            status,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewDiscoveryRun, NewJob, NewLearningRun};
    use diesel::prelude::*;
    use diesel::Connection;
    use diesel_migrations::MigrationHarness;

    fn setup() -> (SqliteConnection, TableFlags) {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.run_pending_migrations(crate::db::MIGRATIONS).unwrap();
        let tables = TableFlags::detect(&mut conn).unwrap();
        (conn, tables)
    }

    fn seed_job(conn: &mut SqliteConnection, id: &str, status: &str) {
        use crate::schema::jobs::dsl;
        let mut job = NewJob::pending(format!("prompt {id}"), Some(6.0), None);
        job.id = id.to_string();
        job.status = status.to_string();
        diesel::insert_into(dsl::jobs)
            .values(&job)
            .execute(conn)
            .unwrap();
    }

    #[test]
    fn test_precision_and_discovery_rate() {
        let (mut conn, tables) = setup();

        for i in 0..20 {
            let id = format!("job-{i}");
            seed_job(&mut conn, &id, "completed");
            if i < 17 {
                use crate::schema::learning_runs::dsl;
                diesel::insert_into(dsl::learning_runs)
                    .values(NewLearningRun {
                        job_id: Some(id.clone()),
                        prompt: format!("prompt {id}"),
                        spec_json: "{}".to_string(),
                        analysis_json: "{}".to_string(),
                    })
                    .execute(&mut conn)
                    .unwrap();
            }
            if i < 13 {
                use crate::schema::discovery_runs::dsl;
                diesel::insert_into(dsl::discovery_runs)
                    .values(NewDiscoveryRun {
                        job_id: Some(id.clone()),
                        results_json: "{}".to_string(),
                        total: 1,
                    })
                    .execute(&mut conn)
                    .unwrap();
            }
        }

        let report = compute_progress(&mut conn, &tables, 20).unwrap();
        assert_eq!(report.total_runs, 20);
        assert_eq!(report.precision_pct, 85.0);
        assert_eq!(report.discovery_rate_pct, 65.0);
        assert_eq!(report.target_pct, 95.0);
    }

    #[test]
    fn test_empty_store_is_all_zero() {
        let (mut conn, tables) = setup();
        let report = compute_progress(&mut conn, &tables, 20).unwrap();
        assert_eq!(report.total_runs, 0);
        assert_eq!(report.precision_pct, 0.0);
        assert_eq!(report.repetition_score, 0.0);
        assert_eq!(report.coverage.static_color_count, 0);
    }

    #[test]
    fn test_repetition_score_concentration() {
        let (mut conn, tables) = setup();
        use crate::schema::learned_motion::dsl;
        for i in 0..25 {
            diesel::insert_into(dsl::learned_motion)
                .values(crate::models::NewLearnedMotion {
                    profile_key: format!("key-{i}"),
                    motion_level: 0.5,
                    motion_std: 0.1,
                    motion_trend: "steady".to_string(),
                    direction: None,
                    rhythm: None,
                    count: if i < 20 { 9 } else { 4 },
                    name: format!("motion{i}"),
                    sources_json: "[]".to_string(),
                    depth_breakdown_json: None,
                })
                .execute(&mut conn)
                .unwrap();
        }
        // top 20 hold 180 of 200.
        let score = repetition_score(&mut conn, &tables).unwrap();
        assert_eq!(score, 0.9);
    }

    #[test]
    fn test_diagnostics_flags() {
        let (mut conn, tables) = setup();
        seed_job(&mut conn, "a", "completed");
        seed_job(&mut conn, "b", "completed");
        {
            use crate::schema::learning_runs::dsl;
            diesel::insert_into(dsl::learning_runs)
                .values(NewLearningRun {
                    job_id: Some("a".to_string()),
                    prompt: "prompt a".to_string(),
                    spec_json: "{}".to_string(),
                    analysis_json: "{}".to_string(),
                })
                .execute(&mut conn)
                .unwrap();
        }

        let diags = compute_diagnostics(&mut conn, &tables, 10).unwrap();
        assert_eq!(diags.len(), 2);
        let a = diags.iter().find(|d| d.job_id == "a").unwrap();
        assert!(a.has_learning);
        assert!(!a.has_discovery);
        let b = diags.iter().find(|d| d.job_id == "b").unwrap();
        assert!(!b.has_learning);
    }
}
