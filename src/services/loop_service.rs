//! The learning-loop controller: a single long-lived task that picks prompts,
//! enqueues render jobs, waits for the external renderer, and promotes
//! prompts that produced new registry rows. One replica only; the state blob
//! has exactly this writer.

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

use crate::models::{LoopConfig, LoopState, NewEvent, NewJob};
use crate::services::gibberish;
use crate::services::kv::{self, LOOP_CONFIG_KEY, LOOP_STATE_KEY};
use crate::AppState;

const POLL_ATTEMPTS: u32 = 300;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const PROMPT_CAP: usize = 200;
const PROMPT_MAX_LEN: usize = 500;
/// Exploit picks avoid this many most-recent prompts.
const RECENT_EXCLUSION: usize = 20;

const EXPLORE_SUBJECTS: [&str; 12] = [
    "sunset",
    "aurora",
    "rainfall",
    "city lights",
    "ocean waves",
    "forest canopy",
    "desert dunes",
    "night sky",
    "river delta",
    "mountain ridge",
    "lantern festival",
    "tide pools",
];

const EXPLORE_TREATMENTS: [&str; 6] = [
    "slow drift over",
    "timelapse of",
    "close study of",
    "gentle pan across",
    "spiraling above",
    "fading into",
];

pub async fn run(state: AppState) {
    tracing::info!("learning loop controller started");
    loop {
        let delay = match tick(&state).await {
            Ok(delay) => delay,
            Err(e) => {
                tracing::error!("loop tick failed: {:#}", e);
                record_error_event(&state, None, &format!("loop tick failed: {e:#}"));
                Duration::from_secs(5)
            }
        };
        tokio::time::sleep(delay).await;
    }
}

async fn tick(state: &AppState) -> Result<Duration> {
    let config: LoopConfig = {
        let mut conn = state.db.get()?;
        kv::get_json(&mut conn, LOOP_CONFIG_KEY)?.unwrap_or_default()
    };

    if !config.enabled {
        return Ok(Duration::from_secs(config.delay_seconds.max(5) as u64));
    }

    let mut loop_state: LoopState = {
        let mut conn = state.db.get()?;
        kv::get_json(&mut conn, LOOP_STATE_KEY)?.unwrap_or_default()
    };

    let (exploit, prompt) = {
        let mut rng = rand::thread_rng();
        let wants_exploit = rng.gen::<f64>() < config.exploit_ratio;
        // Empty good-prompt history forces exploration.
        let exploit = wants_exploit && !loop_state.good_prompts.is_empty();

        let prompt = if exploit {
            loop_state.exploit_count += 1;
            pick_exploit_prompt(&loop_state, &mut rng)
        } else {
            loop_state.explore_count += 1;
            let mut conn = state.db.get()?;
            pick_explore_prompt(&mut conn, &mut rng)?
        };
        (exploit, prompt)
    };

    let workflow_type = if exploit { "exploiter" } else { "explorer" };
    let new_job = NewJob::pending(
        prompt.clone(),
        Some(config.duration_seconds as f32),
        Some(workflow_type.to_string()),
    );
    let job_id = new_job.id.clone();
    {
        let mut conn = state.db.get()?;
        use crate::schema::jobs::dsl;
        diesel::insert_into(dsl::jobs)
            .values(&new_job)
            .execute(&mut conn)?;
    }
    tracing::info!("loop queued {} job {}: {}", workflow_type, job_id, prompt);

    push_capped(&mut loop_state.recent_prompts, &prompt);

    match poll_job(state, &job_id).await? {
        JobOutcome::Completed => {
            let mut conn = state.db.get()?;
            let produced = state.tables.has("discovery_runs")
                && latest_discovery_total(&mut conn, &job_id)? > 0;
            if produced {
                promote(&mut loop_state.good_prompts, &prompt);
                tracing::info!("prompt promoted to good list: {}", prompt);
            }
            if !has_learning_run(&mut conn, &job_id)? {
                tracing::warn!("job {} completed without a learning run", job_id);
            }
        }
        JobOutcome::Failed => {
            record_error_event(state, Some(&job_id), "job failed");
        }
        JobOutcome::TimedOut => {
            record_error_event(state, Some(&job_id), "job poll timed out");
        }
    }

    loop_state.run_count += 1;
    loop_state.version += 1;
    loop_state.duration_base = config.duration_seconds;
    loop_state.last_run_at = Some(Utc::now().to_rfc3339());
    loop_state.last_prompt = Some(prompt);
    loop_state.last_job_id = Some(job_id);
    save_state(state, &loop_state).await?;

    Ok(Duration::from_secs(config.delay_seconds.max(1) as u64))
}

enum JobOutcome {
    Completed,
    Failed,
    TimedOut,
}

async fn poll_job(state: &AppState, job_id: &str) -> Result<JobOutcome> {
    use crate::schema::jobs::dsl;
    for _ in 0..POLL_ATTEMPTS {
        let status: Option<String> = {
            let mut conn = state.db.get()?;
            dsl::jobs
                .filter(dsl::id.eq(job_id))
                .select(dsl::status)
                .first(&mut conn)
                .optional()?
        };
        match status.as_deref() {
            Some("completed") => return Ok(JobOutcome::Completed),
            Some("failed") => return Ok(JobOutcome::Failed),
            _ => {}
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(JobOutcome::TimedOut)
}

fn pick_exploit_prompt(loop_state: &LoopState, rng: &mut impl Rng) -> String {
    let recent_tail: Vec<&String> = loop_state
        .recent_prompts
        .iter()
        .rev()
        .take(RECENT_EXCLUSION)
        .collect();
    let fresh: Vec<&String> = loop_state
        .good_prompts
        .iter()
        .filter(|p| !recent_tail.contains(p))
        .collect();
    let all: Vec<&String> = loop_state.good_prompts.iter().collect();
    // Everything recently used: drop the exclusion rather than stall.
    let pool: &[&String] = if fresh.is_empty() { &all } else { &fresh };
    pool.choose(rng)
        .map(|p| (**p).clone())
        .unwrap_or_else(|| EXPLORE_SUBJECTS[0].to_string())
}

fn pick_explore_prompt(
    conn: &mut diesel::sqlite::SqliteConnection,
    rng: &mut impl Rng,
) -> Result<String> {
    use crate::schema::interpretations::dsl;
    let known_prompts: Vec<String> = dsl::interpretations
        .order(dsl::created_at.desc())
        .limit(500)
        .select(dsl::prompt)
        .load(conn)?;

    for _ in 0..25 {
        let candidate = if !known_prompts.is_empty() && rng.gen_bool(0.4) {
            known_prompts
                .choose(rng)
                .cloned()
                .unwrap_or_else(|| EXPLORE_SUBJECTS[0].to_string())
        } else {
            let treatment = EXPLORE_TREATMENTS.choose(rng).expect("non-empty");
            let subject = EXPLORE_SUBJECTS.choose(rng).expect("non-empty");
            format!("{treatment} {subject}")
        };
        let candidate: String = candidate.chars().take(PROMPT_MAX_LEN).collect();
        if !gibberish::is_gibberish_prompt(&candidate, true) {
            return Ok(candidate);
        }
    }
    Ok(format!(
        "{} {}",
        EXPLORE_TREATMENTS[0], EXPLORE_SUBJECTS[0]
    ))
}

fn push_capped(list: &mut Vec<String>, prompt: &str) {
    let prompt: String = prompt.chars().take(PROMPT_MAX_LEN).collect();
    list.push(prompt);
    if list.len() > PROMPT_CAP {
        let overflow = list.len() - PROMPT_CAP;
        list.drain(0..overflow);
    }
}

/// LRU promotion: re-promoting moves the prompt to the back.
fn promote(good: &mut Vec<String>, prompt: &str) {
    good.retain(|p| p != prompt);
    push_capped(good, prompt);
}

fn latest_discovery_total(
    conn: &mut diesel::sqlite::SqliteConnection,
    job_id: &str,
) -> Result<i32> {
    use crate::schema::discovery_runs::dsl;
    let total = dsl::discovery_runs
        .filter(dsl::job_id.eq(job_id))
        .order(dsl::created_at.desc())
        .select(dsl::total)
        .first::<i32>(conn)
        .optional()?;
    Ok(total.unwrap_or(0))
}

fn has_learning_run(conn: &mut diesel::sqlite::SqliteConnection, job_id: &str) -> Result<bool> {
    use crate::schema::learning_runs::dsl;
    let n: i64 = dsl::learning_runs
        .filter(dsl::job_id.eq(job_id))
        .count()
        .get_result(conn)?;
    Ok(n > 0)
}

/// Saves the state blob, spacing writes per the KV rate limit and retrying
/// transient store failures with exponential backoff.
async fn save_state(state: &AppState, loop_state: &LoopState) -> Result<()> {
    if !state.kv_limiter.check(LOOP_STATE_KEY) {
        // Retry-After: 2 equivalent for the in-process writer.
        tokio::time::sleep(Duration::from_secs(2)).await;
        state.kv_limiter.check(LOOP_STATE_KEY);
    }

    let mut delay = Duration::from_secs(1);
    let mut last_err = None;
    for attempt in 0..5 {
        let result = state.db.get().map_err(anyhow::Error::from).and_then(|mut conn| {
            kv::put_json(&mut conn, LOOP_STATE_KEY, loop_state)
        });
        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!("state save attempt {} failed: {:#}", attempt + 1, e);
                last_err = Some(e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

fn record_error_event(state: &AppState, job_id: Option<&str>, message: &str) {
    let result = state.db.get().map_err(anyhow::Error::from).and_then(|mut conn| {
        use crate::schema::events::dsl;
        diesel::insert_into(dsl::events)
            .values(NewEvent {
                event_type: "error".to_string(),
                job_id: job_id.map(str::to_string),
                payload_json: Some(
                    serde_json::json!({ "message": message }).to_string(),
                ),
            })
            .execute(&mut conn)?;
        Ok(())
    });
    if let Err(e) = result {
        tracing::error!("failed to record error event: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn test_push_capped_trims_front() {
        let mut list: Vec<String> = (0..PROMPT_CAP).map(|i| format!("p{i}")).collect();
        push_capped(&mut list, "newest");
        assert_eq!(list.len(), PROMPT_CAP);
        assert_eq!(list.last().unwrap(), "newest");
        assert_eq!(list.first().unwrap(), "p1");
    }

    #[test]
    fn test_promote_is_lru() {
        let mut good = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        promote(&mut good, "a");
        assert_eq!(good, vec!["b", "c", "a"]);
        promote(&mut good, "d");
        assert_eq!(good, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_exploit_avoids_recent_tail() {
        let state = LoopState {
            good_prompts: vec!["a".to_string(), "b".to_string()],
            recent_prompts: vec!["b".to_string()],
            ..Default::default()
        };
        let mut rng = thread_rng();
        for _ in 0..20 {
            assert_eq!(pick_exploit_prompt(&state, &mut rng), "a");
        }
    }

    #[test]
    fn test_exploit_drops_exclusion_when_everything_recent() {
        let state = LoopState {
            good_prompts: vec!["a".to_string()],
            recent_prompts: vec!["a".to_string()],
            ..Default::default()
        };
        let mut rng = thread_rng();
        assert_eq!(pick_exploit_prompt(&state, &mut rng), "a");
    }
}
