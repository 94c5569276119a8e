//! Administrative backfill: replace gibberish display names and recompute
//! stored depth breakdowns. Renames cascade through every column that may
//! embed the old name before the call returns.

use anyhow::Result;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Nullable, Text};
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::TableFlags;
use crate::services::{depth, gibberish};
use crate::services::naming::NamePool;

/// Tables with a display-name column eligible for renaming.
pub const NAMEABLE_TABLES: [&str; 17] = [
    "static_colors",
    "static_sounds",
    "learned_colors",
    "learned_motion",
    "learned_lighting",
    "learned_composition",
    "learned_graphics",
    "learned_temporal",
    "learned_technical",
    "learned_time",
    "learned_gradient",
    "learned_camera",
    "learned_transition",
    "learned_depth",
    "learned_audio_semantic",
    "learned_blends",
    "narrative_entries",
];

/// Columns that may contain a renamed name as free text.
const CASCADE_COLUMNS: [(&str, &str); 20] = [
    ("jobs", "prompt"),
    ("learning_runs", "prompt"),
    ("interpretations", "prompt"),
    ("interpretations", "instruction_json"),
    ("learned_colors", "sources_json"),
    ("learned_motion", "sources_json"),
    ("learned_lighting", "sources_json"),
    ("learned_composition", "sources_json"),
    ("learned_graphics", "sources_json"),
    ("learned_temporal", "sources_json"),
    ("learned_technical", "sources_json"),
    ("learned_time", "sources_json"),
    ("learned_gradient", "sources_json"),
    ("learned_camera", "sources_json"),
    ("learned_transition", "sources_json"),
    ("learned_depth", "sources_json"),
    ("learned_audio_semantic", "sources_json"),
    ("learned_blends", "inputs_json"),
    ("learned_blends", "output_json"),
    ("learned_blends", "primitive_depths_json"),
];

#[derive(Debug)]
pub struct BackfillOptions {
    pub dry_run: bool,
    pub limit: usize,
    pub table: Option<String>,
    /// When set, only whole-word occurrences cascade. The default mirrors the
    /// greedy substring REPLACE of the original deployment.
    pub word_boundary: bool,
}

#[derive(Debug, Serialize)]
pub struct RenameEntry {
    pub table: String,
    pub id: i32,
    pub old_name: String,
    pub new_name: String,
    pub cascaded: usize,
}

#[derive(Debug, Serialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub renamed: Vec<RenameEntry>,
    pub dry_run: bool,
}

#[derive(QueryableByName)]
struct IdNameRow {
    #[diesel(sql_type = Integer)]
    id: i32,
    #[diesel(sql_type = Text)]
    name: String,
}

#[derive(QueryableByName)]
struct RowidValueRow {
    #[diesel(sql_type = Integer)]
    rid: i32,
    #[diesel(sql_type = Nullable<Text>)]
    val: Option<String>,
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub fn backfill_names(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    opts: &BackfillOptions,
) -> Result<BackfillReport> {
    let selected: Vec<&str> = match &opts.table {
        Some(t) => {
            let t = t.as_str();
            if !NAMEABLE_TABLES.contains(&t) {
                anyhow::bail!("unknown table '{}'", t);
            }
            vec![NAMEABLE_TABLES
                .iter()
                .find(|n| **n == t)
                .copied()
                .expect("checked above")]
        }
        None => NAMEABLE_TABLES.to_vec(),
    };

    let mut names = NamePool::load(conn, tables)?;
    let mut report = BackfillReport {
        scanned: 0,
        renamed: Vec::new(),
        dry_run: opts.dry_run,
    };

    'tables: for table in selected {
        if !tables.has(table) {
            continue;
        }
        let rows: Vec<IdNameRow> =
            diesel::sql_query(format!("SELECT id, name FROM {table} ORDER BY id")).load(conn)?;

        for row in rows {
            report.scanned += 1;
            if !gibberish::is_gibberish_name(&row.name) {
                continue;
            }
            if report.renamed.len() >= opts.limit {
                break 'tables;
            }

            let new_name = if opts.dry_run {
                names.propose()
            } else {
                names.draw_unique(conn, tables)?
            };
            let mut cascaded = 0;
            if !opts.dry_run {
                diesel::sql_query(format!("UPDATE {table} SET name = ? WHERE id = ?"))
                    .bind::<Text, _>(&new_name)
                    .bind::<Integer, _>(row.id)
                    .execute(conn)?;
                cascaded = cascade_rename(conn, tables, &row.name, &new_name, opts.word_boundary)?;
            }
            report.renamed.push(RenameEntry {
                table: table.to_string(),
                id: row.id,
                old_name: row.name,
                new_name,
                cascaded,
            });
        }
    }

    Ok(report)
}

/// Rewrites every occurrence of `old` in the cascade columns. Returns the
/// number of updated rows. Absent tables are skipped silently.
pub fn cascade_rename(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    old: &str,
    new: &str,
    word_boundary: bool,
) -> Result<usize> {
    let mut updated = 0;
    for (table, column) in CASCADE_COLUMNS {
        if !tables.has(table) {
            continue;
        }
        let result = if word_boundary {
            cascade_word_boundary(conn, table, column, old, new)
        } else {
            cascade_greedy(conn, table, column, old, new)
        };
        match result {
            Ok(n) => updated += n,
            // Older schemas may lack the column; skip it.
            Err(e) => tracing::warn!("cascade skipped {}.{}: {:#}", table, column, e),
        }
    }
    Ok(updated)
}

fn cascade_greedy(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    old: &str,
    new: &str,
) -> Result<usize> {
    let like = format!("%{}%", escape_like(old));
    let sql = format!(
        "UPDATE {table} SET {column} = REPLACE({column}, ?, ?) \
         WHERE {column} LIKE ? ESCAPE '\\'"
    );
    let n = diesel::sql_query(sql)
        .bind::<Text, _>(old)
        .bind::<Text, _>(new)
        .bind::<Text, _>(&like)
        .execute(conn)?;
    Ok(n)
}

fn cascade_word_boundary(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    old: &str,
    new: &str,
) -> Result<usize> {
    let like = format!("%{}%", escape_like(old));
    let rows: Vec<RowidValueRow> = diesel::sql_query(format!(
        "SELECT rowid AS rid, {column} AS val FROM {table} \
         WHERE {column} LIKE ? ESCAPE '\\'"
    ))
    .bind::<Text, _>(&like)
    .load(conn)?;

    let mut updated = 0;
    for row in rows {
        let Some(text) = row.val else { continue };
        let (replaced, changed) = replace_word_boundary(&text, old, new);
        if changed {
            diesel::sql_query(format!("UPDATE {table} SET {column} = ? WHERE rowid = ?"))
                .bind::<Text, _>(&replaced)
                .bind::<Integer, _>(row.rid)
                .execute(conn)?;
            updated += 1;
        }
    }
    Ok(updated)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn replace_word_boundary(text: &str, old: &str, new: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut changed = false;
    while let Some(pos) = rest.find(old) {
        let before_ok = out
            .chars()
            .chain(rest[..pos].chars())
            .last()
            .map(|c| !is_word_char(c))
            .unwrap_or(true);
        let after_ok = rest[pos + old.len()..]
            .chars()
            .next()
            .map(|c| !is_word_char(c))
            .unwrap_or(true);
        out.push_str(&rest[..pos]);
        if before_ok && after_ok {
            out.push_str(new);
            changed = true;
        } else {
            out.push_str(old);
        }
        rest = &rest[pos + old.len()..];
    }
    out.push_str(rest);
    (out, changed)
}

#[derive(Debug, Serialize, QueryableByName)]
pub struct RawRegistryRow {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub key: String,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub depth_breakdown_json: Option<String>,
}

fn key_column(table: &str) -> Option<&'static str> {
    match table {
        "static_colors" => Some("color_key"),
        "static_sounds" => Some("sound_key"),
        "learned_blends" => Some("name"),
        "narrative_entries" => Some("entry_key"),
        t if t.starts_with("learned_") => Some("profile_key"),
        _ => None,
    }
}

fn depth_column(table: &str) -> &'static str {
    match table {
        "learned_blends" => "primitive_depths_json",
        "narrative_entries" => "NULL",
        _ => "depth_breakdown_json",
    }
}

/// Raw rows for external depth recomputation.
pub fn raw_rows(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    table: &str,
    limit: i64,
) -> Result<Vec<RawRegistryRow>> {
    if !NAMEABLE_TABLES.contains(&table) {
        anyhow::bail!("unknown table '{}'", table);
    }
    if !tables.has(table) {
        return Ok(Vec::new());
    }
    let key_col = key_column(table).expect("nameable tables have a key column");
    let depth_col = depth_column(table);
    let rows = diesel::sql_query(format!(
        "SELECT id, {key_col} AS key, name, {depth_col} AS depth_breakdown_json \
         FROM {table} ORDER BY id LIMIT {limit}"
    ))
    .load(conn)?;
    Ok(rows)
}

#[derive(Debug, Deserialize)]
pub struct DepthUpdate {
    pub table: String,
    pub id: i32,
    pub depth_breakdown: Value,
}

/// Writes externally recomputed breakdowns back, normalizing through the same
/// split/flatten rules as ingestion.
pub fn apply_depth_updates(
    conn: &mut SqliteConnection,
    tables: &TableFlags,
    updates: &[DepthUpdate],
) -> Result<usize> {
    let mut applied = 0;
    for update in updates {
        let table = update.table.as_str();
        if !NAMEABLE_TABLES.contains(&table) {
            anyhow::bail!("unknown table '{}'", table);
        }
        if !tables.has(table) || table == "narrative_entries" {
            continue;
        }

        match table {
            "static_colors" => {
                let split = depth::split_color_breakdown(&update.depth_breakdown);
                diesel::sql_query(
                    "UPDATE static_colors SET depth_breakdown_json = ?, \
                     theme_breakdown_json = ?, opacity_pct = COALESCE(?, opacity_pct) \
                     WHERE id = ?",
                )
                .bind::<Nullable<Text>, _>(json_or_none(&split.depth))
                .bind::<Nullable<Text>, _>(json_or_none(&split.theme))
                .bind::<Nullable<Integer>, _>(split.opacity_pct)
                .bind::<Integer, _>(update.id)
                .execute(conn)?;
            }
            "learned_colors" => {
                let split = depth::split_color_breakdown(&update.depth_breakdown);
                diesel::sql_query("UPDATE learned_colors SET depth_breakdown_json = ? WHERE id = ?")
                    .bind::<Nullable<Text>, _>(json_or_none(&split.depth))
                    .bind::<Integer, _>(update.id)
                    .execute(conn)?;
            }
            _ => {
                let (flat, _) = depth::flatten_blend_depths(&update.depth_breakdown);
                let column = depth_column(table);
                diesel::sql_query(format!("UPDATE {table} SET {column} = ? WHERE id = ?"))
                    .bind::<Nullable<Text>, _>(json_or_none(&flat))
                    .bind::<Integer, _>(update.id)
                    .execute(conn)?;
            }
        }
        applied += 1;
    }
    Ok(applied)
}

fn json_or_none(map: &serde_json::Map<String, Value>) -> Option<String> {
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map.clone()).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::prelude::*;
    use diesel::Connection;
    use diesel_migrations::MigrationHarness;

    fn setup() -> (SqliteConnection, TableFlags) {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.run_pending_migrations(crate::db::MIGRATIONS).unwrap();
        let tables = TableFlags::detect(&mut conn).unwrap();
        (conn, tables)
    }

    fn seed_motion(conn: &mut SqliteConnection, key: &str, name: &str) {
        use crate::schema::learned_motion::dsl;
        diesel::insert_into(dsl::learned_motion)
            .values(crate::models::NewLearnedMotion {
                profile_key: key.to_string(),
                motion_level: 0.4,
                motion_std: 0.1,
                motion_trend: "steady".to_string(),
                direction: None,
                rhythm: None,
                count: 1,
                name: name.to_string(),
                sources_json: "[]".to_string(),
                depth_breakdown_json: None,
            })
            .execute(conn)
            .unwrap();
    }

    fn seed_gradient_with_source(conn: &mut SqliteConnection, key: &str, source: &str) {
        use crate::schema::learned_gradient::dsl;
        diesel::insert_into(dsl::learned_gradient)
            .values(crate::models::NewLearnedGradient {
                profile_key: key.to_string(),
                count: 1,
                name: format!("grad-{key}"),
                sources_json: serde_json::to_string(&vec![source]).unwrap(),
                depth_breakdown_json: None,
            })
            .execute(conn)
            .unwrap();
    }

    #[test]
    fn test_rename_cascades_to_sources() {
        let (mut conn, tables) = setup();
        seed_motion(&mut conn, "slow_steady", "dsc_ab12cd");
        for i in 0..3 {
            seed_gradient_with_source(&mut conn, &format!("g{i}"), "swirl like dsc_ab12cd");
        }

        let report = backfill_names(
            &mut conn,
            &tables,
            &BackfillOptions {
                dry_run: false,
                limit: 1,
                table: None,
                word_boundary: false,
            },
        )
        .unwrap();

        assert_eq!(report.renamed.len(), 1);
        let entry = &report.renamed[0];
        assert_eq!(entry.old_name, "dsc_ab12cd");
        assert!(!gibberish::is_gibberish_name(&entry.new_name));
        assert_eq!(entry.cascaded, 3);

        use crate::schema::learned_gradient::dsl;
        let sources: Vec<String> = dsl::learned_gradient
            .select(dsl::sources_json)
            .load(&mut conn)
            .unwrap();
        for s in sources {
            assert!(!s.contains("dsc_ab12cd"));
            assert!(s.contains(&entry.new_name));
        }
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (mut conn, tables) = setup();
        seed_motion(&mut conn, "slow_steady", "Novel00042");

        let report = backfill_names(
            &mut conn,
            &tables,
            &BackfillOptions {
                dry_run: true,
                limit: 10,
                table: Some("learned_motion".to_string()),
                word_boundary: false,
            },
        )
        .unwrap();
        assert_eq!(report.renamed.len(), 1);

        use crate::schema::learned_motion::dsl;
        let name: String = dsl::learned_motion
            .select(dsl::name)
            .first(&mut conn)
            .unwrap();
        assert_eq!(name, "Novel00042");
    }

    #[test]
    fn test_word_boundary_replace() {
        let (replaced, changed) =
            replace_word_boundary("a dsc_ab12 b xdsc_ab12 dsc_ab12x", "dsc_ab12", "ember");
        assert!(changed);
        assert_eq!(replaced, "a ember b xdsc_ab12 dsc_ab12x");

        let (unchanged, changed) = replace_word_boundary("nothing here", "dsc_ab12", "ember");
        assert!(!changed);
        assert_eq!(unchanged, "nothing here");
    }

    #[test]
    fn test_depth_updates_normalize() {
        let (mut conn, tables) = setup();
        use crate::schema::static_colors::dsl;
        diesel::insert_into(dsl::static_colors)
            .values(crate::models::NewStaticColor {
                color_key: "1,2,3".to_string(),
                r: 1,
                g: 2,
                b: 3,
                count: 1,
                name: "shadow".to_string(),
                depth_breakdown_json: None,
                opacity_pct: None,
                theme_breakdown_json: None,
            })
            .execute(&mut conn)
            .unwrap();

        let applied = apply_depth_updates(
            &mut conn,
            &tables,
            &[DepthUpdate {
                table: "static_colors".to_string(),
                id: 1,
                depth_breakdown: serde_json::json!({"black": 0.97, "haze_preset": 10}),
            }],
        )
        .unwrap();
        assert_eq!(applied, 1);

        let row: crate::models::StaticColor = dsl::static_colors
            .select(crate::models::StaticColor::as_select())
            .first(&mut conn)
            .unwrap();
        let depth: Value =
            serde_json::from_str(row.depth_breakdown_json.as_deref().unwrap()).unwrap();
        assert_eq!(depth["black"], 97.0);
        assert!(depth.get("haze_preset").is_none());
        assert!(row.theme_breakdown_json.is_some());
    }
}
