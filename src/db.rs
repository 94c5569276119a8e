use anyhow::Result;
use diesel::r2d2::{self, ConnectionManager};
use diesel::sqlite::SqliteConnection;
use diesel::RunQueryDsl;
use std::collections::HashSet;

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = r2d2::PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: diesel_migrations::EmbeddedMigrations =
    diesel_migrations::embed_migrations!("migrations");

pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder().build(manager)?;
    Ok(pool)
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    use diesel_migrations::MigrationHarness;

    conn.run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))
}

/// Tables required for the service to start at all.
const REQUIRED_TABLES: &[&str] = &["jobs", "learning_runs", "events"];

/// Registry tables that older deployments may lack. Reads against an absent
/// table return empty; writes log and skip.
pub const AUXILIARY_TABLES: &[&str] = &[
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
    "name_reserve",
    "linguistic_variants",
    "discovery_runs",
];

#[derive(diesel::QueryableByName)]
struct TableNameRow {
    #[diesel(sql_type = diesel::sql_types::Text)]
    name: String,
}

/// Snapshot of which tables exist, taken once at startup so handlers never
/// probe per request.
#[derive(Debug, Clone)]
pub struct TableFlags {
    present: HashSet<String>,
}

impl TableFlags {
    pub fn detect(conn: &mut SqliteConnection) -> Result<Self> {
        let rows: Vec<TableNameRow> =
            diesel::sql_query("SELECT name FROM sqlite_master WHERE type = 'table'").load(conn)?;
        let present: HashSet<String> = rows.into_iter().map(|r| r.name).collect();

        for required in REQUIRED_TABLES {
            if !present.contains(*required) {
                anyhow::bail!("required table '{}' is missing", required);
            }
        }
        for auxiliary in AUXILIARY_TABLES {
            if !present.contains(*auxiliary) {
                tracing::warn!(
                    "auxiliary table '{}' is missing; related features degrade",
                    auxiliary
                );
            }
        }

        Ok(TableFlags { present })
    }

    pub fn has(&self, table: &str) -> bool {
        self.present.contains(table)
    }
}
