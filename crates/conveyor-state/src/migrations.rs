//! SurrealDB schema initialization
//!
//! Safe to call on every connection (idempotent `DEFINE ... IF NOT EXISTS`).

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Conveyor tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Conveyor SurrealDB schema");

    init_tags_table(db).await?;
    init_runs_table(db).await?;
    init_run_events_table(db).await?;

    info!("Conveyor schema initialization complete");
    Ok(())
}

/// Initialize `tags` table
///
/// Schema:
/// ```text
/// TABLE tags {
///   id:         tags:⟨key⟩ (record id is the registry key)
///   key:        STRING
///   value:      STRING (raw tag, not JSON)
///   updated_at: DATETIME
/// }
/// ```
///
/// One row per key; writes overwrite in place (last-writer-wins).
async fn init_tags_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing tags table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tags SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS key ON tags TYPE string;
        DEFINE FIELD IF NOT EXISTS value ON tags TYPE string;
        DEFINE FIELD IF NOT EXISTS updated_at ON tags TYPE datetime;
        DEFINE INDEX IF NOT EXISTS idx_tag_key ON TABLE tags COLUMNS key UNIQUE;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Initialize `runs` table
///
/// Constraints:
/// - `run_id` is unique
/// - `status` transitions running → completed | failed (enforced via app logic)
async fn init_runs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_spec_digest ON TABLE runs COLUMNS spec_digest;
        DEFINE INDEX IF NOT EXISTS idx_repository ON TABLE runs COLUMNS repository;
        DEFINE INDEX IF NOT EXISTS idx_created_at ON TABLE runs COLUMNS created_at;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Initialize `run_events` table
///
/// `(run_id, seq)` is unique so a sequence number can't be recorded twice.
async fn init_run_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing run_events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS run_events SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_run_id_seq ON TABLE run_events COLUMNS run_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_event_run_id ON TABLE run_events COLUMNS run_id;
        DEFINE INDEX IF NOT EXISTS idx_kind ON TABLE run_events COLUMNS kind;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}
