//! SurrealDB schema migrations and initialization

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize all warehouse tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing flag warehouse schema");
    init_flags_table(db).await?;
    info!("Flag warehouse schema initialization complete");
    Ok(())
}

/// Initialize `flags` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE flags {
///   id:          RECORD (flags:⟨flag⟩)
///   flag:        STRING (unique)
///   exploit:     STRING
///   target:      STRING
///   reporter:    STRING
///   created_at:  DATETIME (indexed)
///   status:      STRING (enum: pending | submitted)
///   outcome:     STRING? (enum: success | rejected | expired)
/// }
/// ```
///
/// Constraints:
/// - `flag` is unique (insert-or-ignore relies on the record key)
/// - `outcome` is set only together with `status = submitted`, and only once
///   (enforced by the `outcome = NONE` guard in every update)
async fn init_flags_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing flags table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS flags SCHEMAFULL
            PERMISSIONS
                FOR select, create, update FULL,
                FOR delete NONE;

        DEFINE FIELD IF NOT EXISTS flag ON flags TYPE string;
        DEFINE FIELD IF NOT EXISTS exploit ON flags TYPE string;
        DEFINE FIELD IF NOT EXISTS target ON flags TYPE string;
        DEFINE FIELD IF NOT EXISTS reporter ON flags TYPE string;
        DEFINE FIELD IF NOT EXISTS created_at ON flags TYPE datetime;
        DEFINE FIELD IF NOT EXISTS status ON flags TYPE string
            ASSERT $value IN ["pending", "submitted"];
        DEFINE FIELD IF NOT EXISTS outcome ON flags TYPE option<string>
            ASSERT $value = NONE OR $value IN ["success", "rejected", "expired"];

        DEFINE INDEX IF NOT EXISTS idx_flag ON TABLE flags COLUMNS flag UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_status_created_at ON TABLE flags COLUMNS status, created_at;
    "#;

    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
    debug!("flags table initialized");
    Ok(())
}
