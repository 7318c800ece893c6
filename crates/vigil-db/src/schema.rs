//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity. Entity
//! documents are stored as JSON in a `data` field; the columns that
//! queries filter or sort on (key, status, issuer, expiry, revision) are
//! extracted alongside it.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1 — initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Certificate authorities (keyed by CA id)
-- =======================================================================
DEFINE TABLE ca SCHEMAFULL;
DEFINE FIELD key ON TABLE ca TYPE string;
DEFINE FIELD data ON TABLE ca TYPE string;
DEFINE FIELD status ON TABLE ca TYPE string;
DEFINE FIELD revision ON TABLE ca TYPE int DEFAULT 0;
DEFINE INDEX idx_ca_key ON TABLE ca COLUMNS key UNIQUE;

-- =======================================================================
-- Certificates (keyed by colon-grouped hex serial)
-- =======================================================================
DEFINE TABLE certificate SCHEMAFULL;
DEFINE FIELD key ON TABLE certificate TYPE string;
DEFINE FIELD data ON TABLE certificate TYPE string;
DEFINE FIELD issuing_ca_id ON TABLE certificate TYPE string;
DEFINE FIELD status ON TABLE certificate TYPE string;
DEFINE FIELD not_after ON TABLE certificate TYPE datetime;
DEFINE FIELD revision ON TABLE certificate TYPE int DEFAULT 0;
DEFINE INDEX idx_certificate_key ON TABLE certificate COLUMNS key UNIQUE;
DEFINE INDEX idx_certificate_ca ON TABLE certificate COLUMNS issuing_ca_id;
DEFINE INDEX idx_certificate_expiry ON TABLE certificate COLUMNS not_after;

-- =======================================================================
-- DMS instances (keyed by name)
-- =======================================================================
DEFINE TABLE dms SCHEMAFULL;
DEFINE FIELD key ON TABLE dms TYPE string;
DEFINE FIELD data ON TABLE dms TYPE string;
DEFINE FIELD status ON TABLE dms TYPE string;
DEFINE FIELD revision ON TABLE dms TYPE int DEFAULT 0;
DEFINE INDEX idx_dms_key ON TABLE dms COLUMNS key UNIQUE;

-- =======================================================================
-- Devices (keyed by device id)
-- =======================================================================
DEFINE TABLE device SCHEMAFULL;
DEFINE FIELD key ON TABLE device TYPE string;
DEFINE FIELD data ON TABLE device TYPE string;
DEFINE FIELD dms_owner_id ON TABLE device TYPE string;
DEFINE FIELD status ON TABLE device TYPE string;
DEFINE FIELD revision ON TABLE device TYPE int DEFAULT 0;
DEFINE INDEX idx_device_key ON TABLE device COLUMNS key UNIQUE;
DEFINE INDEX idx_device_dms ON TABLE device COLUMNS dms_owner_id;
";

/// Apply all pending migrations.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await
        .map_err(DbError::from)?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut applied = db
        .query("SELECT version, name FROM _migration ORDER BY version")
        .await
        .map_err(DbError::from)?;
    let applied: Vec<MigrationRecord> = applied.take(0).map_err(DbError::from)?;
    let latest = applied.iter().map(|m| m.version).max().unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > latest) {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql)
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(format!("{} failed: {e}", migration.name)))?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
    }

    Ok(())
}

/// The v1 DDL, exposed for tooling and tests.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
