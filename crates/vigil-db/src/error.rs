//! Database-specific error types and conversions.

use vigil_core::VigilError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Record already exists: {entity} with id {id}")]
    AlreadyExists { entity: String, id: String },

    #[error("Stale revision for {entity} with id {id}")]
    RevisionConflict { entity: String, id: String },

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<DbError> for VigilError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => VigilError::NotFound { entity, id },
            DbError::AlreadyExists { entity, id } => VigilError::AlreadyExists { entity, id },
            other => VigilError::Storage(other.to_string()),
        }
    }
}

/// Distinguish a duplicate-id failure on CREATE from other query errors.
pub(crate) fn map_create_error(entity: &str, id: &str, err: surrealdb::Error) -> DbError {
    if err.to_string().contains("already exists") {
        DbError::AlreadyExists {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    } else {
        DbError::Surreal(err)
    }
}
