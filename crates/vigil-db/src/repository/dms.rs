//! SurrealDB implementation of [`DmsRepository`].

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

use vigil_core::error::VigilResult;
use vigil_core::models::dms::Dms;
use vigil_core::repository::{DmsRepository, Page, PageRequest};

use crate::error::{DbError, map_create_error};
use crate::repository::enum_str;

#[derive(Debug, SurrealValue)]
struct DmsRow {
    key: String,
    data: String,
    revision: i64,
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

#[derive(Debug, SurrealValue)]
struct KeyRow {
    #[allow(dead_code)]
    key: String,
}

fn row_to_dms(row: DmsRow) -> Result<Dms, DbError> {
    let mut dms: Dms = serde_json::from_str(&row.data)
        .map_err(|e| DbError::Corrupt(format!("dms {}: {e}", row.key)))?;
    dms.revision = row.revision;
    Ok(dms)
}

/// SurrealDB implementation of the DMS repository.
#[derive(Clone)]
pub struct SurrealDmsRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealDmsRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> DmsRepository for SurrealDmsRepository<C> {
    async fn insert(&self, dms: &Dms) -> VigilResult<Dms> {
        let mut stored = dms.clone();
        stored.revision = 0;
        let key = stored.name.clone();
        let data =
            serde_json::to_string(&stored).map_err(|e| DbError::Corrupt(e.to_string()))?;

        let result = self
            .db
            .query(
                "CREATE type::record('dms', $key) SET \
                 key = $key, \
                 data = $data, \
                 status = $status, \
                 revision = 0",
            )
            .bind(("key", key.clone()))
            .bind(("data", data))
            .bind(("status", enum_str(&stored.status)))
            .await
            .map_err(DbError::from)?;

        result
            .check()
            .map_err(|e| map_create_error("dms", &key, e))?;

        Ok(stored)
    }

    async fn get(&self, name: &str) -> VigilResult<Dms> {
        let key = name.to_string();

        let mut result = self
            .db
            .query("SELECT key, data, revision FROM type::record('dms', $key)")
            .bind(("key", key.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DmsRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "dms".into(),
            id: key,
        })?;

        row_to_dms(row).map_err(Into::into)
    }

    async fn update(&self, dms: &Dms) -> VigilResult<Dms> {
        let expected = dms.revision;
        let mut stored = dms.clone();
        stored.revision = expected + 1;
        let key = stored.name.clone();
        let data =
            serde_json::to_string(&stored).map_err(|e| DbError::Corrupt(e.to_string()))?;

        let mut result = self
            .db
            .query(
                "UPDATE type::record('dms', $key) SET \
                 data = $data, \
                 status = $status, \
                 revision = $next \
                 WHERE revision = $expected",
            )
            .bind(("key", key.clone()))
            .bind(("data", data))
            .bind(("status", enum_str(&stored.status)))
            .bind(("next", stored.revision))
            .bind(("expected", expected))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DmsRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            let mut probe = self
                .db
                .query("SELECT key FROM type::record('dms', $key)")
                .bind(("key", key.clone()))
                .await
                .map_err(DbError::from)?;
            let found: Vec<KeyRow> = probe.take(0).map_err(DbError::from)?;
            return if found.is_empty() {
                Err(DbError::NotFound {
                    entity: "dms".into(),
                    id: key,
                }
                .into())
            } else {
                Err(DbError::RevisionConflict {
                    entity: "dms".into(),
                    id: key,
                }
                .into())
            };
        }

        Ok(stored)
    }

    async fn list(&self, page: PageRequest) -> VigilResult<Page<Dms>> {
        let bookmark = page.bookmark.unwrap_or_default();

        let mut result = self
            .db
            .query(
                "SELECT key, data, revision FROM dms \
                 WHERE key > $bookmark ORDER BY key ASC LIMIT $limit",
            )
            .bind(("bookmark", bookmark))
            .bind(("limit", page.page_size))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DmsRow> = result.take(0).map_err(DbError::from)?;
        let next_bookmark = if rows.len() as u64 == page.page_size {
            rows.last().map(|row| row.key.clone())
        } else {
            None
        };
        let items = rows.into_iter().map(row_to_dms).collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            next_bookmark,
        })
    }

    async fn count(&self) -> VigilResult<u64> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM dms GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }
}
