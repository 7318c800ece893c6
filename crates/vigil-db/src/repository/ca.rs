//! SurrealDB implementation of [`CaRepository`].

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

use vigil_core::error::VigilResult;
use vigil_core::models::ca::CertificateAuthority;
use vigil_core::repository::{CaRepository, Page, PageRequest};

use crate::error::{DbError, map_create_error};
use crate::repository::enum_str;

#[derive(Debug, SurrealValue)]
struct CaRow {
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

fn row_to_ca(row: CaRow) -> Result<CertificateAuthority, DbError> {
    let mut ca: CertificateAuthority = serde_json::from_str(&row.data)
        .map_err(|e| DbError::Corrupt(format!("ca {}: {e}", row.key)))?;
    ca.revision = row.revision;
    Ok(ca)
}

/// SurrealDB implementation of the CA repository.
#[derive(Clone)]
pub struct SurrealCaRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealCaRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> CaRepository for SurrealCaRepository<C> {
    async fn insert(&self, ca: &CertificateAuthority) -> VigilResult<CertificateAuthority> {
        let mut stored = ca.clone();
        stored.revision = 0;
        let key = stored.id.clone();
        let data =
            serde_json::to_string(&stored).map_err(|e| DbError::Corrupt(e.to_string()))?;

        let result = self
            .db
            .query(
                "CREATE type::record('ca', $key) SET \
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

        result.check().map_err(|e| map_create_error("ca", &key, e))?;

        Ok(stored)
    }

    async fn get(&self, id: &str) -> VigilResult<CertificateAuthority> {
        let key = id.to_string();

        let mut result = self
            .db
            .query("SELECT key, data, revision FROM type::record('ca', $key)")
            .bind(("key", key.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CaRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "ca".into(),
            id: key,
        })?;

        row_to_ca(row).map_err(Into::into)
    }

    async fn exists(&self, id: &str) -> VigilResult<bool> {
        let mut result = self
            .db
            .query("SELECT key FROM type::record('ca', $key)")
            .bind(("key", id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<KeyRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }

    async fn update(&self, ca: &CertificateAuthority) -> VigilResult<CertificateAuthority> {
        let expected = ca.revision;
        let mut stored = ca.clone();
        stored.revision = expected + 1;
        let key = stored.id.clone();
        let data =
            serde_json::to_string(&stored).map_err(|e| DbError::Corrupt(e.to_string()))?;

        let mut result = self
            .db
            .query(
                "UPDATE type::record('ca', $key) SET \
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

        let rows: Vec<CaRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return if self.exists(&key).await? {
                Err(DbError::RevisionConflict {
                    entity: "ca".into(),
                    id: key,
                }
                .into())
            } else {
                Err(DbError::NotFound {
                    entity: "ca".into(),
                    id: key,
                }
                .into())
            };
        }

        Ok(stored)
    }

    async fn list(&self, page: PageRequest) -> VigilResult<Page<CertificateAuthority>> {
        let bookmark = page.bookmark.unwrap_or_default();

        let mut result = self
            .db
            .query(
                "SELECT key, data, revision FROM ca \
                 WHERE key > $bookmark ORDER BY key ASC LIMIT $limit",
            )
            .bind(("bookmark", bookmark))
            .bind(("limit", page.page_size))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CaRow> = result.take(0).map_err(DbError::from)?;
        let next_bookmark = if rows.len() as u64 == page.page_size {
            rows.last().map(|row| row.key.clone())
        } else {
            None
        };
        let items = rows
            .into_iter()
            .map(row_to_ca)
            .collect::<Result<Vec<_>, _>>()
            .map_err(DbError::from)?;

        Ok(Page {
            items,
            next_bookmark,
        })
    }

    async fn count(&self) -> VigilResult<u64> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM ca GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }
}
