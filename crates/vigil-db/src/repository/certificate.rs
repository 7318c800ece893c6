//! SurrealDB implementation of [`CertificateRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

use vigil_core::error::VigilResult;
use vigil_core::models::certificate::{Certificate, CertificateStatus};
use vigil_core::repository::{CertificateRepository, Page, PageRequest};

use crate::error::{DbError, map_create_error};
use crate::repository::enum_str;

#[derive(Debug, SurrealValue)]
struct CertificateRow {
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

fn row_to_certificate(row: CertificateRow) -> Result<Certificate, DbError> {
    let mut certificate: Certificate = serde_json::from_str(&row.data)
        .map_err(|e| DbError::Corrupt(format!("certificate {}: {e}", row.key)))?;
    certificate.revision = row.revision;
    Ok(certificate)
}

fn page_from_rows(rows: Vec<CertificateRow>, page_size: u64) -> Result<Page<Certificate>, DbError> {
    let next_bookmark = if rows.len() as u64 == page_size {
        rows.last().map(|row| row.key.clone())
    } else {
        None
    };
    let items = rows
        .into_iter()
        .map(row_to_certificate)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        next_bookmark,
    })
}

/// SurrealDB implementation of the certificate repository.
#[derive(Clone)]
pub struct SurrealCertificateRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealCertificateRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> CertificateRepository for SurrealCertificateRepository<C> {
    async fn insert(&self, certificate: &Certificate) -> VigilResult<Certificate> {
        let mut stored = certificate.clone();
        stored.revision = 0;
        let key = stored.serial_number.clone();
        let data = serde_json::to_string(&stored)
            .map_err(|e| DbError::Corrupt(e.to_string()))?;

        let result = self
            .db
            .query(
                "CREATE type::record('certificate', $key) SET \
                 key = $key, \
                 data = $data, \
                 issuing_ca_id = $issuing_ca_id, \
                 status = $status, \
                 not_after = $not_after, \
                 revision = 0",
            )
            .bind(("key", key.clone()))
            .bind(("data", data))
            .bind(("issuing_ca_id", stored.issuing_ca_id.clone()))
            .bind(("status", enum_str(&stored.status)))
            .bind(("not_after", stored.not_after))
            .await
            .map_err(DbError::from)?;

        result
            .check()
            .map_err(|e| map_create_error("certificate", &key, e))?;

        Ok(stored)
    }

    async fn get_by_serial(&self, serial: &str) -> VigilResult<Certificate> {
        let key = serial.to_string();

        let mut result = self
            .db
            .query(
                "SELECT key, data, revision FROM type::record('certificate', $key)",
            )
            .bind(("key", key.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "certificate".into(),
            id: key,
        })?;

        row_to_certificate(row).map_err(Into::into)
    }

    async fn exists(&self, serial: &str) -> VigilResult<bool> {
        let mut result = self
            .db
            .query("SELECT key FROM type::record('certificate', $key)")
            .bind(("key", serial.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<KeyRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }

    async fn update(&self, certificate: &Certificate) -> VigilResult<Certificate> {
        let expected = certificate.revision;
        let mut stored = certificate.clone();
        stored.revision = expected + 1;
        let key = stored.serial_number.clone();
        let data = serde_json::to_string(&stored)
            .map_err(|e| DbError::Corrupt(e.to_string()))?;

        let mut result = self
            .db
            .query(
                "UPDATE type::record('certificate', $key) SET \
                 data = $data, \
                 status = $status, \
                 not_after = $not_after, \
                 revision = $next \
                 WHERE revision = $expected",
            )
            .bind(("key", key.clone()))
            .bind(("data", data))
            .bind(("status", enum_str(&stored.status)))
            .bind(("not_after", stored.not_after))
            .bind(("next", stored.revision))
            .bind(("expected", expected))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            // Either the record is gone or someone else won the write.
            return if self.exists(&key).await? {
                Err(DbError::RevisionConflict {
                    entity: "certificate".into(),
                    id: key,
                }
                .into())
            } else {
                Err(DbError::NotFound {
                    entity: "certificate".into(),
                    id: key,
                }
                .into())
            };
        }

        Ok(stored)
    }

    async fn list(&self, page: PageRequest) -> VigilResult<Page<Certificate>> {
        let bookmark = page.bookmark.unwrap_or_default();

        let mut result = self
            .db
            .query(
                "SELECT key, data, revision FROM certificate \
                 WHERE key > $bookmark ORDER BY key ASC LIMIT $limit",
            )
            .bind(("bookmark", bookmark))
            .bind(("limit", page.page_size))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        page_from_rows(rows, page.page_size).map_err(Into::into)
    }

    async fn list_by_ca(
        &self,
        ca_id: &str,
        status: Option<CertificateStatus>,
        page: PageRequest,
    ) -> VigilResult<Page<Certificate>> {
        let bookmark = page.bookmark.unwrap_or_default();

        let mut query = match status {
            Some(status) => self
                .db
                .query(
                    "SELECT key, data, revision FROM certificate \
                     WHERE issuing_ca_id = $ca AND status = $status AND key > $bookmark \
                     ORDER BY key ASC LIMIT $limit",
                )
                .bind(("status", enum_str(&status))),
            None => self.db.query(
                "SELECT key, data, revision FROM certificate \
                 WHERE issuing_ca_id = $ca AND key > $bookmark \
                 ORDER BY key ASC LIMIT $limit",
            ),
        };
        query = query
            .bind(("ca", ca_id.to_string()))
            .bind(("bookmark", bookmark))
            .bind(("limit", page.page_size));

        let mut result = query.await.map_err(DbError::from)?;
        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        page_from_rows(rows, page.page_size).map_err(Into::into)
    }

    async fn list_by_expiration(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: PageRequest,
    ) -> VigilResult<Page<Certificate>> {
        let bookmark = page.bookmark.unwrap_or_default();

        let mut result = self
            .db
            .query(
                "SELECT key, data, revision FROM certificate \
                 WHERE not_after >= $from AND not_after < $to AND key > $bookmark \
                 ORDER BY key ASC LIMIT $limit",
            )
            .bind(("from", from))
            .bind(("to", to))
            .bind(("bookmark", bookmark))
            .bind(("limit", page.page_size))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        page_from_rows(rows, page.page_size).map_err(Into::into)
    }

    async fn count(&self) -> VigilResult<u64> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM certificate GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }
}
