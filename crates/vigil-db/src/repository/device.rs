//! SurrealDB implementation of [`DeviceRepository`].

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

use vigil_core::error::VigilResult;
use vigil_core::models::device::Device;
use vigil_core::repository::{DeviceRepository, Page, PageRequest};

use crate::error::{DbError, map_create_error};
use crate::repository::enum_str;

#[derive(Debug, SurrealValue)]
struct DeviceRow {
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

fn row_to_device(row: DeviceRow) -> Result<Device, DbError> {
    let mut device: Device = serde_json::from_str(&row.data)
        .map_err(|e| DbError::Corrupt(format!("device {}: {e}", row.key)))?;
    device.revision = row.revision;
    Ok(device)
}

fn page_from_rows(rows: Vec<DeviceRow>, page_size: u64) -> Result<Page<Device>, DbError> {
    let next_bookmark = if rows.len() as u64 == page_size {
        rows.last().map(|row| row.key.clone())
    } else {
        None
    };
    let items = rows
        .into_iter()
        .map(row_to_device)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        next_bookmark,
    })
}

/// SurrealDB implementation of the device repository.
#[derive(Clone)]
pub struct SurrealDeviceRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealDeviceRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> DeviceRepository for SurrealDeviceRepository<C> {
    async fn insert(&self, device: &Device) -> VigilResult<Device> {
        let mut stored = device.clone();
        stored.revision = 0;
        let key = stored.id.clone();
        let data =
            serde_json::to_string(&stored).map_err(|e| DbError::Corrupt(e.to_string()))?;

        let result = self
            .db
            .query(
                "CREATE type::record('device', $key) SET \
                 key = $key, \
                 data = $data, \
                 dms_owner_id = $dms_owner_id, \
                 status = $status, \
                 revision = 0",
            )
            .bind(("key", key.clone()))
            .bind(("data", data))
            .bind(("dms_owner_id", stored.dms_owner_id.clone()))
            .bind(("status", enum_str(&stored.status)))
            .await
            .map_err(DbError::from)?;

        result
            .check()
            .map_err(|e| map_create_error("device", &key, e))?;

        Ok(stored)
    }

    async fn get(&self, id: &str) -> VigilResult<Device> {
        let key = id.to_string();

        let mut result = self
            .db
            .query("SELECT key, data, revision FROM type::record('device', $key)")
            .bind(("key", key.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DeviceRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "device".into(),
            id: key,
        })?;

        row_to_device(row).map_err(Into::into)
    }

    async fn exists(&self, id: &str) -> VigilResult<bool> {
        let mut result = self
            .db
            .query("SELECT key FROM type::record('device', $key)")
            .bind(("key", id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<KeyRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }

    async fn update(&self, device: &Device) -> VigilResult<Device> {
        let expected = device.revision;
        let mut stored = device.clone();
        stored.revision = expected + 1;
        let key = stored.id.clone();
        let data =
            serde_json::to_string(&stored).map_err(|e| DbError::Corrupt(e.to_string()))?;

        let mut result = self
            .db
            .query(
                "UPDATE type::record('device', $key) SET \
                 data = $data, \
                 dms_owner_id = $dms_owner_id, \
                 status = $status, \
                 revision = $next \
                 WHERE revision = $expected",
            )
            .bind(("key", key.clone()))
            .bind(("data", data))
            .bind(("dms_owner_id", stored.dms_owner_id.clone()))
            .bind(("status", enum_str(&stored.status)))
            .bind(("next", stored.revision))
            .bind(("expected", expected))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DeviceRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return if self.exists(&key).await? {
                Err(DbError::RevisionConflict {
                    entity: "device".into(),
                    id: key,
                }
                .into())
            } else {
                Err(DbError::NotFound {
                    entity: "device".into(),
                    id: key,
                }
                .into())
            };
        }

        Ok(stored)
    }

    async fn list(&self, page: PageRequest) -> VigilResult<Page<Device>> {
        let bookmark = page.bookmark.unwrap_or_default();

        let mut result = self
            .db
            .query(
                "SELECT key, data, revision FROM device \
                 WHERE key > $bookmark ORDER BY key ASC LIMIT $limit",
            )
            .bind(("bookmark", bookmark))
            .bind(("limit", page.page_size))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DeviceRow> = result.take(0).map_err(DbError::from)?;
        page_from_rows(rows, page.page_size).map_err(Into::into)
    }

    async fn list_by_dms(&self, dms_name: &str, page: PageRequest) -> VigilResult<Page<Device>> {
        let bookmark = page.bookmark.unwrap_or_default();

        let mut result = self
            .db
            .query(
                "SELECT key, data, revision FROM device \
                 WHERE dms_owner_id = $dms AND key > $bookmark \
                 ORDER BY key ASC LIMIT $limit",
            )
            .bind(("dms", dms_name.to_string()))
            .bind(("bookmark", bookmark))
            .bind(("limit", page.page_size))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DeviceRow> = result.take(0).map_err(DbError::from)?;
        page_from_rows(rows, page.page_size).map_err(Into::into)
    }

    async fn count(&self) -> VigilResult<u64> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM device GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }
}
