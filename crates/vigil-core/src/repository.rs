//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Lists are paginated with a
//! resumable bookmark cursor so callers (the expiration monitor in
//! particular) can iterate large collections in bounded batches and
//! resume after interruption. Updates carry the entity's `revision`
//! token; a stale revision fails with a storage conflict instead of
//! silently overwriting a concurrent write.

use chrono::{DateTime, Utc};

use crate::error::VigilResult;
use crate::models::ca::CertificateAuthority;
use crate::models::certificate::{Certificate, CertificateStatus};
use crate::models::device::Device;
use crate::models::dms::Dms;

/// Cursor-driven page request.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Opaque cursor returned by a previous page; `None` starts from the
    /// beginning.
    pub bookmark: Option<String>,
    pub page_size: u64,
}

impl PageRequest {
    pub fn first(page_size: u64) -> Self {
        Self {
            bookmark: None,
            page_size,
        }
    }
}

/// One page of results plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` when the collection is exhausted.
    pub next_bookmark: Option<String>,
}

// ---------------------------------------------------------------------------
// Certificate authorities
// ---------------------------------------------------------------------------

pub trait CaRepository: Send + Sync {
    fn insert(
        &self,
        ca: &CertificateAuthority,
    ) -> impl Future<Output = VigilResult<CertificateAuthority>> + Send;
    fn get(&self, id: &str) -> impl Future<Output = VigilResult<CertificateAuthority>> + Send;
    fn exists(&self, id: &str) -> impl Future<Output = VigilResult<bool>> + Send;
    /// Revision-checked update; a stale revision is a storage conflict.
    fn update(
        &self,
        ca: &CertificateAuthority,
    ) -> impl Future<Output = VigilResult<CertificateAuthority>> + Send;
    fn list(&self, page: PageRequest)
    -> impl Future<Output = VigilResult<Page<CertificateAuthority>>> + Send;
    fn count(&self) -> impl Future<Output = VigilResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

pub trait CertificateRepository: Send + Sync {
    fn insert(
        &self,
        certificate: &Certificate,
    ) -> impl Future<Output = VigilResult<Certificate>> + Send;
    fn get_by_serial(
        &self,
        serial: &str,
    ) -> impl Future<Output = VigilResult<Certificate>> + Send;
    fn exists(&self, serial: &str) -> impl Future<Output = VigilResult<bool>> + Send;
    fn update(
        &self,
        certificate: &Certificate,
    ) -> impl Future<Output = VigilResult<Certificate>> + Send;
    fn list(&self, page: PageRequest) -> impl Future<Output = VigilResult<Page<Certificate>>> + Send;
    /// Certificates issued by a CA, optionally narrowed to one status.
    fn list_by_ca(
        &self,
        ca_id: &str,
        status: Option<CertificateStatus>,
        page: PageRequest,
    ) -> impl Future<Output = VigilResult<Page<Certificate>>> + Send;
    /// Certificates whose `not_after` falls inside `[from, to)`.
    fn list_by_expiration(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: PageRequest,
    ) -> impl Future<Output = VigilResult<Page<Certificate>>> + Send;
    fn count(&self) -> impl Future<Output = VigilResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// DMS
// ---------------------------------------------------------------------------

pub trait DmsRepository: Send + Sync {
    fn insert(&self, dms: &Dms) -> impl Future<Output = VigilResult<Dms>> + Send;
    fn get(&self, name: &str) -> impl Future<Output = VigilResult<Dms>> + Send;
    fn update(&self, dms: &Dms) -> impl Future<Output = VigilResult<Dms>> + Send;
    fn list(&self, page: PageRequest) -> impl Future<Output = VigilResult<Page<Dms>>> + Send;
    fn count(&self) -> impl Future<Output = VigilResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

pub trait DeviceRepository: Send + Sync {
    fn insert(&self, device: &Device) -> impl Future<Output = VigilResult<Device>> + Send;
    fn get(&self, id: &str) -> impl Future<Output = VigilResult<Device>> + Send;
    fn exists(&self, id: &str) -> impl Future<Output = VigilResult<bool>> + Send;
    fn update(&self, device: &Device) -> impl Future<Output = VigilResult<Device>> + Send;
    fn list(&self, page: PageRequest) -> impl Future<Output = VigilResult<Page<Device>>> + Send;
    fn list_by_dms(
        &self,
        dms_name: &str,
        page: PageRequest,
    ) -> impl Future<Output = VigilResult<Page<Device>>> + Send;
    fn count(&self) -> impl Future<Output = VigilResult<u64>> + Send;
}
