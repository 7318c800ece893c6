//! SurrealDB implementations of the `vigil-core` repository traits.
//!
//! Each entity table stores the full JSON document in a `data` field next
//! to the columns queries filter on. Pagination walks the unique `key`
//! column; the bookmark is simply the last key of the previous page.

mod ca;
mod certificate;
mod device;
mod dms;

pub use ca::SurrealCaRepository;
pub use certificate::SurrealCertificateRepository;
pub use device::SurrealDeviceRepository;
pub use dms::SurrealDmsRepository;

/// Serialize an enum's wire name (e.g. `ACTIVE`) for an indexed column.
pub(crate) fn enum_str<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}
