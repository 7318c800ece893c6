//! Vigil Services — the control-plane service layer.
//!
//! This crate provides:
//! - CA lifecycle, subordinate signing, and CRL production ([`ca`])
//! - Certificate status transitions and the expiration monitor
//!   ([`certificate`], [`monitor`])
//! - DMS registration and approval ([`dms`])
//! - EST device enrollment ([`device`])
//! - Event-publisher implementations and retry policy ([`events`],
//!   [`retry`])
//!
//! Services are generic over the `vigil-core` repository traits, so the
//! service layer has no dependency on the database crate.

pub mod ca;
pub mod certificate;
pub mod config;
pub mod device;
pub mod dms;
pub mod events;
pub mod monitor;
pub mod retry;

pub use ca::CaService;
pub use certificate::CertificateService;
pub use config::{CaServiceConfig, DmsServiceConfig, EstConfig, MonitorConfig};
pub use device::DeviceService;
pub use dms::DmsService;
pub use monitor::ExpirationMonitor;
