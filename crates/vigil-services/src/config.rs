//! Service configuration.

use std::time::Duration;

/// Configuration for the CA service.
#[derive(Debug, Clone)]
pub struct CaServiceConfig {
    /// Per-call deadline for crypto-engine operations.
    pub engine_timeout: Duration,
    /// Page size used when sweeping certificates (revocation cascade, CRL).
    pub sweep_page_size: u64,
}

impl Default for CaServiceConfig {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_secs(30),
            sweep_page_size: 15,
        }
    }
}

/// Configuration for the expiration monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the monitor scans the certificate repository.
    pub cadence: Duration,
    /// Batch size for each repository page.
    pub page_size: u64,
    /// How long before `not_after` a certificate is flagged `NEAR_EXPIRY`.
    pub preventive_delta: chrono::Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(30),
            page_size: 50,
            preventive_delta: chrono::Duration::days(7),
        }
    }
}

/// Configuration for the DMS service.
#[derive(Debug, Clone)]
pub struct DmsServiceConfig {
    /// Id of the DMS-enroller CA that signs DMS certificates on approval.
    pub enroller_ca_id: String,
}

/// Configuration for the EST device service.
#[derive(Debug, Clone)]
pub struct EstConfig {
    /// PEM of the upstream manager CA; client certificates of cloud-managed
    /// DMS instances must chain to it.
    pub upstream_ca_pem: Option<String>,
    /// Id of the local registration-authority CA; client certificates of
    /// self-managed DMS instances must chain to it.
    pub local_ra_ca_id: String,
}
