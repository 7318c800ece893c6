//! Certificate lifecycle service: status lookups and the single
//! precedence-aware `update_status` path that both the monitor and
//! explicit revocations go through.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use vigil_core::error::{VigilError, VigilResult};
use vigil_core::events::{EventPublisher, event_sources, event_types, payload_of};
use vigil_core::models::certificate::{Certificate, CertificateStatus, RevocationReason};
use vigil_core::repository::{CertificateRepository, Page, PageRequest};

use crate::retry::{ensure_active, with_backoff};

/// Certificate lifecycle service.
///
/// Generic over the repository and publisher so it carries no database
/// dependency.
#[derive(Clone)]
pub struct CertificateService<C, P>
where
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    cert_repo: C,
    publisher: P,
}

impl<C, P> CertificateService<C, P>
where
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    pub fn new(cert_repo: C, publisher: P) -> Self {
        Self {
            cert_repo,
            publisher,
        }
    }

    pub async fn get_by_serial(&self, serial: &str) -> VigilResult<Certificate> {
        self.cert_repo.get_by_serial(serial).await
    }

    pub async fn list(&self, page: PageRequest) -> VigilResult<Page<Certificate>> {
        self.cert_repo.list(page).await
    }

    pub async fn list_by_ca(
        &self,
        ca_id: &str,
        status: Option<CertificateStatus>,
        page: PageRequest,
    ) -> VigilResult<Page<Certificate>> {
        self.cert_repo.list_by_ca(ca_id, status, page).await
    }

    /// Certificates expiring inside `[from, to)`.
    pub async fn list_by_expiration(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: PageRequest,
    ) -> VigilResult<Page<Certificate>> {
        self.cert_repo.list_by_expiration(from, to, page).await
    }

    /// Move a certificate to `new_status`, applying the precedence rule
    /// `Revoked > Expired > NearExpiry > Active` atomically: a target that
    /// does not outrank the stored status is a no-op, so a monitor batch
    /// racing an external revoke can never downgrade it.
    ///
    /// Emits `certificate.update` only when the stored status changed.
    pub async fn update_status(
        &self,
        serial: &str,
        new_status: CertificateStatus,
        reason: Option<RevocationReason>,
        cancel: &CancellationToken,
    ) -> VigilResult<Certificate> {
        ensure_active(cancel)?;

        if new_status == CertificateStatus::Active {
            let current = self.cert_repo.get_by_serial(serial).await?;
            return if current.status == CertificateStatus::Active {
                Ok(current)
            } else {
                Err(VigilError::InvalidTransition {
                    entity: "certificate".into(),
                    from: format!("{:?}", current.status),
                    to: format!("{new_status:?}"),
                })
            };
        }

        // Read-modify-write with the revision token; a concurrent writer
        // bumps the revision and the stale write retries from a fresh read.
        let updated = with_backoff("certificate.update_status", || async {
            let current = self.cert_repo.get_by_serial(serial).await?;
            if new_status.precedence() <= current.status.precedence() {
                return Ok(None);
            }

            let mut next = current;
            next.status = new_status;
            if new_status == CertificateStatus::Revoked {
                next.revocation_reason = Some(reason.unwrap_or(RevocationReason::Unspecified));
                next.revocation_timestamp = Some(Utc::now());
            }
            next.updated_at = Utc::now();
            self.cert_repo.update(&next).await.map(Some)
        })
        .await?;

        match updated {
            Some(certificate) => {
                info!(
                    serial = %certificate.serial_number,
                    status = ?certificate.status,
                    "certificate status updated"
                );
                self.publisher
                    .publish(
                        event_types::CERTIFICATE_UPDATE,
                        event_sources::CA,
                        payload_of(&certificate),
                    )
                    .await;
                Ok(certificate)
            }
            // Precedence kept the stored status; report it unchanged.
            None => self.cert_repo.get_by_serial(serial).await,
        }
    }
}
