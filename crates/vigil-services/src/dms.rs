//! DMS registration and approval service.
//!
//! A DMS registers with a CSR and waits in `PENDING_APPROVAL`. Approval
//! signs the CSR with the designated DMS-enroller CA; rejection, later
//! revocation, and expiry are the only other legal moves. The
//! authorized-CA list (which enrollment `aps` targets the DMS may use)
//! can only change while the DMS is approved.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vigil_core::error::{VigilError, VigilResult};
use vigil_core::events::{EventPublisher, event_sources, event_types, payload_of};
use vigil_core::models::dms::{Dms, DmsStatus, IdentityProfile};
use vigil_core::repository::{CaRepository, CertificateRepository, DmsRepository, Page, PageRequest};
use vigil_crypto::x509::csr::parse_csr_pem;

use crate::ca::{CaService, SignCertificateInput};
use crate::config::DmsServiceConfig;
use crate::retry::{ensure_active, with_backoff};

#[derive(Debug, Clone)]
pub struct CreateDmsInput {
    pub name: String,
    /// Cloud-managed DMS instances enroll devices through the upstream
    /// manager.
    pub cloud_dms: bool,
    pub identity_profile: IdentityProfile,
    /// CA ids this DMS may enroll devices against.
    pub authorized_cas: Vec<String>,
    /// PEM-encoded CSR; signed when the DMS is approved.
    pub csr_pem: String,
}

/// DMS service, generic over repositories so it carries no database
/// dependency.
pub struct DmsService<M, R, C, P>
where
    M: DmsRepository + Clone,
    R: CaRepository + Clone,
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    dms_repo: M,
    ca: Arc<CaService<R, C, P>>,
    publisher: P,
    config: DmsServiceConfig,
}

impl<M, R, C, P> DmsService<M, R, C, P>
where
    M: DmsRepository + Clone,
    R: CaRepository + Clone,
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    pub fn new(
        dms_repo: M,
        ca: Arc<CaService<R, C, P>>,
        publisher: P,
        config: DmsServiceConfig,
    ) -> Self {
        Self {
            dms_repo,
            ca,
            publisher,
            config,
        }
    }

    pub async fn create_dms(
        &self,
        input: CreateDmsInput,
        cancel: &CancellationToken,
    ) -> VigilResult<Dms> {
        ensure_active(cancel)?;

        if input.name.is_empty() {
            return Err(VigilError::validation("DMS name is required"));
        }
        let parsed = parse_csr_pem(&input.csr_pem)?;

        let now = Utc::now();
        let dms = Dms {
            name: input.name,
            subject: parsed.subject,
            key_metadata: parsed.key_metadata,
            status: DmsStatus::PendingApproval,
            cloud_dms: input.cloud_dms,
            authorized_cas: input.authorized_cas,
            identity_profile: input.identity_profile,
            csr_pem: input.csr_pem,
            certificate_serial: None,
            created_at: now,
            last_status_update: now,
            revision: 0,
        };

        let dms = with_backoff("dms.insert", || async { self.dms_repo.insert(&dms).await }).await?;
        info!(dms = %dms.name, "DMS registered, pending approval");
        self.publisher
            .publish(event_types::DMS_CREATE, event_sources::DMS, payload_of(&dms))
            .await;
        Ok(dms)
    }

    pub async fn get_dms(&self, name: &str) -> VigilResult<Dms> {
        self.dms_repo.get(name).await
    }

    pub async fn list_dms(&self, page: PageRequest) -> VigilResult<Page<Dms>> {
        self.dms_repo.list(page).await
    }

    /// Drive the approval state machine. Exactly these transitions are
    /// legal: `PENDING_APPROVAL -> APPROVED | REJECTED` and
    /// `APPROVED -> REVOKED | EXPIRED`. Approval signs the registration
    /// CSR with the DMS-enroller CA and stores the issued serial.
    pub async fn update_status(
        &self,
        name: &str,
        status: DmsStatus,
        cancel: &CancellationToken,
    ) -> VigilResult<Dms> {
        ensure_active(cancel)?;

        let mut dms = self.dms_repo.get(name).await?;
        if !dms.status.can_transition_to(status) {
            return Err(VigilError::InvalidTransition {
                entity: "dms".into(),
                from: format!("{:?}", dms.status),
                to: format!("{status:?}"),
            });
        }

        if status == DmsStatus::Approved {
            let certificate = self
                .ca
                .sign_certificate(
                    SignCertificateInput {
                        ca_id: self.config.enroller_ca_id.clone(),
                        csr_pem: dms.csr_pem.clone(),
                        subject: None,
                        sign_verbatim: true,
                        requested_duration_secs: None,
                    },
                    cancel,
                )
                .await?;
            dms.certificate_serial = Some(certificate.serial_number);
        }

        dms.status = status;
        dms.last_status_update = Utc::now();
        let dms = with_backoff("dms.update", || async { self.dms_repo.update(&dms).await }).await?;
        info!(dms = %dms.name, status = ?dms.status, "DMS status updated");
        self.publisher
            .publish(event_types::DMS_UPDATE, event_sources::DMS, payload_of(&dms))
            .await;
        Ok(dms)
    }

    /// Replace the authorized-CA list. Legal only while the DMS is
    /// `APPROVED`.
    pub async fn update_authorized_cas(
        &self,
        name: &str,
        authorized_cas: Vec<String>,
        cancel: &CancellationToken,
    ) -> VigilResult<Dms> {
        ensure_active(cancel)?;

        let mut dms = self.dms_repo.get(name).await?;
        if dms.status != DmsStatus::Approved {
            return Err(VigilError::Forbidden {
                reason: format!(
                    "authorized CAs can only change while the DMS is approved (status is {:?})",
                    dms.status
                ),
            });
        }

        // Every referenced CA must exist.
        for ca_id in &authorized_cas {
            self.ca.get_ca(ca_id).await?;
        }

        dms.authorized_cas = authorized_cas;
        let dms = with_backoff("dms.update", || async { self.dms_repo.update(&dms).await }).await?;
        self.publisher
            .publish(event_types::DMS_UPDATE, event_sources::DMS, payload_of(&dms))
            .await;
        Ok(dms)
    }
}
