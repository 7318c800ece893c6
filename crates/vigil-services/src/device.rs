//! Device manager and EST enrollment service.
//!
//! Implements the RFC 7030 operation set (`cacerts`, `enroll`,
//! `reenroll`, `server_keygen`) on top of the CA service, gated by the
//! owning DMS's approval status, authorized-CA list, and client
//! certificate chain.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_core::error::{VigilError, VigilResult};
use vigil_core::events::{EventPublisher, event_sources, event_types, payload_of};
use vigil_core::models::certificate::{Certificate, RevocationReason};
use vigil_core::models::device::{Device, DeviceLog, DeviceStatus, Slot, SlotKind};
use vigil_core::models::dms::{Dms, DmsStatus};
use vigil_core::repository::{
    CaRepository, CertificateRepository, DeviceRepository, DmsRepository, Page, PageRequest,
};
use vigil_crypto::aws::AwsSecretsKeyStore;
use vigil_crypto::keypair::{KeyAlgorithm, KeyPair};
use vigil_crypto::x509::csr::parse_csr_pem;
use vigil_crypto::x509::verify::{issued_by, parse_certificate_pem};
use vigil_crypto::x509::{fingerprint_sha256, pem_to_der};

use crate::ca::{CaService, SignCertificateInput};
use crate::certificate::CertificateService;
use crate::config::EstConfig;
use crate::retry::{ensure_active, with_backoff};

// -----------------------------------------------------------------------
// EST authentication context
// -----------------------------------------------------------------------

/// How the EST client authenticated at the transport.
#[derive(Debug, Clone)]
pub enum EstAuth {
    /// TLS with a client certificate; the only mode enrollment accepts.
    MutualTls { client_certificate_pem: String },
    /// Anything else (basic auth, anonymous TLS, ...).
    Unauthenticated,
}

/// Per-request EST context assembled by the transport.
#[derive(Debug, Clone)]
pub struct EstContext {
    pub auth: EstAuth,
    /// Explicit DMS id from the `x-dms-id` header; overrides the client
    /// certificate common name.
    pub dms_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateDeviceInput {
    pub id: String,
    pub alias: String,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub dms_id: String,
}

/// `server_keygen` hands back the certificate together with the key the
/// server generated; the key is never stored on the device record.
pub struct ServerKeygenOutput {
    pub certificate: Certificate,
    pub private_key_pem: String,
}

// -----------------------------------------------------------------------
// DeviceService
// -----------------------------------------------------------------------

pub struct DeviceService<D, M, R, C, P>
where
    D: DeviceRepository + Clone,
    M: DmsRepository + Clone,
    R: CaRepository + Clone,
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    devices: D,
    dms_repo: M,
    ca: Arc<CaService<R, C, P>>,
    certificates: CertificateService<C, P>,
    publisher: P,
    config: EstConfig,
    /// Optional archive for server-generated device keys.
    key_archive: Option<Arc<AwsSecretsKeyStore>>,
}

impl<D, M, R, C, P> DeviceService<D, M, R, C, P>
where
    D: DeviceRepository + Clone,
    M: DmsRepository + Clone,
    R: CaRepository + Clone,
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    pub fn new(
        devices: D,
        dms_repo: M,
        ca: Arc<CaService<R, C, P>>,
        certificates: CertificateService<C, P>,
        publisher: P,
        config: EstConfig,
    ) -> Self {
        Self {
            devices,
            dms_repo,
            ca,
            certificates,
            publisher,
            config,
            key_archive: None,
        }
    }

    /// Archive server-generated private keys in AWS Secrets Manager.
    pub fn with_key_archive(mut self, archive: Arc<AwsSecretsKeyStore>) -> Self {
        self.key_archive = Some(archive);
        self
    }

    // -------------------------------------------------------------------
    // Device CRUD
    // -------------------------------------------------------------------

    pub async fn create_device(
        &self,
        input: CreateDeviceInput,
        cancel: &CancellationToken,
    ) -> VigilResult<Device> {
        ensure_active(cancel)?;
        if input.id.is_empty() {
            return Err(VigilError::validation("device id is required"));
        }
        // The owning DMS must exist.
        self.dms_repo.get(&input.dms_id).await?;
        self.insert_device(input).await
    }

    async fn insert_device(&self, input: CreateDeviceInput) -> VigilResult<Device> {
        let device = Device {
            id: input.id,
            alias: input.alias,
            tags: input.tags,
            metadata: input.metadata,
            dms_owner_id: input.dms_id,
            status: DeviceStatus::NoIdentity,
            identity_slot: None,
            extra_slots: HashMap::new(),
            logs: vec![DeviceLog::info("Device created. Pending provision")],
            created_at: Utc::now(),
            revision: 0,
        };

        let device =
            with_backoff("device.insert", || async { self.devices.insert(&device).await }).await?;
        info!(device_id = %device.id, dms = %device.dms_owner_id, "device created");
        self.publisher
            .publish(
                event_types::DEVICE_CREATE,
                event_sources::DEVICE_MANAGER,
                payload_of(&device),
            )
            .await;
        Ok(device)
    }

    pub async fn get_device(&self, id: &str) -> VigilResult<Device> {
        self.devices.get(id).await
    }

    pub async fn list_devices(&self, page: PageRequest) -> VigilResult<Page<Device>> {
        self.devices.list(page).await
    }

    pub async fn list_devices_by_dms(
        &self,
        dms_name: &str,
        page: PageRequest,
    ) -> VigilResult<Page<Device>> {
        self.devices.list_by_dms(dms_name, page).await
    }

    /// Take a device out of service: its active identity certificate is
    /// revoked and the device stops being eligible for reenrollment.
    pub async fn decommission_device(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> VigilResult<Device> {
        ensure_active(cancel)?;

        let mut device = self.devices.get(id).await?;
        if device.status == DeviceStatus::Decommissioned {
            return Err(VigilError::InvalidTransition {
                entity: "device".into(),
                from: "DECOMMISSIONED".into(),
                to: "DECOMMISSIONED".into(),
            });
        }

        if let Some(slot) = &device.identity_slot
            && let Some(active) = slot.active_secret()
        {
            self.certificates
                .update_status(
                    &active.serial_number,
                    vigil_core::models::certificate::CertificateStatus::Revoked,
                    Some(RevocationReason::CessationOfOperation),
                    cancel,
                )
                .await?;
        }

        device.status = DeviceStatus::Decommissioned;
        device
            .logs
            .push(DeviceLog::info("Device decommissioned; identity revoked"));
        let device =
            with_backoff("device.update", || async { self.devices.update(&device).await }).await?;
        self.publisher
            .publish(
                event_types::DEVICE_UPDATE,
                event_sources::DEVICE_MANAGER,
                payload_of(&device),
            )
            .await;
        Ok(device)
    }

    // -------------------------------------------------------------------
    // EST operations
    // -------------------------------------------------------------------

    /// The CA chain a client should trust for `aps`, leaf-first.
    pub async fn cacerts(&self, aps: &str) -> VigilResult<Vec<Certificate>> {
        let chain = self.ca.chain_of(aps).await?;
        Ok(chain.into_iter().map(|ca| ca.certificate).collect())
    }

    /// First-time enrollment of a device identity.
    pub async fn enroll(
        &self,
        ctx: EstContext,
        csr_pem: &str,
        aps: &str,
        cancel: &CancellationToken,
    ) -> VigilResult<Certificate> {
        ensure_active(cancel)?;

        // 1-4. mTLS client, DMS resolution, approval, chain and aps policy.
        let client_pem = Self::require_mtls(&ctx)?;
        let dms = self.authorize_enrollment(&ctx, &client_pem, aps).await?;

        // 5. Resolve (or create) the device named by the CSR common name.
        let parsed = parse_csr_pem(csr_pem)?;
        let device_id = parsed.subject.common_name.clone();
        let mut device = if self.devices.exists(&device_id).await? {
            self.devices.get(&device_id).await?
        } else {
            let settings = &dms.identity_profile.enrollment_settings;
            self.insert_device(CreateDeviceInput {
                id: device_id.clone(),
                alias: dms.name.clone(),
                tags: settings.tags.clone(),
                metadata: settings.metadata.clone(),
                dms_id: dms.name.clone(),
            })
            .await?
        };

        // 6. A device with an identity reenrolls instead.
        if device.identity_slot.is_some() {
            return Err(VigilError::Forbidden {
                reason: "slot default already enrolled".into(),
            });
        }

        // 7. Sign verbatim against the requested CA.
        let certificate = self
            .ca
            .sign_certificate(
                SignCertificateInput {
                    ca_id: aps.to_string(),
                    csr_pem: csr_pem.to_string(),
                    subject: None,
                    sign_verbatim: true,
                    requested_duration_secs: None,
                },
                cancel,
            )
            .await?;

        // 8. Version 0 of the identity slot.
        let reenroll = &dms.identity_profile.reenrollment_settings;
        let mut slot = Slot {
            dms_managed: false,
            active_version: 0,
            secrets: HashMap::new(),
            preventive_reenrollment_delta_secs: reenroll.preventive_delta_secs,
            critical_reenrollment_delta_secs: reenroll.critical_delta_secs,
            kind: SlotKind::X509,
        };
        slot.push_version(certificate.clone());
        device.identity_slot = Some(slot);
        device.status = DeviceStatus::Active;
        device.logs.push(DeviceLog::info(format!(
            "Identity slot enrolled with certificate {}",
            certificate.serial_number
        )));

        let device =
            with_backoff("device.update", || async { self.devices.update(&device).await }).await?;
        info!(device_id = %device.id, serial = %certificate.serial_number, "device enrolled");
        self.publisher
            .publish(
                event_types::DEVICE_UPDATE,
                event_sources::DEVICE_MANAGER,
                payload_of(&device),
            )
            .await;

        Ok(certificate)
    }

    /// Renew the device identity. The client authenticates with the
    /// currently-active slot certificate (or, within the configured grace
    /// window, its expired self), and the new certificate lands in slot
    /// version `active + 1`.
    pub async fn reenroll(
        &self,
        ctx: EstContext,
        csr_pem: &str,
        aps: &str,
        cancel: &CancellationToken,
    ) -> VigilResult<Certificate> {
        ensure_active(cancel)?;

        let client_pem = Self::require_mtls(&ctx)?;
        let client_fingerprint = fingerprint_sha256(&pem_to_der(&client_pem)?);

        let parsed = parse_csr_pem(csr_pem)?;
        let device_id = parsed.subject.common_name.clone();
        let mut device = self.devices.get(&device_id).await?;

        // Same DMS gates as enrollment; the DMS is resolved through the
        // device record because the client certificate here is the device
        // identity, not the DMS certificate.
        let dms = self.dms_repo.get(&device.dms_owner_id).await?;
        Self::require_approved(&dms)?;
        Self::require_authorized_aps(&dms, aps)?;

        let slot = device.identity_slot.as_mut().ok_or_else(|| VigilError::Forbidden {
            reason: "device has no identity slot; enroll first".into(),
        })?;
        let active = slot
            .active_secret()
            .ok_or_else(|| VigilError::Storage("identity slot has no active version".into()))?;

        if active.fingerprint != client_fingerprint {
            return Err(VigilError::Forbidden {
                reason: "presented certificate is not the device's active identity".into(),
            });
        }

        let now = Utc::now();
        if now >= active.not_after {
            let settings = &dms.identity_profile.reenrollment_settings;
            let grace = settings
                .expired_grace_secs
                .filter(|_| settings.allow_expired_renewal)
                .map(Duration::seconds)
                .ok_or_else(|| VigilError::Forbidden {
                    reason: "identity certificate has expired and expired renewal is not allowed"
                        .into(),
                })?;
            if now >= active.not_after + grace {
                return Err(VigilError::Forbidden {
                    reason: "identity certificate expired beyond the renewal grace window".into(),
                });
            }
        }

        let certificate = self
            .ca
            .sign_certificate(
                SignCertificateInput {
                    ca_id: aps.to_string(),
                    csr_pem: csr_pem.to_string(),
                    subject: None,
                    sign_verbatim: true,
                    requested_duration_secs: None,
                },
                cancel,
            )
            .await?;

        let version = slot.push_version(certificate.clone());
        device.status = DeviceStatus::Active;
        device.logs.push(DeviceLog::info(format!(
            "Identity slot reenrolled (version {version}, certificate {})",
            certificate.serial_number
        )));

        let device =
            with_backoff("device.update", || async { self.devices.update(&device).await }).await?;
        info!(device_id = %device.id, version, "device reenrolled");
        self.publisher
            .publish(
                event_types::DEVICE_UPDATE,
                event_sources::DEVICE_MANAGER,
                payload_of(&device),
            )
            .await;

        Ok(certificate)
    }

    /// Enrollment variant where the server generates the key pair. The
    /// private key is returned to the caller (and optionally archived)
    /// but never persisted on the device record.
    pub async fn server_keygen(
        &self,
        ctx: EstContext,
        csr_pem: &str,
        aps: &str,
        cancel: &CancellationToken,
    ) -> VigilResult<ServerKeygenOutput> {
        ensure_active(cancel)?;

        let client_pem = Self::require_mtls(&ctx)?;
        let dms = self.authorize_enrollment(&ctx, &client_pem, aps).await?;

        let parsed = parse_csr_pem(csr_pem)?;
        let device_id = parsed.subject.common_name.clone();
        let mut device = if self.devices.exists(&device_id).await? {
            self.devices.get(&device_id).await?
        } else {
            let settings = &dms.identity_profile.enrollment_settings;
            self.insert_device(CreateDeviceInput {
                id: device_id.clone(),
                alias: dms.name.clone(),
                tags: settings.tags.clone(),
                metadata: settings.metadata.clone(),
                dms_id: dms.name.clone(),
            })
            .await?
        };
        if device.identity_slot.is_some() {
            return Err(VigilError::Forbidden {
                reason: "slot default already enrolled".into(),
            });
        }

        // Generate a key matching what the CSR asked for; the CSR's own
        // public key is discarded by definition of this operation.
        let algorithm = KeyAlgorithm::from_metadata(&vigil_core::models::key::KeyMetadata {
            key_type: parsed.key_metadata.key_type,
            bits: parsed.key_metadata.bits,
        })
        .map_err(|e| VigilError::validation(e.to_string()))?;
        let key = tokio::task::spawn_blocking(move || KeyPair::generate(algorithm))
            .await
            .map_err(|e| VigilError::Crypto(format!("keygen task failed: {e}")))??;
        let spki_der = key.public_key_der()?;
        let private_key_pem = key.to_pkcs8_pem()?;

        let certificate = self
            .ca
            .sign_public_key(aps, parsed.subject, spki_der, parsed.san_der, None, cancel)
            .await?;

        if let Some(archive) = &self.key_archive {
            let archive_id = format!("{device_id}-identity");
            if let Err(err) = archive.store(&archive_id, &private_key_pem).await {
                warn!(device_id = %device_id, error = %err, "could not archive device key");
            }
        }

        let reenroll = &dms.identity_profile.reenrollment_settings;
        let mut slot = Slot {
            dms_managed: true,
            active_version: 0,
            secrets: HashMap::new(),
            preventive_reenrollment_delta_secs: reenroll.preventive_delta_secs,
            critical_reenrollment_delta_secs: reenroll.critical_delta_secs,
            kind: SlotKind::X509,
        };
        slot.push_version(certificate.clone());
        device.identity_slot = Some(slot);
        device.status = DeviceStatus::Active;
        device.logs.push(DeviceLog::info(format!(
            "Identity generated server-side with certificate {}",
            certificate.serial_number
        )));

        let device =
            with_backoff("device.update", || async { self.devices.update(&device).await }).await?;
        self.publisher
            .publish(
                event_types::DEVICE_UPDATE,
                event_sources::DEVICE_MANAGER,
                payload_of(&device),
            )
            .await;

        Ok(ServerKeygenOutput {
            certificate,
            private_key_pem,
        })
    }

    // -------------------------------------------------------------------
    // Policy checks
    // -------------------------------------------------------------------

    fn require_mtls(ctx: &EstContext) -> VigilResult<String> {
        match &ctx.auth {
            EstAuth::MutualTls {
                client_certificate_pem,
            } => Ok(client_certificate_pem.clone()),
            EstAuth::Unauthenticated => Err(VigilError::Unauthorized {
                reason: "only supports mTLS authentication".into(),
            }),
        }
    }

    fn require_approved(dms: &Dms) -> VigilResult<()> {
        if dms.status != DmsStatus::Approved {
            return Err(VigilError::Forbidden {
                reason: format!("DMS {} is {:?}, not APPROVED", dms.name, dms.status),
            });
        }
        Ok(())
    }

    fn require_authorized_aps(dms: &Dms, aps: &str) -> VigilResult<()> {
        if !dms.authorized_cas.iter().any(|ca| ca == aps) {
            return Err(VigilError::Forbidden {
                reason: format!("DMS {} is not authorized to enroll against CA {aps}", dms.name),
            });
        }
        Ok(())
    }

    /// Steps 1-4 of the enrollment pipeline: resolve the DMS (explicit
    /// header, else client certificate common name), require approval,
    /// verify the client certificate chain against the expected issuer,
    /// and check the `aps` authorization.
    async fn authorize_enrollment(
        &self,
        ctx: &EstContext,
        client_pem: &str,
        aps: &str,
    ) -> VigilResult<Dms> {
        let client = parse_certificate_pem(client_pem).map_err(|_| VigilError::Unauthorized {
            reason: "could not parse the client certificate".into(),
        })?;

        let dms_id = match &ctx.dms_id {
            Some(id) => id.clone(),
            None => {
                let subject =
                    vigil_crypto::x509::name_to_subject(&client.tbs_certificate.subject);
                subject.common_name
            }
        };
        if dms_id.is_empty() {
            return Err(VigilError::Unauthorized {
                reason: "could not resolve a DMS id from the request".into(),
            });
        }

        let dms = self.dms_repo.get(&dms_id).await?;
        Self::require_approved(&dms)?;

        if dms.cloud_dms {
            // Cloud-managed fleets must come in through the upstream
            // manager; their client certificates chain to its CA.
            let upstream_pem =
                self.config
                    .upstream_ca_pem
                    .as_ref()
                    .ok_or_else(|| VigilError::Forbidden {
                        reason: "this device must be enrolled through the upstream manager".into(),
                    })?;
            let upstream = parse_certificate_pem(upstream_pem)?;
            issued_by(&client, &upstream).map_err(|_| VigilError::Forbidden {
                reason: "this device must be enrolled through the upstream manager".into(),
            })?;
        } else {
            let ra = self.ca.get_ca(&self.config.local_ra_ca_id).await?;
            let ra_cert = parse_certificate_pem(&ra.certificate.certificate_pem)?;
            issued_by(&client, &ra_cert).map_err(|_| VigilError::Forbidden {
                reason: "client certificate does not chain to the registration authority".into(),
            })?;
        }

        Self::require_authorized_aps(&dms, aps)?;
        Ok(dms)
    }
}
