//! CA lifecycle service: creation, import, rotation, revocation with
//! cascade, subordinate signing, and CRL production.
//!
//! Per CA id, state-changing operations (`create`, `rotate`, `revoke`,
//! status updates) hold a write lock; signing holds a read lock and
//! re-checks the CA status inside it, so no new signature can start once
//! a revocation has been persisted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use vigil_core::error::{VigilError, VigilResult};
use vigil_core::events::{EventPublisher, event_sources, event_types, payload_of};
use vigil_core::models::ca::{CaStatus, CaType, CertificateAuthority};
use vigil_core::models::certificate::{
    Certificate, CertificateKind, CertificateStatus, RevocationReason,
};
use vigil_core::models::key::KeyMetadata;
use vigil_core::models::subject::Subject;
use vigil_core::repository::{CaRepository, CertificateRepository, Page, PageRequest};
use vigil_crypto::engine::{EngineInfo, EngineRegistry, Signer};
use vigil_crypto::keypair::KeyAlgorithm;
use vigil_crypto::x509::build::{CertificateSpec, IssuerIdentity, issue};
use vigil_crypto::x509::crl::{CrlEntry, build_crl};
use vigil_crypto::x509::csr::parse_csr_pem;
use vigil_crypto::x509::verify::parse_certificate_pem;
use vigil_crypto::x509::{
    format_serial, from_x509_time, key_metadata_from_spki, name_to_subject, parse_serial,
    random_serial,
};

use crate::certificate::CertificateService;
use crate::config::CaServiceConfig;
use crate::retry::{ensure_active, with_backoff};

// -----------------------------------------------------------------------
// Input types
// -----------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CreateCaInput {
    /// Defaults to the subject common name.
    pub id: Option<String>,
    pub ca_type: CaType,
    pub subject: Subject,
    pub key_metadata: KeyMetadata,
    pub ca_duration_secs: i64,
    pub issuance_duration_secs: i64,
    pub engine_id: String,
    /// Required for subordinate CAs.
    pub parent_ca_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportCaInput {
    /// Defaults to the imported certificate's common name.
    pub id: Option<String>,
    pub certificate_pem: String,
    /// With a key the CA is fully managed and can sign; without it the CA
    /// is tracked as `External` and never signs.
    pub private_key_pem: Option<String>,
    pub engine_id: Option<String>,
    pub issuance_duration_secs: i64,
}

#[derive(Debug, Clone)]
pub struct SignCertificateInput {
    pub ca_id: String,
    pub csr_pem: String,
    /// Subject override, used when `sign_verbatim` is off. Falls back to
    /// the CSR subject.
    pub subject: Option<Subject>,
    /// Reproduce the CSR's subject and SANs exactly.
    pub sign_verbatim: bool,
    pub requested_duration_secs: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RevokeCaInput {
    pub ca_id: String,
    /// Defaults to `CA_COMPROMISE`.
    pub reason: Option<RevocationReason>,
}

// -----------------------------------------------------------------------
// CaService
// -----------------------------------------------------------------------

/// CA lifecycle service, generic over repository implementations.
pub struct CaService<R, C, P>
where
    R: CaRepository + Clone,
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    ca_repo: R,
    cert_repo: C,
    certificates: CertificateService<C, P>,
    engines: EngineRegistry,
    publisher: P,
    config: CaServiceConfig,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

/// The crypto-engine key id that backs a CA.
fn ca_key_id(ca_type: CaType, ca_id: &str) -> String {
    let tag = match ca_type {
        CaType::Root => "ROOT",
        CaType::Subordinate => "SUBORDINATE",
        CaType::DmsEnroller => "DMS_ENROLLER",
        CaType::External => "EXTERNAL",
    };
    format!("{tag}/{ca_id}")
}

impl<R, C, P> CaService<R, C, P>
where
    R: CaRepository + Clone,
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    pub fn new(
        ca_repo: R,
        cert_repo: C,
        engines: EngineRegistry,
        publisher: P,
        config: CaServiceConfig,
    ) -> Self {
        Self {
            ca_repo,
            certificates: CertificateService::new(cert_repo.clone(), publisher.clone()),
            cert_repo,
            engines,
            publisher,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine_infos(&self) -> Vec<EngineInfo> {
        self.engines.infos()
    }

    async fn lock_for(&self, ca_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(ca_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Apply the per-engine deadline to a crypto call.
    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = vigil_crypto::CryptoResult<T>>,
    ) -> VigilResult<T> {
        match tokio::time::timeout(self.config.engine_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(VigilError::Timeout(self.config.engine_timeout.as_secs())),
        }
    }

    /// Draw a serial that is not yet present in the repository.
    async fn unique_serial(&self) -> VigilResult<Vec<u8>> {
        loop {
            let candidate = random_serial();
            if !self.cert_repo.exists(&format_serial(&candidate)).await? {
                return Ok(candidate);
            }
        }
    }

    // -------------------------------------------------------------------
    // Lifecycle operations
    // -------------------------------------------------------------------

    pub async fn create_ca(
        &self,
        input: CreateCaInput,
        cancel: &CancellationToken,
    ) -> VigilResult<CertificateAuthority> {
        ensure_active(cancel)?;

        if input.subject.common_name.is_empty() {
            return Err(VigilError::validation("subject common name is required"));
        }
        if input.ca_duration_secs <= 0 || input.issuance_duration_secs <= 0 {
            return Err(VigilError::validation("durations must be positive"));
        }
        if input.issuance_duration_secs > input.ca_duration_secs {
            return Err(VigilError::validation(
                "issuance duration cannot exceed the CA duration",
            ));
        }
        match (input.ca_type, &input.parent_ca_id) {
            (CaType::External, _) => {
                return Err(VigilError::validation(
                    "external CAs are registered through import_ca",
                ));
            }
            (CaType::Subordinate, None) => {
                return Err(VigilError::validation(
                    "subordinate CAs require a parent CA id",
                ));
            }
            (CaType::Root | CaType::DmsEnroller, Some(_)) => {
                return Err(VigilError::validation(
                    "only subordinate CAs take a parent CA id",
                ));
            }
            _ => {}
        }

        let id = input
            .id
            .clone()
            .unwrap_or_else(|| input.subject.common_name.clone());

        let lock = self.lock_for(&id).await;
        let _guard = lock.write().await;

        if self.ca_repo.exists(&id).await? {
            return Err(VigilError::AlreadyExists {
                entity: "ca".into(),
                id,
            });
        }

        let ca = self.provision(&id, input, cancel).await?;
        self.publisher
            .publish(event_types::CA_CREATE, event_sources::CA, payload_of(&ca))
            .await;
        Ok(ca)
    }

    /// Generate the key, mint the CA certificate, and persist the record.
    /// Callers hold the write lock for `id` and publish their own event.
    async fn provision(
        &self,
        id: &str,
        input: CreateCaInput,
        cancel: &CancellationToken,
    ) -> VigilResult<CertificateAuthority> {
        let engine = self.engines.get(&input.engine_id)?;
        if !engine.engine_info().supports(&input.key_metadata) {
            return Err(VigilError::validation(format!(
                "engine {} does not support {:?} keys of {} bits",
                input.engine_id, input.key_metadata.key_type, input.key_metadata.bits
            )));
        }

        // Resolve the parent before cutting a key so a bad reference fails
        // cheaply.
        let parent = match &input.parent_ca_id {
            Some(parent_id) => {
                let parent = self.ca_repo.get(parent_id).await?;
                if parent.ca_type == CaType::External || !parent.status.may_sign() {
                    return Err(VigilError::Forbidden {
                        reason: format!("parent CA {parent_id} cannot sign"),
                    });
                }
                Some(parent)
            }
            None => None,
        };

        let algorithm = KeyAlgorithm::from_metadata(&input.key_metadata)
            .map_err(|e| VigilError::validation(e.to_string()))?;
        let key_id = ca_key_id(input.ca_type, id);
        let signer = self
            .with_deadline(engine.create_key(algorithm, &key_id))
            .await?;

        let now = Utc::now();
        let mut not_after = now + Duration::seconds(input.ca_duration_secs);
        if let Some(parent) = &parent {
            not_after = not_after.min(parent.not_after);
        }

        let serial = self.unique_serial().await?;
        let spec = CertificateSpec {
            serial: serial.clone(),
            subject: input.subject.clone(),
            subject_spki_der: signer.public_key_der().to_vec(),
            not_before: now,
            not_after,
            is_ca: true,
            path_len: None,
            san_der: None,
        };

        let built = match &parent {
            Some(parent) => {
                let parent_engine = self.engines.get(&parent.engine_id)?;
                let parent_signer = self
                    .with_deadline(parent_engine.signer(&ca_key_id(parent.ca_type, &parent.id)))
                    .await?;
                let parent_serial = parse_serial(&parent.serial_number)?;
                self.with_deadline(issue(
                    &spec,
                    Some(IssuerIdentity {
                        subject: &parent.subject,
                        serial: &parent_serial,
                    }),
                    &parent_signer,
                ))
                .await?
            }
            None => self.with_deadline(issue(&spec, None, &signer)).await?,
        };

        let serial_string = format_serial(&serial);
        let certificate = Certificate {
            serial_number: serial_string.clone(),
            issuing_ca_id: parent.as_ref().map(|p| p.id.clone()).unwrap_or_else(|| id.to_string()),
            subject: input.subject.clone(),
            key_metadata: input.key_metadata.with_strength(),
            not_before: now,
            not_after,
            status: CertificateStatus::Active,
            revocation_reason: None,
            revocation_timestamp: None,
            certificate_pem: built.pem,
            fingerprint: built.fingerprint,
            kind: CertificateKind::Ca,
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        let ca = CertificateAuthority {
            id: id.to_string(),
            ca_type: input.ca_type,
            subject: input.subject,
            key_metadata: input.key_metadata.with_strength(),
            issuance_duration_secs: input.issuance_duration_secs,
            not_before: now,
            not_after,
            engine_id: input.engine_id,
            status: CaStatus::Active,
            serial_number: serial_string,
            parent_ca_id: input.parent_ca_id,
            certificate,
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        ensure_active(cancel)?;
        let ca = with_backoff("ca.insert", || async { self.ca_repo.insert(&ca).await }).await?;
        info!(ca_id = %ca.id, ca_type = ?ca.ca_type, "CA created");
        Ok(ca)
    }

    pub async fn import_ca(
        &self,
        input: ImportCaInput,
        cancel: &CancellationToken,
    ) -> VigilResult<CertificateAuthority> {
        ensure_active(cancel)?;

        if input.issuance_duration_secs <= 0 {
            return Err(VigilError::validation("issuance duration must be positive"));
        }

        let parsed = parse_certificate_pem(&input.certificate_pem)?;
        let subject = name_to_subject(&parsed.tbs_certificate.subject);
        if subject.common_name.is_empty() {
            return Err(VigilError::validation(
                "imported certificate has no common name",
            ));
        }
        let spki_der = {
            use vigil_crypto::x509::der_encode;
            der_encode(&parsed.tbs_certificate.subject_public_key_info)?
        };
        let key_metadata = key_metadata_from_spki(&spki_der)?;
        let serial_string = format_serial(parsed.tbs_certificate.serial_number.as_bytes());
        let not_before = from_x509_time(&parsed.tbs_certificate.validity.not_before);
        let not_after = from_x509_time(&parsed.tbs_certificate.validity.not_after);

        let id = input.id.clone().unwrap_or_else(|| subject.common_name.clone());
        let lock = self.lock_for(&id).await;
        let _guard = lock.write().await;
        if self.ca_repo.exists(&id).await? {
            return Err(VigilError::AlreadyExists {
                entity: "ca".into(),
                id,
            });
        }

        let (ca_type, engine_id) = match &input.private_key_pem {
            Some(key_pem) => {
                let engine_id = input.engine_id.clone().ok_or_else(|| {
                    VigilError::validation("an engine id is required to import a private key")
                })?;
                let engine = self.engines.get(&engine_id)?;
                let signer = self
                    .with_deadline(engine.import_key(&ca_key_id(CaType::Root, &id), key_pem))
                    .await?;
                if signer.public_key_der() != spki_der.as_slice() {
                    return Err(VigilError::validation(
                        "private key does not match the certificate public key",
                    ));
                }
                (CaType::Root, engine_id)
            }
            None => (CaType::External, input.engine_id.clone().unwrap_or_default()),
        };

        let now = Utc::now();
        let certificate = Certificate {
            serial_number: serial_string.clone(),
            issuing_ca_id: id.clone(),
            subject: subject.clone(),
            key_metadata,
            not_before,
            not_after,
            status: CertificateStatus::Active,
            revocation_reason: None,
            revocation_timestamp: None,
            certificate_pem: input.certificate_pem.clone(),
            fingerprint: vigil_crypto::x509::fingerprint_sha256(
                &vigil_crypto::x509::pem_to_der(&input.certificate_pem)?,
            ),
            kind: CertificateKind::Ca,
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        let ca = CertificateAuthority {
            id: id.clone(),
            ca_type,
            subject,
            key_metadata,
            issuance_duration_secs: input.issuance_duration_secs,
            not_before,
            not_after,
            engine_id,
            status: CaStatus::Active,
            serial_number: serial_string,
            parent_ca_id: None,
            certificate,
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        let ca = with_backoff("ca.insert", || async { self.ca_repo.insert(&ca).await }).await?;
        info!(ca_id = %ca.id, ca_type = ?ca.ca_type, "CA imported");
        self.publisher
            .publish(event_types::CA_CREATE, event_sources::CA, payload_of(&ca))
            .await;
        Ok(ca)
    }

    pub async fn get_ca(&self, ca_id: &str) -> VigilResult<CertificateAuthority> {
        self.ca_repo.get(ca_id).await
    }

    pub async fn list_cas(&self, page: PageRequest) -> VigilResult<Page<CertificateAuthority>> {
        self.ca_repo.list(page).await
    }

    /// Replace a CA with a fresh instance: same subject, same key
    /// parameters, brand-new key. The previous instance is kept as
    /// `Rotated` so already-issued certificates still verify.
    pub async fn rotate_ca(
        &self,
        ca_id: &str,
        cancel: &CancellationToken,
    ) -> VigilResult<CertificateAuthority> {
        ensure_active(cancel)?;

        let lock = self.lock_for(ca_id).await;
        let _guard = lock.write().await;

        let mut old = self.ca_repo.get(ca_id).await?;
        if old.ca_type == CaType::External {
            return Err(VigilError::validation("external CAs cannot be rotated"));
        }
        if !old.status.can_transition_to(CaStatus::Rotated) {
            return Err(VigilError::InvalidTransition {
                entity: "ca".into(),
                from: format!("{:?}", old.status),
                to: "ROTATED".into(),
            });
        }

        let new_id = format!("{}-{}", old.subject.common_name, Uuid::new_v4());
        let replacement = CreateCaInput {
            id: Some(new_id.clone()),
            ca_type: old.ca_type,
            subject: old.subject.clone(),
            key_metadata: KeyMetadata {
                key_type: old.key_metadata.key_type,
                bits: old.key_metadata.bits,
            },
            ca_duration_secs: (old.not_after - old.not_before).num_seconds(),
            issuance_duration_secs: old.issuance_duration_secs,
            engine_id: old.engine_id.clone(),
            parent_ca_id: old.parent_ca_id.clone(),
        };
        let new_ca = self.provision(&new_id, replacement, cancel).await?;

        old.status = CaStatus::Rotated;
        old.updated_at = Utc::now();
        let old = with_backoff("ca.update", || async { self.ca_repo.update(&old).await }).await?;
        info!(old_ca = %old.id, new_ca = %new_ca.id, "CA rotated");

        self.publisher
            .publish(event_types::CA_ROTATE, event_sources::CA, payload_of(&new_ca))
            .await;
        self.publisher
            .publish(event_types::CA_UPDATE, event_sources::CA, payload_of(&old))
            .await;
        Ok(new_ca)
    }

    /// Revoke a CA and everything it signed: every repository certificate
    /// issued by it, and recursively every subordinate CA, are `Revoked`
    /// before this returns.
    pub async fn revoke_ca(
        &self,
        input: RevokeCaInput,
        cancel: &CancellationToken,
    ) -> VigilResult<CertificateAuthority> {
        ensure_active(cancel)?;
        let reason = input.reason.unwrap_or(RevocationReason::CaCompromise);

        let revoked = self.mark_ca_revoked(&input.ca_id, reason).await?;

        // Cascade. Children found while sweeping are revoked and queued so
        // a whole subtree collapses.
        let mut worklist = vec![revoked.id.clone()];
        while let Some(current) = worklist.pop() {
            self.revoke_issued_certificates(&current, reason, cancel)
                .await?;
            for child in self.subordinates_of(&current).await? {
                if child.status != CaStatus::Revoked {
                    let child = self.mark_ca_revoked(&child.id, reason).await?;
                    worklist.push(child.id);
                }
            }
        }

        Ok(revoked)
    }

    async fn mark_ca_revoked(
        &self,
        ca_id: &str,
        reason: RevocationReason,
    ) -> VigilResult<CertificateAuthority> {
        let lock = self.lock_for(ca_id).await;
        let _guard = lock.write().await;

        let mut ca = self.ca_repo.get(ca_id).await?;
        if !ca.status.can_transition_to(CaStatus::Revoked) {
            return Err(VigilError::InvalidTransition {
                entity: "ca".into(),
                from: format!("{:?}", ca.status),
                to: "REVOKED".into(),
            });
        }

        let now = Utc::now();
        ca.status = CaStatus::Revoked;
        ca.certificate.status = CertificateStatus::Revoked;
        ca.certificate.revocation_reason = Some(reason);
        ca.certificate.revocation_timestamp = Some(now);
        ca.updated_at = now;

        let ca = with_backoff("ca.update", || async { self.ca_repo.update(&ca).await }).await?;
        warn!(ca_id = %ca.id, reason = ?reason, "CA revoked");
        self.publisher
            .publish(event_types::CA_UPDATE, event_sources::CA, payload_of(&ca))
            .await;
        Ok(ca)
    }

    async fn revoke_issued_certificates(
        &self,
        ca_id: &str,
        reason: RevocationReason,
        cancel: &CancellationToken,
    ) -> VigilResult<()> {
        let mut bookmark = None;
        loop {
            let page = self
                .cert_repo
                .list_by_ca(
                    ca_id,
                    None,
                    PageRequest {
                        bookmark: bookmark.clone(),
                        page_size: self.config.sweep_page_size,
                    },
                )
                .await?;
            for certificate in &page.items {
                if certificate.status != CertificateStatus::Revoked {
                    self.certificates
                        .update_status(
                            &certificate.serial_number,
                            CertificateStatus::Revoked,
                            Some(reason),
                            cancel,
                        )
                        .await?;
                }
            }
            match page.next_bookmark {
                Some(next) => bookmark = Some(next),
                None => return Ok(()),
            }
        }
    }

    async fn subordinates_of(&self, ca_id: &str) -> VigilResult<Vec<CertificateAuthority>> {
        let mut children = Vec::new();
        let mut bookmark = None;
        loop {
            let page = self
                .ca_repo
                .list(PageRequest {
                    bookmark: bookmark.clone(),
                    page_size: self.config.sweep_page_size,
                })
                .await?;
            children.extend(
                page.items
                    .into_iter()
                    .filter(|ca| ca.parent_ca_id.as_deref() == Some(ca_id)),
            );
            match page.next_bookmark {
                Some(next) => bookmark = Some(next),
                None => return Ok(children),
            }
        }
    }

    /// Status transition entry point for non-revocation changes (the
    /// monitor marks CAs `Expired` through this).
    pub async fn update_ca_status(
        &self,
        ca_id: &str,
        status: CaStatus,
        cancel: &CancellationToken,
    ) -> VigilResult<CertificateAuthority> {
        ensure_active(cancel)?;
        if status == CaStatus::Revoked {
            return Err(VigilError::validation(
                "revocation goes through revoke_ca so the cascade runs",
            ));
        }

        let lock = self.lock_for(ca_id).await;
        let _guard = lock.write().await;

        let mut ca = self.ca_repo.get(ca_id).await?;
        if !ca.status.can_transition_to(status) {
            return Err(VigilError::InvalidTransition {
                entity: "ca".into(),
                from: format!("{:?}", ca.status),
                to: format!("{status:?}"),
            });
        }
        ca.status = status;
        ca.updated_at = Utc::now();
        let ca = with_backoff("ca.update", || async { self.ca_repo.update(&ca).await }).await?;
        self.publisher
            .publish(event_types::CA_UPDATE, event_sources::CA, payload_of(&ca))
            .await;
        Ok(ca)
    }

    // -------------------------------------------------------------------
    // Signing
    // -------------------------------------------------------------------

    pub async fn sign_certificate(
        &self,
        input: SignCertificateInput,
        cancel: &CancellationToken,
    ) -> VigilResult<Certificate> {
        ensure_active(cancel)?;

        let parsed = parse_csr_pem(&input.csr_pem)?;
        let (subject, san_der) = if input.sign_verbatim {
            (parsed.subject, parsed.san_der)
        } else {
            (input.subject.unwrap_or(parsed.subject), None)
        };

        self.sign_public_key(
            &input.ca_id,
            subject,
            parsed.spki_der,
            san_der,
            input.requested_duration_secs,
            cancel,
        )
        .await
    }

    /// Shared issuance path for CSR signing and server-side key
    /// generation. Holds the CA read lock so it serializes against state
    /// changes while allowing concurrent signs.
    pub(crate) async fn sign_public_key(
        &self,
        ca_id: &str,
        subject: Subject,
        spki_der: Vec<u8>,
        san_der: Option<Vec<u8>>,
        requested_duration_secs: Option<i64>,
        cancel: &CancellationToken,
    ) -> VigilResult<Certificate> {
        let lock = self.lock_for(ca_id).await;
        let _guard = lock.read().await;

        let ca = self.ca_repo.get(ca_id).await?;
        if ca.ca_type == CaType::External {
            return Err(VigilError::Forbidden {
                reason: format!("CA {ca_id} is external; its key is not managed here"),
            });
        }
        if !ca.status.may_sign() {
            return Err(VigilError::Forbidden {
                reason: format!("CA {ca_id} is {:?} and cannot sign", ca.status),
            });
        }

        let now = Utc::now();
        if ca.not_after <= now {
            return Err(VigilError::Forbidden {
                reason: format!("CA {ca_id} expired at {}", ca.not_after),
            });
        }

        // Validity: the requested window, clamped by the CA issuance
        // policy and the CA's own lifetime.
        let issuance = ca.issuance_duration();
        let requested = requested_duration_secs
            .map(Duration::seconds)
            .unwrap_or(issuance);
        if requested <= Duration::zero() {
            return Err(VigilError::validation("requested duration must be positive"));
        }
        let not_after = (now + requested).min(now + issuance).min(ca.not_after);

        let serial = self.unique_serial().await?;
        let engine = self.engines.get(&ca.engine_id)?;
        let signer: Signer = self
            .with_deadline(engine.signer(&ca_key_id(ca.ca_type, &ca.id)))
            .await?;

        let key_metadata = key_metadata_from_spki(&spki_der)?;
        let ca_serial = parse_serial(&ca.serial_number)?;
        let built = self
            .with_deadline(issue(
                &CertificateSpec {
                    serial: serial.clone(),
                    subject: subject.clone(),
                    subject_spki_der: spki_der,
                    not_before: now,
                    not_after,
                    is_ca: false,
                    path_len: None,
                    san_der,
                },
                Some(IssuerIdentity {
                    subject: &ca.subject,
                    serial: &ca_serial,
                }),
                &signer,
            ))
            .await?;

        let record = Certificate {
            serial_number: format_serial(&serial),
            issuing_ca_id: ca.id.clone(),
            subject,
            key_metadata,
            not_before: now,
            not_after,
            status: CertificateStatus::Active,
            revocation_reason: None,
            revocation_timestamp: None,
            certificate_pem: built.pem,
            fingerprint: built.fingerprint,
            kind: CertificateKind::EndEntity,
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        // A signed certificate is always recorded, even when the caller
        // has gone away; only the response is discarded on cancellation.
        let record =
            with_backoff("certificate.insert", || async { self.cert_repo.insert(&record).await })
                .await?;
        info!(serial = %record.serial_number, ca_id = %ca.id, "certificate signed");
        self.publisher
            .publish(event_types::CA_SIGN, event_sources::CA, payload_of(&record))
            .await;

        ensure_active(cancel)?;
        Ok(record)
    }

    // -------------------------------------------------------------------
    // CRL
    // -------------------------------------------------------------------

    /// Build a fresh CRL for the CA: every revoked certificate it issued,
    /// signed with the CA key. Nothing is cached; freshness is
    /// deterministic.
    pub async fn get_crl(&self, ca_id: &str) -> VigilResult<Vec<u8>> {
        let ca = self.ca_repo.get(ca_id).await?;
        if ca.ca_type == CaType::External {
            return Err(VigilError::Forbidden {
                reason: format!("CA {ca_id} is external; it cannot sign a CRL"),
            });
        }

        let mut entries = Vec::new();
        let mut bookmark = None;
        loop {
            let page = self
                .cert_repo
                .list_by_ca(
                    ca_id,
                    Some(CertificateStatus::Revoked),
                    PageRequest {
                        bookmark: bookmark.clone(),
                        page_size: self.config.sweep_page_size,
                    },
                )
                .await?;
            for certificate in &page.items {
                entries.push(CrlEntry {
                    serial: parse_serial(&certificate.serial_number)?,
                    revocation_time: certificate.revocation_timestamp.unwrap_or_else(Utc::now),
                    reason: certificate
                        .revocation_reason
                        .unwrap_or(RevocationReason::Unspecified),
                });
            }
            match page.next_bookmark {
                Some(next) => bookmark = Some(next),
                None => break,
            }
        }

        let engine = self.engines.get(&ca.engine_id)?;
        let signer = self
            .with_deadline(engine.signer(&ca_key_id(ca.ca_type, &ca.id)))
            .await?;
        let crl = self
            .with_deadline(build_crl(&entries, &ca.subject, &signer, Utc::now()))
            .await?;
        info!(ca_id, entries = entries.len(), "CRL built");
        Ok(crl)
    }

    /// The CA chain for `ca_id`, leaf-first, following parent links.
    pub async fn chain_of(&self, ca_id: &str) -> VigilResult<Vec<CertificateAuthority>> {
        let mut chain = vec![self.ca_repo.get(ca_id).await?];
        while let Some(parent_id) = chain.last().and_then(|ca| ca.parent_ca_id.clone()) {
            chain.push(self.ca_repo.get(&parent_id).await?);
        }
        Ok(chain)
    }
}
