//! Shared test harness: in-memory SurrealDB, a local PEM engine, and the
//! full service stack wired with a channel-backed event publisher.
#![allow(dead_code)]

use std::sync::Arc;

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use vigil_core::models::ca::CaType;
use vigil_core::models::dms::{Dms, DmsStatus, IdentityProfile};
use vigil_core::models::key::KeyMetadata;
use vigil_core::models::subject::Subject;
use vigil_crypto::engine::{CryptoEngine, EngineRegistry};
use vigil_crypto::keypair::{KeyAlgorithm, KeyPair};
use vigil_crypto::local::{LocalPemConfig, LocalPemEngine};
use vigil_crypto::x509::csr::generate_csr;
use vigil_db::{
    SurrealCaRepository, SurrealCertificateRepository, SurrealDeviceRepository,
    SurrealDmsRepository,
};
use vigil_services::ca::{CaService, CreateCaInput};
use vigil_services::certificate::CertificateService;
use vigil_services::config::{CaServiceConfig, DmsServiceConfig, EstConfig, MonitorConfig};
use vigil_services::device::DeviceService;
use vigil_services::dms::{CreateDmsInput, DmsService};
use vigil_services::events::{ChannelEventPublisher, PublishedEvent};
use vigil_services::monitor::ExpirationMonitor;

pub type CaSvc =
    CaService<SurrealCaRepository<Db>, SurrealCertificateRepository<Db>, ChannelEventPublisher>;
pub type CertSvc = CertificateService<SurrealCertificateRepository<Db>, ChannelEventPublisher>;
pub type DmsSvc = DmsService<
    SurrealDmsRepository<Db>,
    SurrealCaRepository<Db>,
    SurrealCertificateRepository<Db>,
    ChannelEventPublisher,
>;
pub type DeviceSvc = DeviceService<
    SurrealDeviceRepository<Db>,
    SurrealDmsRepository<Db>,
    SurrealCaRepository<Db>,
    SurrealCertificateRepository<Db>,
    ChannelEventPublisher,
>;
pub type Monitor = ExpirationMonitor<
    SurrealCaRepository<Db>,
    SurrealCertificateRepository<Db>,
    ChannelEventPublisher,
>;

/// The id of the CA that acts as both DMS enroller and local RA in tests.
pub const RA_CA_ID: &str = "dms-ra";

pub struct Stack {
    pub ca: Arc<CaSvc>,
    pub certificates: CertSvc,
    pub dms: DmsSvc,
    pub devices: DeviceSvc,
    pub monitor: Monitor,
    pub events: UnboundedReceiver<PublishedEvent>,
    pub cert_repo: SurrealCertificateRepository<Db>,
    pub cancel: CancellationToken,
}

pub async fn stack() -> Stack {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    vigil_db::run_migrations(&db).await.unwrap();

    let key_dir = std::env::temp_dir().join(format!("vigil-svc-{}", uuid::Uuid::new_v4()));
    let mut engines = EngineRegistry::new();
    engines.register(CryptoEngine::LocalPem(
        LocalPemEngine::open(LocalPemConfig {
            engine_id: "local-1".into(),
            directory: key_dir,
        })
        .await
        .unwrap(),
    ));

    let (publisher, events) = ChannelEventPublisher::new();
    let ca_repo = SurrealCaRepository::new(db.clone());
    let cert_repo = SurrealCertificateRepository::new(db.clone());
    let dms_repo = SurrealDmsRepository::new(db.clone());
    let device_repo = SurrealDeviceRepository::new(db.clone());

    let ca = Arc::new(CaService::new(
        ca_repo,
        cert_repo.clone(),
        engines,
        publisher.clone(),
        CaServiceConfig::default(),
    ));
    let certificates = CertificateService::new(cert_repo.clone(), publisher.clone());
    let dms = DmsService::new(
        dms_repo.clone(),
        ca.clone(),
        publisher.clone(),
        DmsServiceConfig {
            enroller_ca_id: RA_CA_ID.into(),
        },
    );
    let devices = DeviceService::new(
        device_repo,
        dms_repo,
        ca.clone(),
        certificates.clone(),
        publisher.clone(),
        EstConfig {
            upstream_ca_pem: None,
            local_ra_ca_id: RA_CA_ID.into(),
        },
    );
    let monitor = ExpirationMonitor::new(certificates.clone(), ca.clone(), MonitorConfig::default());

    Stack {
        ca,
        certificates,
        dms,
        devices,
        monitor,
        events,
        cert_repo,
        cancel: CancellationToken::new(),
    }
}

/// Create an ECDSA P-256 CA with sensible test durations.
pub async fn create_test_ca(stack: &Stack, id: &str, ca_type: CaType) {
    stack
        .ca
        .create_ca(
            CreateCaInput {
                id: Some(id.into()),
                ca_type,
                subject: Subject::with_common_name(id),
                key_metadata: KeyMetadata::ecdsa(256),
                ca_duration_secs: 5 * 365 * 24 * 3600,
                issuance_duration_secs: 365 * 24 * 3600,
                engine_id: "local-1".into(),
                parent_ca_id: None,
            },
            &stack.cancel,
        )
        .await
        .unwrap();
}

/// Register and approve a DMS named `name`, authorized for `authorized_cas`.
/// Returns the DMS together with the PEM of its issued client certificate.
pub async fn approved_dms(
    stack: &mut Stack,
    name: &str,
    authorized_cas: &[&str],
    profile: IdentityProfile,
) -> (Dms, String) {
    let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
    let csr = generate_csr(&Subject::with_common_name(name), &key, &[]).unwrap();

    stack
        .dms
        .create_dms(
            CreateDmsInput {
                name: name.into(),
                cloud_dms: false,
                identity_profile: profile,
                authorized_cas: authorized_cas.iter().map(|s| s.to_string()).collect(),
                csr_pem: csr,
            },
            &stack.cancel,
        )
        .await
        .unwrap();

    let dms = stack
        .dms
        .update_status(name, DmsStatus::Approved, &stack.cancel)
        .await
        .unwrap();

    let serial = dms.certificate_serial.clone().unwrap();
    let certificate = stack.certificates.get_by_serial(&serial).await.unwrap();
    (dms, certificate.certificate_pem)
}

/// Drain all events observed so far and return their type keys.
pub fn drain_event_types(stack: &mut Stack) -> Vec<String> {
    let mut types = Vec::new();
    while let Ok(event) = stack.events.try_recv() {
        types.push(event.event_type);
    }
    types
}
