//! EST enrollment integration tests: the mTLS gate, DMS policy checks,
//! duplicate enrollment, reenrollment versioning, server-side key
//! generation, and the cacerts chain.

mod common;

use common::{RA_CA_ID, approved_dms, create_test_ca, stack};
use vigil_core::VigilError;
use vigil_core::models::ca::CaType;
use vigil_core::models::device::DeviceStatus;
use vigil_core::models::dms::IdentityProfile;
use vigil_core::models::key::KeyMetadata;
use vigil_core::models::subject::Subject;
use vigil_crypto::keypair::{KeyAlgorithm, KeyPair};
use vigil_crypto::x509::csr::generate_csr;
use vigil_services::ca::CreateCaInput;
use vigil_services::device::{EstAuth, EstContext};

fn mtls(client_pem: &str) -> EstContext {
    EstContext {
        auth: EstAuth::MutualTls {
            client_certificate_pem: client_pem.to_string(),
        },
        dms_id: None,
    }
}

fn device_csr(device_id: &str) -> String {
    let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
    generate_csr(&Subject::with_common_name(device_id), &key, &[]).unwrap()
}

#[tokio::test]
async fn enrollment_requires_mtls() {
    let mut stack = stack().await;
    create_test_ca(&stack, RA_CA_ID, CaType::DmsEnroller).await;
    create_test_ca(&stack, "fleet-ca", CaType::Root).await;
    approved_dms(&mut stack, "Fleet DMS", &["fleet-ca"], IdentityProfile::default()).await;

    let result = stack
        .devices
        .enroll(
            EstContext {
                auth: EstAuth::Unauthenticated,
                dms_id: Some("Fleet DMS".into()),
            },
            &device_csr("sensor-1"),
            "fleet-ca",
            &stack.cancel,
        )
        .await;
    assert!(matches!(result, Err(VigilError::Unauthorized { .. })));
}

#[tokio::test]
async fn enrollment_with_untrusted_client_certificate_is_denied() {
    let mut stack = stack().await;
    create_test_ca(&stack, RA_CA_ID, CaType::DmsEnroller).await;
    create_test_ca(&stack, "fleet-ca", CaType::Root).await;
    create_test_ca(&stack, "rogue-ca", CaType::Root).await;
    approved_dms(&mut stack, "Fleet DMS", &["fleet-ca"], IdentityProfile::default()).await;

    // A certificate with the DMS common name, signed by the wrong CA.
    let rogue = stack
        .ca
        .sign_certificate(
            vigil_services::ca::SignCertificateInput {
                ca_id: "rogue-ca".into(),
                csr_pem: device_csr("Fleet DMS"),
                subject: None,
                sign_verbatim: true,
                requested_duration_secs: None,
            },
            &stack.cancel,
        )
        .await
        .unwrap();

    let result = stack
        .devices
        .enroll(
            mtls(&rogue.certificate_pem),
            &device_csr("sensor-1"),
            "fleet-ca",
            &stack.cancel,
        )
        .await;
    assert!(matches!(result, Err(VigilError::Forbidden { .. })));

    // No device record was created.
    let lookup = stack.devices.get_device("sensor-1").await;
    assert!(matches!(lookup, Err(VigilError::NotFound { .. })));
}

#[tokio::test]
async fn first_enrollment_succeeds_and_duplicates_are_denied() {
    let mut stack = stack().await;
    create_test_ca(&stack, RA_CA_ID, CaType::DmsEnroller).await;
    create_test_ca(&stack, "fleet-ca", CaType::Root).await;
    let (_, dms_cert_pem) =
        approved_dms(&mut stack, "Fleet DMS", &["fleet-ca"], IdentityProfile::default()).await;

    let certificate = stack
        .devices
        .enroll(
            mtls(&dms_cert_pem),
            &device_csr("sensor-7"),
            "fleet-ca",
            &stack.cancel,
        )
        .await
        .unwrap();
    assert_eq!(certificate.issuing_ca_id, "fleet-ca");
    assert_eq!(certificate.subject.common_name, "sensor-7");

    let device = stack.devices.get_device("sensor-7").await.unwrap();
    assert_eq!(device.status, DeviceStatus::Active);
    assert_eq!(device.dms_owner_id, "Fleet DMS");
    let slot = device.identity_slot.as_ref().unwrap();
    assert_eq!(slot.active_version, 0);
    assert_eq!(
        slot.active_secret().unwrap().serial_number,
        certificate.serial_number
    );

    // Second enrollment for the same common name is refused.
    let duplicate = stack
        .devices
        .enroll(
            mtls(&dms_cert_pem),
            &device_csr("sensor-7"),
            "fleet-ca",
            &stack.cancel,
        )
        .await;
    match duplicate {
        Err(VigilError::Forbidden { reason }) => {
            assert!(reason.contains("slot default already enrolled"))
        }
        other => panic!("expected FORBIDDEN, got {other:?}"),
    }
}

#[tokio::test]
async fn enrollment_against_an_unauthorized_aps_is_denied() {
    let mut stack = stack().await;
    create_test_ca(&stack, RA_CA_ID, CaType::DmsEnroller).await;
    create_test_ca(&stack, "fleet-ca", CaType::Root).await;
    create_test_ca(&stack, "other-ca", CaType::Root).await;
    let (_, dms_cert_pem) =
        approved_dms(&mut stack, "Fleet DMS", &["fleet-ca"], IdentityProfile::default()).await;

    let result = stack
        .devices
        .enroll(
            mtls(&dms_cert_pem),
            &device_csr("sensor-9"),
            "other-ca",
            &stack.cancel,
        )
        .await;
    assert!(matches!(result, Err(VigilError::Forbidden { .. })));
}

#[tokio::test]
async fn reenrollment_bumps_the_slot_version_and_keeps_history() {
    let mut stack = stack().await;
    create_test_ca(&stack, RA_CA_ID, CaType::DmsEnroller).await;
    create_test_ca(&stack, "fleet-ca", CaType::Root).await;
    let (_, dms_cert_pem) =
        approved_dms(&mut stack, "Fleet DMS", &["fleet-ca"], IdentityProfile::default()).await;

    let first = stack
        .devices
        .enroll(
            mtls(&dms_cert_pem),
            &device_csr("sensor-11"),
            "fleet-ca",
            &stack.cancel,
        )
        .await
        .unwrap();

    // The device reenrolls presenting its active identity certificate.
    let second = stack
        .devices
        .reenroll(
            mtls(&first.certificate_pem),
            &device_csr("sensor-11"),
            "fleet-ca",
            &stack.cancel,
        )
        .await
        .unwrap();
    assert_ne!(first.serial_number, second.serial_number);

    let device = stack.devices.get_device("sensor-11").await.unwrap();
    let slot = device.identity_slot.as_ref().unwrap();
    assert_eq!(slot.active_version, 1);
    assert_eq!(
        slot.active_secret().unwrap().serial_number,
        second.serial_number
    );
    // The previous version is intact and retrievable.
    assert_eq!(
        slot.secret_at(0).unwrap().serial_number,
        first.serial_number
    );
}

#[tokio::test]
async fn reenrollment_with_a_foreign_certificate_is_denied() {
    let mut stack = stack().await;
    create_test_ca(&stack, RA_CA_ID, CaType::DmsEnroller).await;
    create_test_ca(&stack, "fleet-ca", CaType::Root).await;
    let (_, dms_cert_pem) =
        approved_dms(&mut stack, "Fleet DMS", &["fleet-ca"], IdentityProfile::default()).await;

    stack
        .devices
        .enroll(
            mtls(&dms_cert_pem),
            &device_csr("sensor-13"),
            "fleet-ca",
            &stack.cancel,
        )
        .await
        .unwrap();

    // Present the DMS certificate instead of the device identity.
    let result = stack
        .devices
        .reenroll(
            mtls(&dms_cert_pem),
            &device_csr("sensor-13"),
            "fleet-ca",
            &stack.cancel,
        )
        .await;
    assert!(matches!(result, Err(VigilError::Forbidden { .. })));
}

#[tokio::test]
async fn server_keygen_returns_a_matching_private_key() {
    let mut stack = stack().await;
    create_test_ca(&stack, RA_CA_ID, CaType::DmsEnroller).await;
    create_test_ca(&stack, "fleet-ca", CaType::Root).await;
    let (_, dms_cert_pem) =
        approved_dms(&mut stack, "Fleet DMS", &["fleet-ca"], IdentityProfile::default()).await;

    let output = stack
        .devices
        .server_keygen(
            mtls(&dms_cert_pem),
            &device_csr("sensor-17"),
            "fleet-ca",
            &stack.cancel,
        )
        .await
        .unwrap();

    // The returned key matches the certified public key.
    let key = KeyPair::from_pkcs8_pem(&output.private_key_pem).unwrap();
    let cert =
        vigil_crypto::x509::verify::parse_certificate_pem(&output.certificate.certificate_pem)
            .unwrap();
    let cert_spki = vigil_crypto::x509::der_encode(
        &cert.tbs_certificate.subject_public_key_info,
    )
    .unwrap();
    assert_eq!(key.public_key_der().unwrap(), cert_spki);

    let device = stack.devices.get_device("sensor-17").await.unwrap();
    assert_eq!(device.status, DeviceStatus::Active);
    assert!(device.identity_slot.is_some());
}

#[tokio::test]
async fn cacerts_returns_the_chain_leaf_first() {
    let stack = stack().await;
    create_test_ca(&stack, "chain-root", CaType::Root).await;
    stack
        .ca
        .create_ca(
            CreateCaInput {
                id: Some("chain-sub".into()),
                ca_type: CaType::Subordinate,
                subject: Subject::with_common_name("chain-sub"),
                key_metadata: KeyMetadata::ecdsa(256),
                ca_duration_secs: 365 * 24 * 3600,
                issuance_duration_secs: 30 * 24 * 3600,
                engine_id: "local-1".into(),
                parent_ca_id: Some("chain-root".into()),
            },
            &stack.cancel,
        )
        .await
        .unwrap();

    let chain = stack.devices.cacerts("chain-sub").await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].subject.common_name, "chain-sub");
    assert_eq!(chain[1].subject.common_name, "chain-root");
}

#[tokio::test]
async fn decommissioning_revokes_the_identity() {
    let mut stack = stack().await;
    create_test_ca(&stack, RA_CA_ID, CaType::DmsEnroller).await;
    create_test_ca(&stack, "fleet-ca", CaType::Root).await;
    let (_, dms_cert_pem) =
        approved_dms(&mut stack, "Fleet DMS", &["fleet-ca"], IdentityProfile::default()).await;

    let certificate = stack
        .devices
        .enroll(
            mtls(&dms_cert_pem),
            &device_csr("sensor-19"),
            "fleet-ca",
            &stack.cancel,
        )
        .await
        .unwrap();

    let device = stack
        .devices
        .decommission_device("sensor-19", &stack.cancel)
        .await
        .unwrap();
    assert_eq!(device.status, DeviceStatus::Decommissioned);

    let revoked = stack
        .certificates
        .get_by_serial(&certificate.serial_number)
        .await
        .unwrap();
    assert_eq!(
        revoked.status,
        vigil_core::models::certificate::CertificateStatus::Revoked
    );
}
