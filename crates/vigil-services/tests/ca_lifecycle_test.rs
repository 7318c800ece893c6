//! CA lifecycle integration tests: creation, signing limits, rotation,
//! revocation cascade, and CRL contents.

mod common;

use chrono::{Duration, Utc};
use der::{Decode, Encode};
use x509_cert::crl::CertificateList;

use common::{create_test_ca, drain_event_types, stack};
use vigil_core::VigilError;
use vigil_core::models::ca::{CaStatus, CaType};
use vigil_core::models::certificate::CertificateStatus;
use vigil_core::models::key::{KeyMetadata, KeyStrength};
use vigil_core::models::subject::Subject;
use vigil_core::repository::PageRequest;
use vigil_crypto::keypair::{KeyAlgorithm, KeyPair};
use vigil_crypto::x509::csr::generate_csr;
use vigil_crypto::x509::verify::{issued_by, parse_certificate_pem, verify_signature};
use vigil_services::ca::{CreateCaInput, ImportCaInput, RevokeCaInput, SignCertificateInput};

#[tokio::test]
async fn create_root_ca_happy_path() {
    let mut stack = stack().await;

    let ca = stack
        .ca
        .create_ca(
            CreateCaInput {
                id: None,
                ca_type: CaType::Root,
                subject: Subject::with_common_name("TestRoot"),
                key_metadata: KeyMetadata::rsa(2048),
                ca_duration_secs: 5 * 365 * 24 * 3600,
                issuance_duration_secs: 365 * 24 * 3600,
                engine_id: "local-1".into(),
                parent_ca_id: None,
            },
            &stack.cancel,
        )
        .await
        .unwrap();

    assert_eq!(ca.id, "TestRoot");
    assert_eq!(ca.status, CaStatus::Active);
    assert_eq!(ca.key_metadata.strength, KeyStrength::Medium);

    // The CA certificate is self-signed with matching subject and issuer.
    let cert = parse_certificate_pem(&ca.certificate.certificate_pem).unwrap();
    issued_by(&cert, &cert).unwrap();
    let subject = vigil_crypto::x509::name_to_subject(&cert.tbs_certificate.subject);
    assert_eq!(subject.common_name, "TestRoot");

    let events = drain_event_types(&mut stack);
    assert!(events.contains(&"ca.create".to_string()));
}

#[tokio::test]
async fn signed_certificates_respect_the_issuance_clamp() {
    let stack = stack().await;
    create_test_ca(&stack, "clamped", CaType::Root).await;

    let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
    let csr = generate_csr(&Subject::with_common_name("leaf-1"), &key, &[]).unwrap();

    // Ask for far more than the CA issuance policy allows.
    let certificate = stack
        .ca
        .sign_certificate(
            SignCertificateInput {
                ca_id: "clamped".into(),
                csr_pem: csr,
                subject: None,
                sign_verbatim: true,
                requested_duration_secs: Some(10 * 365 * 24 * 3600),
            },
            &stack.cancel,
        )
        .await
        .unwrap();

    let ca = stack.ca.get_ca("clamped").await.unwrap();
    let issuance_cap = Utc::now() + ca.issuance_duration();
    assert!(certificate.not_after <= issuance_cap + Duration::seconds(5));
    assert!(certificate.not_after <= ca.not_after);
    assert_eq!(certificate.issuing_ca_id, "clamped");
}

#[tokio::test]
async fn serials_are_unique_and_resolve_to_their_ca() {
    let stack = stack().await;
    create_test_ca(&stack, "uniq", CaType::Root).await;

    let mut serials = Vec::new();
    for i in 0..5 {
        let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let csr = generate_csr(&Subject::with_common_name(format!("leaf-{i}")), &key, &[]).unwrap();
        let cert = stack
            .ca
            .sign_certificate(
                SignCertificateInput {
                    ca_id: "uniq".into(),
                    csr_pem: csr,
                    subject: None,
                    sign_verbatim: true,
                    requested_duration_secs: None,
                },
                &stack.cancel,
            )
            .await
            .unwrap();
        // Every issuing CA id resolves to a persisted CA.
        stack.ca.get_ca(&cert.issuing_ca_id).await.unwrap();
        serials.push(cert.serial_number);
    }
    serials.sort();
    serials.dedup();
    assert_eq!(serials.len(), 5, "serials must be unique");
}

#[tokio::test]
async fn rotation_replaces_the_signer_and_keeps_the_old_ca() {
    let stack = stack().await;
    create_test_ca(&stack, "rotating", CaType::Root).await;

    let new_ca = stack.ca.rotate_ca("rotating", &stack.cancel).await.unwrap();
    assert_ne!(new_ca.id, "rotating");
    assert_eq!(new_ca.subject.common_name, "rotating");
    assert_eq!(new_ca.status, CaStatus::Active);

    let old_ca = stack.ca.get_ca("rotating").await.unwrap();
    assert_eq!(old_ca.status, CaStatus::Rotated);

    // The rotated CA no longer signs.
    let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
    let csr = generate_csr(&Subject::with_common_name("late-leaf"), &key, &[]).unwrap();
    let result = stack
        .ca
        .sign_certificate(
            SignCertificateInput {
                ca_id: "rotating".into(),
                csr_pem: csr.clone(),
                subject: None,
                sign_verbatim: true,
                requested_duration_secs: None,
            },
            &stack.cancel,
        )
        .await;
    assert!(matches!(result, Err(VigilError::Forbidden { .. })));

    // The replacement does.
    stack
        .ca
        .sign_certificate(
            SignCertificateInput {
                ca_id: new_ca.id.clone(),
                csr_pem: csr,
                subject: None,
                sign_verbatim: true,
                requested_duration_secs: None,
            },
            &stack.cancel,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn revocation_cascades_and_the_crl_lists_every_serial() {
    let mut stack = stack().await;
    create_test_ca(&stack, "CA1", CaType::Root).await;

    let mut serials = Vec::new();
    for i in 0..3 {
        let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let csr = generate_csr(&Subject::with_common_name(format!("dev-{i}")), &key, &[]).unwrap();
        let cert = stack
            .ca
            .sign_certificate(
                SignCertificateInput {
                    ca_id: "CA1".into(),
                    csr_pem: csr,
                    subject: None,
                    sign_verbatim: true,
                    requested_duration_secs: None,
                },
                &stack.cancel,
            )
            .await
            .unwrap();
        serials.push(cert.serial_number);
    }
    drain_event_types(&mut stack);

    let revoked = stack
        .ca
        .revoke_ca(
            RevokeCaInput {
                ca_id: "CA1".into(),
                reason: None,
            },
            &stack.cancel,
        )
        .await
        .unwrap();
    assert_eq!(revoked.status, CaStatus::Revoked);

    // Every issued certificate is revoked before revoke_ca returns.
    for serial in &serials {
        let cert = stack.certificates.get_by_serial(serial).await.unwrap();
        assert_eq!(cert.status, CertificateStatus::Revoked);
        assert_eq!(
            cert.revocation_reason,
            Some(vigil_core::models::certificate::RevocationReason::CaCompromise)
        );
    }

    // One ca.update plus a certificate.update per leaf.
    let events = drain_event_types(&mut stack);
    assert!(events.contains(&"ca.update".to_string()));
    assert_eq!(
        events.iter().filter(|e| *e == "certificate.update").count(),
        3
    );

    // The CRL lists exactly the revoked serials and verifies against the
    // CA public key.
    let crl_der = stack.ca.get_crl("CA1").await.unwrap();
    let crl = CertificateList::from_der(&crl_der).unwrap();
    let listed: Vec<String> = crl
        .tbs_cert_list
        .revoked_certificates
        .as_ref()
        .unwrap()
        .iter()
        .map(|rc| vigil_crypto::x509::format_serial(rc.serial_number.as_bytes()))
        .collect();
    let mut expected = serials.clone();
    expected.sort();
    let mut listed_sorted = listed.clone();
    listed_sorted.sort();
    assert_eq!(listed_sorted, expected);

    let ca = stack.ca.get_ca("CA1").await.unwrap();
    let ca_cert = parse_certificate_pem(&ca.certificate.certificate_pem).unwrap();
    verify_signature(
        &ca_cert.tbs_certificate.subject_public_key_info.to_der().unwrap(),
        &crl.tbs_cert_list.to_der().unwrap(),
        crl.signature.as_bytes().unwrap(),
        &crl.signature_algorithm.oid,
    )
    .unwrap();

    // Revoking twice is an invalid transition.
    let again = stack
        .ca
        .revoke_ca(
            RevokeCaInput {
                ca_id: "CA1".into(),
                reason: None,
            },
            &stack.cancel,
        )
        .await;
    assert!(matches!(again, Err(VigilError::InvalidTransition { .. })));
}

#[tokio::test]
async fn subordinate_cas_are_swept_by_the_parent_revocation() {
    let stack = stack().await;
    create_test_ca(&stack, "parent", CaType::Root).await;

    let sub = stack
        .ca
        .create_ca(
            CreateCaInput {
                id: Some("child".into()),
                ca_type: CaType::Subordinate,
                subject: Subject::with_common_name("child"),
                key_metadata: KeyMetadata::ecdsa(256),
                ca_duration_secs: 365 * 24 * 3600,
                issuance_duration_secs: 30 * 24 * 3600,
                engine_id: "local-1".into(),
                parent_ca_id: Some("parent".into()),
            },
            &stack.cancel,
        )
        .await
        .unwrap();
    assert_eq!(sub.parent_ca_id.as_deref(), Some("parent"));

    // The subordinate's certificate chains to the parent.
    let parent = stack.ca.get_ca("parent").await.unwrap();
    let parent_cert = parse_certificate_pem(&parent.certificate.certificate_pem).unwrap();
    let sub_cert = parse_certificate_pem(&sub.certificate.certificate_pem).unwrap();
    issued_by(&sub_cert, &parent_cert).unwrap();

    stack
        .ca
        .revoke_ca(
            RevokeCaInput {
                ca_id: "parent".into(),
                reason: None,
            },
            &stack.cancel,
        )
        .await
        .unwrap();

    let child = stack.ca.get_ca("child").await.unwrap();
    assert_eq!(child.status, CaStatus::Revoked);
}

#[tokio::test]
async fn pending_issuance_longer_than_ca_duration_is_rejected() {
    let stack = stack().await;
    let result = stack
        .ca
        .create_ca(
            CreateCaInput {
                id: None,
                ca_type: CaType::Root,
                subject: Subject::with_common_name("bad"),
                key_metadata: KeyMetadata::ecdsa(256),
                ca_duration_secs: 3600,
                issuance_duration_secs: 7200,
                engine_id: "local-1".into(),
                parent_ca_id: None,
            },
            &stack.cancel,
        )
        .await;
    assert!(matches!(result, Err(VigilError::Validation { .. })));
}

#[tokio::test]
async fn imported_external_cas_never_sign() {
    let stack = stack().await;
    create_test_ca(&stack, "donor", CaType::Root).await;
    let donor = stack.ca.get_ca("donor").await.unwrap();

    // Import the certificate alone: the CA is tracked for verification
    // but has no managed key.
    let imported = stack
        .ca
        .import_ca(
            ImportCaInput {
                id: Some("offsite".into()),
                certificate_pem: donor.certificate.certificate_pem.clone(),
                private_key_pem: None,
                engine_id: None,
                issuance_duration_secs: 3600,
            },
            &stack.cancel,
        )
        .await
        .unwrap();
    assert_eq!(imported.ca_type, CaType::External);
    assert_eq!(imported.subject.common_name, "donor");
    assert_eq!(imported.serial_number, donor.serial_number);

    let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
    let csr = generate_csr(&Subject::with_common_name("orphan"), &key, &[]).unwrap();
    let result = stack
        .ca
        .sign_certificate(
            SignCertificateInput {
                ca_id: "offsite".into(),
                csr_pem: csr,
                subject: None,
                sign_verbatim: true,
                requested_duration_secs: None,
            },
            &stack.cancel,
        )
        .await;
    assert!(matches!(result, Err(VigilError::Forbidden { .. })));

    // No managed key means no CRL either.
    assert!(stack.ca.get_crl("offsite").await.is_err());
}

#[tokio::test]
async fn listing_cas_pages_with_bookmarks() {
    let stack = stack().await;
    for i in 0..4 {
        create_test_ca(&stack, &format!("page-{i}"), CaType::Root).await;
    }

    let first = stack.ca.list_cas(PageRequest::first(3)).await.unwrap();
    assert_eq!(first.items.len(), 3);
    let second = stack
        .ca
        .list_cas(PageRequest {
            bookmark: first.next_bookmark.clone(),
            page_size: 3,
        })
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
}
