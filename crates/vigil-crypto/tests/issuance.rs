//! End-to-end issuance tests against the local PEM engine: self-signed CA,
//! CSR-driven leaf issuance, chain verification, and CRL round-trip.

use chrono::{Duration, Utc};

use vigil_core::models::certificate::RevocationReason;
use vigil_core::models::subject::Subject;
use vigil_crypto::engine::CryptoEngine;
use vigil_crypto::keypair::{KeyAlgorithm, KeyPair};
use vigil_crypto::local::{LocalPemConfig, LocalPemEngine};
use vigil_crypto::x509::build::{CertificateSpec, IssuerIdentity, issue};
use vigil_crypto::x509::crl::{CrlEntry, build_crl};
use vigil_crypto::x509::csr::{generate_csr, parse_csr_pem};
use vigil_crypto::x509::verify::{issued_by, parse_certificate_der, verify_signature};
use vigil_crypto::x509::{format_serial, random_serial};

async fn local_engine() -> CryptoEngine {
    let dir = std::env::temp_dir().join(format!("vigil-crypto-{}", uuid::Uuid::new_v4()));
    CryptoEngine::LocalPem(
        LocalPemEngine::open(LocalPemConfig {
            engine_id: "test-local".into(),
            directory: dir,
        })
        .await
        .unwrap(),
    )
}

fn ca_subject() -> Subject {
    Subject {
        common_name: "Fleet Root CA".into(),
        organization: Some("Vigil Test".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn self_signed_ca_verifies_against_itself() {
    let engine = local_engine().await;
    let signer = engine.create_ecdsa_key(256, "root").await.unwrap();

    let now = Utc::now();
    let serial = random_serial();
    let built = issue(
        &CertificateSpec {
            serial: serial.clone(),
            subject: ca_subject(),
            subject_spki_der: signer.public_key_der().to_vec(),
            not_before: now,
            not_after: now + Duration::days(365 * 5),
            is_ca: true,
            path_len: None,
            san_der: None,
        },
        None,
        &signer,
    )
    .await
    .unwrap();

    let cert = parse_certificate_der(&built.der).unwrap();
    issued_by(&cert, &cert).unwrap();
    assert_eq!(
        cert.tbs_certificate.subject,
        cert.tbs_certificate.issuer,
        "self-signed certificate must be its own issuer"
    );
}

#[tokio::test]
async fn csr_issued_leaf_chains_to_the_ca() {
    let engine = local_engine().await;
    let ca_signer = engine.create_ecdsa_key(256, "issuing").await.unwrap();

    let now = Utc::now();
    let ca_serial = random_serial();
    let ca_cert = issue(
        &CertificateSpec {
            serial: ca_serial.clone(),
            subject: ca_subject(),
            subject_spki_der: ca_signer.public_key_der().to_vec(),
            not_before: now,
            not_after: now + Duration::days(3650),
            is_ca: true,
            path_len: None,
            san_der: None,
        },
        None,
        &ca_signer,
    )
    .await
    .unwrap();

    // Device side: key pair + CSR with a SAN.
    let device_key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
    let csr = generate_csr(
        &Subject::with_common_name("device-7"),
        &device_key,
        &["device-7.fleet.local".into()],
    )
    .unwrap();
    let parsed = parse_csr_pem(&csr).unwrap();

    let leaf = issue(
        &CertificateSpec {
            serial: random_serial(),
            subject: parsed.subject.clone(),
            subject_spki_der: parsed.spki_der.clone(),
            not_before: now,
            not_after: now + Duration::days(90),
            is_ca: false,
            path_len: None,
            san_der: parsed.san_der.clone(),
        },
        Some(IssuerIdentity {
            subject: &ca_subject(),
            serial: &ca_serial,
        }),
        &ca_signer,
    )
    .await
    .unwrap();

    let ca_parsed = parse_certificate_der(&ca_cert.der).unwrap();
    let leaf_parsed = parse_certificate_der(&leaf.der).unwrap();
    issued_by(&leaf_parsed, &ca_parsed).unwrap();

    // A different CA must not validate the leaf.
    let other_signer = engine.create_ecdsa_key(256, "other").await.unwrap();
    let other_ca = issue(
        &CertificateSpec {
            serial: random_serial(),
            subject: Subject::with_common_name("Unrelated CA"),
            subject_spki_der: other_signer.public_key_der().to_vec(),
            not_before: now,
            not_after: now + Duration::days(3650),
            is_ca: true,
            path_len: None,
            san_der: None,
        },
        None,
        &other_signer,
    )
    .await
    .unwrap();
    let other_parsed = parse_certificate_der(&other_ca.der).unwrap();
    assert!(issued_by(&leaf_parsed, &other_parsed).is_err());
}

#[tokio::test]
async fn crl_lists_revoked_serials_and_verifies() {
    use der::{Decode, Encode};
    use x509_cert::crl::CertificateList;

    let engine = local_engine().await;
    let signer = engine.create_ecdsa_key(256, "crl-ca").await.unwrap();

    let now = Utc::now();
    let revoked_serial = random_serial();
    let crl_der = build_crl(
        &[CrlEntry {
            serial: revoked_serial.clone(),
            revocation_time: now,
            reason: RevocationReason::KeyCompromise,
        }],
        &ca_subject(),
        &signer,
        now,
    )
    .await
    .unwrap();

    let crl = CertificateList::from_der(&crl_der).unwrap();
    let entries = crl.tbs_cert_list.revoked_certificates.as_ref().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        format_serial(entries[0].serial_number.as_bytes()),
        format_serial(&revoked_serial)
    );
    assert!(crl.tbs_cert_list.next_update.is_some());

    // The CRL signature must verify against the CA public key.
    verify_signature(
        signer.public_key_der(),
        &crl.tbs_cert_list.to_der().unwrap(),
        crl.signature.as_bytes().unwrap(),
        &crl.signature_algorithm.oid,
    )
    .unwrap();
}
