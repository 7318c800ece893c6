//! Expiration-monitor integration tests: expiry and near-expiry
//! transitions, idempotence, and revocation precedence.

mod common;

use chrono::{Duration, Utc};

use common::{drain_event_types, stack};
use vigil_core::models::certificate::{
    Certificate, CertificateKind, CertificateStatus, RevocationReason,
};
use vigil_core::models::key::KeyMetadata;
use vigil_core::models::subject::Subject;
use vigil_core::repository::CertificateRepository;

fn seeded_certificate(serial: &str, expires_in: Duration) -> Certificate {
    let now = Utc::now();
    Certificate {
        serial_number: serial.into(),
        issuing_ca_id: "monitor-ca".into(),
        subject: Subject::with_common_name(format!("mon-{serial}")),
        key_metadata: KeyMetadata::ecdsa(256).with_strength(),
        not_before: now - Duration::days(30),
        not_after: now + expires_in,
        status: CertificateStatus::Active,
        revocation_reason: None,
        revocation_timestamp: None,
        certificate_pem: "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n".into(),
        fingerprint: format!("FP:{serial}"),
        kind: CertificateKind::EndEntity,
        created_at: now,
        updated_at: now,
        revision: 0,
    }
}

#[tokio::test]
async fn expired_certificates_transition_and_emit_events() {
    let mut stack = stack().await;

    stack
        .cert_repo
        .insert(&seeded_certificate("ee:01", Duration::seconds(-1)))
        .await
        .unwrap();
    drain_event_types(&mut stack);

    let transitions = stack.monitor.tick(Utc::now(), &stack.cancel).await.unwrap();
    assert_eq!(transitions, 1);

    let cert = stack.certificates.get_by_serial("ee:01").await.unwrap();
    assert_eq!(cert.status, CertificateStatus::Expired);

    let events = drain_event_types(&mut stack);
    assert!(events.contains(&"certificate.update".to_string()));
}

#[tokio::test]
async fn near_expiry_certificates_are_flagged() {
    let stack = stack().await;

    // Inside the default 7-day preventive window, but not expired.
    stack
        .cert_repo
        .insert(&seeded_certificate("ne:01", Duration::days(3)))
        .await
        .unwrap();
    // Far from expiry: untouched.
    stack
        .cert_repo
        .insert(&seeded_certificate("ok:01", Duration::days(90)))
        .await
        .unwrap();

    stack.monitor.tick(Utc::now(), &stack.cancel).await.unwrap();

    assert_eq!(
        stack
            .certificates
            .get_by_serial("ne:01")
            .await
            .unwrap()
            .status,
        CertificateStatus::NearExpiry
    );
    assert_eq!(
        stack
            .certificates
            .get_by_serial("ok:01")
            .await
            .unwrap()
            .status,
        CertificateStatus::Active
    );
}

#[tokio::test]
async fn monitor_is_idempotent_on_a_frozen_clock() {
    let stack = stack().await;

    stack
        .cert_repo
        .insert(&seeded_certificate("id:01", Duration::seconds(-10)))
        .await
        .unwrap();
    stack
        .cert_repo
        .insert(&seeded_certificate("id:02", Duration::days(2)))
        .await
        .unwrap();

    let clock = Utc::now();
    let first = stack.monitor.tick(clock, &stack.cancel).await.unwrap();
    assert_eq!(first, 2);

    // Same clock, second pass: nothing left to do.
    let second = stack.monitor.tick(clock, &stack.cancel).await.unwrap();
    assert_eq!(second, 0);
}

#[tokio::test]
async fn revocation_outranks_monitor_transitions() {
    let stack = stack().await;

    stack
        .cert_repo
        .insert(&seeded_certificate("rv:01", Duration::seconds(-1)))
        .await
        .unwrap();

    // An external revoke lands before the monitor tick.
    stack
        .certificates
        .update_status(
            "rv:01",
            CertificateStatus::Revoked,
            Some(RevocationReason::KeyCompromise),
            &stack.cancel,
        )
        .await
        .unwrap();

    stack.monitor.tick(Utc::now(), &stack.cancel).await.unwrap();

    let cert = stack.certificates.get_by_serial("rv:01").await.unwrap();
    assert_eq!(
        cert.status,
        CertificateStatus::Revoked,
        "REVOKED wins over the computed EXPIRED status"
    );
    assert_eq!(cert.revocation_reason, Some(RevocationReason::KeyCompromise));
}

#[tokio::test]
async fn lapsed_cas_are_marked_expired() {
    use vigil_core::models::ca::{CaStatus, CaType};
    use vigil_core::models::key::KeyMetadata as CaKeyMetadata;
    use vigil_services::ca::CreateCaInput;

    let stack = stack().await;
    stack
        .ca
        .create_ca(
            CreateCaInput {
                id: Some("short-lived".into()),
                ca_type: CaType::Root,
                subject: Subject::with_common_name("short-lived"),
                key_metadata: CaKeyMetadata::ecdsa(256),
                ca_duration_secs: 1,
                issuance_duration_secs: 1,
                engine_id: "local-1".into(),
                parent_ca_id: None,
            },
            &stack.cancel,
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    stack.monitor.tick(Utc::now(), &stack.cancel).await.unwrap();

    let ca = stack.ca.get_ca("short-lived").await.unwrap();
    assert_eq!(ca.status, CaStatus::Expired);

    // A second tick has nothing left to change.
    let again = stack.monitor.tick(Utc::now(), &stack.cancel).await.unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn monitor_pages_through_large_collections() {
    let stack = stack().await;

    // Three pages at the default page size of 50.
    for i in 0..120 {
        stack
            .cert_repo
            .insert(&seeded_certificate(
                &format!("pg:{i:03}"),
                Duration::seconds(-1),
            ))
            .await
            .unwrap();
    }

    let transitions = stack.monitor.tick(Utc::now(), &stack.cancel).await.unwrap();
    assert_eq!(transitions, 120);
}
