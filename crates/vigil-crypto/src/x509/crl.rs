//! X.509 v2 CRL assembly, signed through the engine [`Signer`] seam.

use chrono::{DateTime, Duration, Utc};
use der::asn1::{BitString, OctetString, Uint};
use der::Encode;
use x509_cert::certificate::Version;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, CrlNumber, CrlReason};
use x509_cert::serial_number::SerialNumber;

use const_oid::AssociatedOid;

use vigil_core::models::certificate::RevocationReason;
use vigil_core::models::subject::Subject;

use crate::engine::Signer;
use crate::error::{CryptoError, CryptoResult};
use crate::x509::build::key_identifier;
use crate::x509::{subject_to_name, to_x509_time};

/// CRLs are valid for 48 hours from issuance.
const CRL_VALIDITY_HOURS: i64 = 48;

/// One revoked certificate to list.
pub struct CrlEntry {
    pub serial: Vec<u8>,
    pub revocation_time: DateTime<Utc>,
    pub reason: RevocationReason,
}

fn crl_reason(reason: RevocationReason) -> CrlReason {
    match reason {
        RevocationReason::Unspecified => CrlReason::Unspecified,
        RevocationReason::KeyCompromise => CrlReason::KeyCompromise,
        RevocationReason::CaCompromise => CrlReason::CaCompromise,
        RevocationReason::AffiliationChanged => CrlReason::AffiliationChanged,
        RevocationReason::Superseded => CrlReason::Superseded,
        RevocationReason::CessationOfOperation => CrlReason::CessationOfOperation,
        RevocationReason::CertificateHold => CrlReason::CertificateHold,
        RevocationReason::RemoveFromCrl => CrlReason::RemoveFromCRL,
        RevocationReason::PrivilegeWithdrawn => CrlReason::PrivilegeWithdrawn,
        RevocationReason::AaCompromise => CrlReason::AaCompromise,
    }
}

/// Build and sign a CRL listing `entries` under the issuing CA.
///
/// `this_update` is the caller's clock; `next_update` is fixed at 48 hours
/// out, and the CRL number is the issuance instant in milliseconds so
/// numbers are strictly increasing across rebuilds.
pub async fn build_crl(
    entries: &[CrlEntry],
    issuer_subject: &Subject,
    signer: &Signer,
    this_update: DateTime<Utc>,
) -> CryptoResult<Vec<u8>> {
    let hash = signer.algorithm().default_hash();
    let algorithm = crate::x509::build::signature_algorithm(signer.algorithm(), hash)?;

    let revoked = entries
        .iter()
        .map(|entry| {
            Ok(RevokedCert {
                serial_number: SerialNumber::new(&entry.serial)?,
                revocation_date: to_x509_time(entry.revocation_time)?,
                crl_entry_extensions: Some(vec![Extension {
                    extn_id: CrlReason::OID,
                    critical: false,
                    extn_value: OctetString::new(crl_reason(entry.reason).to_der()?)?,
                }]),
            })
        })
        .collect::<CryptoResult<Vec<_>>>()?;

    // Milliseconds since epoch, trimmed to a canonical unsigned INTEGER.
    let crl_number = this_update.timestamp_millis().max(0) as u128;
    let number_bytes = crl_number.to_be_bytes();
    let trimmed: Vec<u8> = number_bytes
        .iter()
        .copied()
        .skip_while(|b| *b == 0)
        .collect();
    let crl_number_ext = CrlNumber(
        Uint::new(if trimmed.is_empty() { &[0] } else { &trimmed })
            .map_err(|e| CryptoError::Encoding(format!("CRL number: {e}")))?,
    );

    let aki = AuthorityKeyIdentifier {
        key_identifier: Some(OctetString::new(key_identifier(signer.public_key_der())?)?),
        authority_cert_issuer: None,
        authority_cert_serial_number: None,
    };

    let tbs = TbsCertList {
        version: Version::V2,
        signature: algorithm.clone(),
        issuer: subject_to_name(issuer_subject)?,
        this_update: to_x509_time(this_update)?,
        next_update: Some(to_x509_time(
            this_update + Duration::hours(CRL_VALIDITY_HOURS),
        )?),
        revoked_certificates: if revoked.is_empty() {
            None
        } else {
            Some(revoked)
        },
        crl_extensions: Some(vec![
            Extension {
                extn_id: CrlNumber::OID,
                critical: false,
                extn_value: OctetString::new(crl_number_ext.to_der()?)?,
            },
            Extension {
                extn_id: AuthorityKeyIdentifier::OID,
                critical: false,
                extn_value: OctetString::new(aki.to_der()?)?,
            },
        ]),
    };

    let tbs_der = tbs.to_der()?;
    let signature = signer.sign(&tbs_der, hash).await?;

    let crl = CertificateList {
        tbs_cert_list: tbs,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&signature)?,
    };

    Ok(crl.to_der()?)
}
