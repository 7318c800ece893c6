//! PKCS#10 certificate signing requests: generation (used by DMS
//! registration and EST server-side key generation) and parsing with
//! self-signature verification (used by every sign path).

use der::asn1::{BitString, Ia5String, SetOfVec};
use der::{Any, Decode, Encode};
use x509_cert::attr::Attribute;
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq, Version};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use const_oid::AssociatedOid;

use vigil_core::models::key::KeyStrengthMetadata;
use vigil_core::models::subject::Subject;

use crate::error::{CryptoError, CryptoResult};
use crate::keypair::KeyPair;
use crate::x509::build::signature_algorithm;
use crate::x509::verify::verify_signature;
use crate::x509::{
    der_to_pem, key_metadata_from_spki, name_to_subject, pem_to_der, subject_to_name,
};

/// The parts of a CSR the control plane acts on.
pub struct ParsedCsr {
    pub subject: Subject,
    pub spki_der: Vec<u8>,
    pub key_metadata: KeyStrengthMetadata,
    /// Raw SubjectAltName extension value from the extensionRequest
    /// attribute, if the requester asked for one.
    pub san_der: Option<Vec<u8>>,
}

/// Generate a PEM-encoded CSR for `subject`, optionally requesting DNS
/// SANs, signed with `key`.
pub fn generate_csr(subject: &Subject, key: &KeyPair, dns_sans: &[String]) -> CryptoResult<String> {
    let spki_der = key.public_key_der()?;

    let mut attributes = SetOfVec::new();
    if !dns_sans.is_empty() {
        let names = dns_sans
            .iter()
            .map(|name| {
                Ia5String::new(name)
                    .map(GeneralName::DnsName)
                    .map_err(|e| CryptoError::InvalidInput(format!("invalid SAN '{name}': {e}")))
            })
            .collect::<CryptoResult<Vec<_>>>()?;
        let san = SubjectAltName(names);
        let ext_req = ExtensionReq(vec![Extension {
            extn_id: SubjectAltName::OID,
            critical: false,
            extn_value: der::asn1::OctetString::new(san.to_der()?)?,
        }]);

        let mut values = SetOfVec::new();
        values.insert(Any::encode_from(&ext_req)?)?;
        attributes.insert(Attribute {
            oid: ExtensionReq::OID,
            values,
        })?;
    }

    let info = CertReqInfo {
        version: Version::V1,
        subject: subject_to_name(subject)?,
        public_key: SubjectPublicKeyInfoOwned::from_der(&spki_der)?,
        attributes,
    };

    let hash = key.algorithm().default_hash();
    let algorithm = signature_algorithm(key.algorithm(), hash)?;
    let info_der = info.to_der()?;
    let signature = key.sign(&info_der, hash)?;

    let request = CertReq {
        info,
        algorithm,
        signature: BitString::from_bytes(&signature)?,
    };

    Ok(der_to_pem(&request.to_der()?, "CERTIFICATE REQUEST"))
}

/// Parse a PEM CSR and verify its self-signature; a CSR whose proof of
/// possession does not check out is rejected outright.
pub fn parse_csr_pem(pem: &str) -> CryptoResult<ParsedCsr> {
    let der = pem_to_der(pem)?;
    let request = CertReq::from_der(&der)
        .map_err(|e| CryptoError::InvalidInput(format!("malformed CSR: {e}")))?;

    let spki_der = request.info.public_key.to_der()?;
    verify_signature(
        &spki_der,
        &request.info.to_der()?,
        request
            .signature
            .as_bytes()
            .ok_or_else(|| CryptoError::InvalidInput("CSR signature has unused bits".into()))?,
        &request.algorithm.oid,
    )
    .map_err(|_| CryptoError::InvalidInput("CSR self-signature does not verify".into()))?;

    let san_der = requested_san(&request)?;
    let subject = name_to_subject(&request.info.subject);
    if subject.common_name.is_empty() {
        return Err(CryptoError::InvalidInput(
            "CSR subject has no common name".into(),
        ));
    }

    Ok(ParsedCsr {
        subject,
        key_metadata: key_metadata_from_spki(&spki_der)?,
        spki_der,
        san_der,
    })
}

/// Pull the SubjectAltName extension out of the CSR's extensionRequest
/// attribute, if present.
fn requested_san(request: &CertReq) -> CryptoResult<Option<Vec<u8>>> {
    for attribute in request.info.attributes.iter() {
        if attribute.oid != ExtensionReq::OID {
            continue;
        }
        let Some(value) = attribute.values.iter().next() else {
            continue;
        };
        let ext_req: ExtensionReq = value
            .decode_as()
            .map_err(|e| CryptoError::InvalidInput(format!("malformed extensionRequest: {e}")))?;
        for ext in ext_req.0 {
            if ext.extn_id == SubjectAltName::OID {
                return Ok(Some(ext.extn_value.as_bytes().to_vec()));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyAlgorithm;

    #[test]
    fn csr_round_trips_subject_and_sans() {
        let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let subject = Subject {
            common_name: "sensor-0042".into(),
            organization: Some("Acme Fleet".into()),
            ..Default::default()
        };

        let pem = generate_csr(&subject, &key, &["sensor-0042.fleet.local".into()]).unwrap();
        let parsed = parse_csr_pem(&pem).unwrap();

        assert_eq!(parsed.subject.common_name, "sensor-0042");
        assert_eq!(parsed.subject.organization.as_deref(), Some("Acme Fleet"));
        assert!(parsed.san_der.is_some());
        assert_eq!(parsed.spki_der, key.public_key_der().unwrap());
    }

    #[test]
    fn tampered_csr_is_rejected() {
        let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let other = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let subject = Subject::with_common_name("victim");

        let pem = generate_csr(&subject, &key, &[]).unwrap();
        // Rebuild the CSR with a swapped public key but the old signature.
        let der = pem_to_der(&pem).unwrap();
        let mut request = CertReq::from_der(&der).unwrap();
        request.info.public_key =
            SubjectPublicKeyInfoOwned::from_der(&other.public_key_der().unwrap()).unwrap();
        let tampered = der_to_pem(&request.to_der().unwrap(), "CERTIFICATE REQUEST");

        assert!(parse_csr_pem(&tampered).is_err());
    }
}
