//! Key material for signing requests
//!
//! Generates the EC P-256 private key held while a request is outstanding,
//! encodes the PKCS#10 request for the configured subject, and checks that
//! an issued certificate was signed for the held key.

use rcgen::{KeyPair, PublicKeyData, SigningKey, PKCS_ECDSA_P256_SHA256};
use tracing::debug;
use x509_parser::pem::parse_x509_pem;
use yasna::models::ObjectIdentifier;
use yasna::{DERWriter, Tag};

use crate::models::Subject;
use crate::utils::error::{RotationError, RotationResult};

/// Generate a new EC P-256 private key as PKCS#8 PEM
pub fn generate_private_key_pem() -> RotationResult<Vec<u8>> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| RotationError::KeyGeneration(e.to_string()))?;
    Ok(key_pair.serialize_pem().into_bytes())
}

/// Build a PEM encoded certificate signing request for `subject`
///
/// The subject carries one RDN per attribute, so an identity may belong to
/// any number of organizations. The DNS names go into a subjectAltName
/// extension request.
pub fn build_csr(
    private_key_pem: &[u8],
    subject: &Subject,
    dns_names: &[String],
) -> RotationResult<Vec<u8>> {
    let key_pair = parse_private_key(private_key_pem)?;
    if key_pair.algorithm() != &PKCS_ECDSA_P256_SHA256 {
        return Err(RotationError::Csr(format!(
            "unsupported key algorithm {:?}",
            key_pair.algorithm()
        )));
    }

    let info = certification_request_info(&key_pair, subject, dns_names);
    let signature = key_pair
        .sign(&info)
        .map_err(|e| RotationError::Csr(e.to_string()))?;

    let der = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_der(&info);
            writer.next().write_sequence(|writer| {
                writer.next().write_oid(&oid(OID_ECDSA_WITH_SHA256));
            });
            writer
                .next()
                .write_bitvec_bytes(&signature, signature.len() * 8);
        })
    });

    Ok(pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", der)).into_bytes())
}

const OID_COMMON_NAME: &[u64] = &[2, 5, 4, 3];
const OID_ORGANIZATION_NAME: &[u64] = &[2, 5, 4, 10];
const OID_SUBJECT_ALT_NAME: &[u64] = &[2, 5, 29, 17];
const OID_EXTENSION_REQUEST: &[u64] = &[1, 2, 840, 113549, 1, 9, 14];
const OID_ECDSA_WITH_SHA256: &[u64] = &[1, 2, 840, 10045, 4, 3, 2];

fn oid(arcs: &[u64]) -> ObjectIdentifier {
    ObjectIdentifier::from_slice(arcs)
}

/// DER of the PKCS#10 CertificationRequestInfo
fn certification_request_info(
    key_pair: &KeyPair,
    subject: &Subject,
    dns_names: &[String],
) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_u8(0);
            writer.next().write_sequence(|writer| {
                write_rdn(writer.next(), OID_COMMON_NAME, &subject.common_name);
                for organization in &subject.organizations {
                    write_rdn(writer.next(), OID_ORGANIZATION_NAME, organization);
                }
            });
            writer.next().write_der(&key_pair.subject_public_key_info());
            writer
                .next()
                .write_tagged_implicit(Tag::context(0), |writer| {
                    writer.write_set_of(|writer| {
                        if !dns_names.is_empty() {
                            write_san_request(writer.next(), dns_names);
                        }
                    })
                });
        })
    })
}

fn write_rdn(writer: DERWriter, attribute: &[u64], value: &str) {
    writer.write_set(|writer| {
        writer.next().write_sequence(|writer| {
            writer.next().write_oid(&oid(attribute));
            writer.next().write_utf8_string(value);
        })
    })
}

fn write_san_request(writer: DERWriter, dns_names: &[String]) {
    let general_names = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            for name in dns_names {
                writer
                    .next()
                    .write_tagged_implicit(Tag::context(2), |writer| writer.write_ia5_string(name));
            }
        })
    });

    writer.write_sequence(|writer| {
        writer.next().write_oid(&oid(OID_EXTENSION_REQUEST));
        writer.next().write_set(|writer| {
            writer.next().write_sequence(|writer| {
                writer.next().write_sequence(|writer| {
                    writer.next().write_oid(&oid(OID_SUBJECT_ALT_NAME));
                    writer.next().write_bytes(&general_names);
                })
            })
        })
    })
}

/// Whether the leaf certificate in `certificate_pem` carries the public key of
/// `private_key_pem`. Any parse failure counts as a mismatch.
pub fn certificate_matches_key(certificate_pem: &[u8], private_key_pem: &[u8]) -> bool {
    let key_pair = match parse_private_key(private_key_pem) {
        Ok(key_pair) => key_pair,
        Err(e) => {
            debug!("Held private key is unusable: {}", e);
            return false;
        }
    };

    let pem = match parse_x509_pem(certificate_pem) {
        Ok((_, pem)) => pem,
        Err(e) => {
            debug!("Issued certificate is not PEM: {}", e);
            return false;
        }
    };
    let cert = match pem.parse_x509() {
        Ok(cert) => cert,
        Err(e) => {
            debug!("Issued certificate cannot be parsed: {}", e);
            return false;
        }
    };

    cert.public_key().subject_public_key.data.as_ref() == key_pair.public_key_raw()
}

fn parse_private_key(private_key_pem: &[u8]) -> RotationResult<KeyPair> {
    let pem = std::str::from_utf8(private_key_pem)
        .map_err(|e| RotationError::KeyGeneration(e.to_string()))?;
    KeyPair::from_pem(pem).map_err(|e| RotationError::KeyGeneration(e.to_string()))
}
