//! `tpm` attestation
//!
//! TPM attestation signs a `TPMS_ATTEST` certify structure (`certInfo`) with
//! an attestation identity key (AIK). The certified object is the credential
//! key, described by a `TPMT_PUBLIC` structure (`pubArea`). Both structures
//! are parsed strictly and cross-checked against the credential key and the
//! authenticator data before the AIK signature is verified.

use log::debug;
use openssl::hash::{hash, MessageDigest};
use x509_parser::prelude::ParsedExtension;

use super::certificate;
use super::{
    AttestationFormat, AttestationStatement, AttestationStatementVerifier, AttestationType,
};
use crate::cose::{CoseAlgorithm, CoseKey, CoseKeyType, EcCurve};
use crate::webauthn::authenticator_data::AuthenticatorData;
use crate::webauthn::cbor::{map_get, map_get_bytes, map_get_text, AttestationObject, CborMap};
use crate::webauthn::crypto::{constant_time_eq, openssl_error};
use crate::webauthn::WebAuthnError;

const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
const TPM_ST_ATTEST_CERTIFY: u16 = 0x8017;

const TPM_ALG_RSA: u16 = 0x0001;
const TPM_ALG_SHA1: u16 = 0x0004;
const TPM_ALG_SHA256: u16 = 0x000b;
const TPM_ALG_SHA384: u16 = 0x000c;
const TPM_ALG_SHA512: u16 = 0x000d;
const TPM_ALG_NULL: u16 = 0x0010;
const TPM_ALG_ECC: u16 = 0x0023;

const TPM_ECC_NIST_P256: u16 = 0x0003;
const TPM_ECC_NIST_P384: u16 = 0x0004;
const TPM_ECC_NIST_P521: u16 = 0x0005;

const RSA_DEFAULT_EXPONENT: u32 = 65537;

/// `tcg-kp-AIKCertificate` extended key usage
pub const OID_TCG_KP_AIK_CERTIFICATE: &str = "2.23.133.8.3";
const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";

fn invalid(message: &str) -> WebAuthnError {
    WebAuthnError::InvalidAttestationStatement(message.to_string())
}

/// Big-endian reader over a TPM structure
struct TpmReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    structure: &'static str,
}

impl<'a> TpmReader<'a> {
    fn new(bytes: &'a [u8], structure: &'static str) -> Self {
        Self {
            bytes,
            pos: 0,
            structure,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WebAuthnError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                WebAuthnError::InvalidAttestationStatement(format!(
                    "{} is truncated",
                    self.structure
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WebAuthnError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WebAuthnError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WebAuthnError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, WebAuthnError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// A `TPM2B` sized buffer
    fn sized(&mut self) -> Result<&'a [u8], WebAuthnError> {
        let len = usize::from(self.u16()?);
        self.take(len)
    }

    fn finish(&self) -> Result<(), WebAuthnError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(WebAuthnError::InvalidAttestationStatement(format!(
                "{} has {} trailing bytes",
                self.structure,
                self.bytes.len() - self.pos
            )))
        }
    }
}

/// Key parameters and unique field of a `TPMT_PUBLIC`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmPublicKey {
    Rsa {
        key_bits: u16,
        exponent: u32,
        modulus: Vec<u8>,
    },
    Ecc {
        curve_id: u16,
        x: Vec<u8>,
        y: Vec<u8>,
    },
}

/// Parsed `TPMT_PUBLIC` (`pubArea`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmPublic {
    pub name_alg: u16,
    pub object_attributes: u32,
    pub auth_policy: Vec<u8>,
    pub key: TpmPublicKey,
}

impl TpmPublic {
    /// Parse a `TPMT_PUBLIC` structure
    ///
    /// # Errors
    /// Returns `InvalidAttestationStatement` for truncated structures,
    /// unsupported key types or trailing bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, WebAuthnError> {
        let mut reader = TpmReader::new(bytes, "pubArea");
        let key_type = reader.u16()?;
        let name_alg = reader.u16()?;
        let object_attributes = reader.u32()?;
        let auth_policy = reader.sized()?.to_vec();

        // Signing keys carry no symmetric definition
        if reader.u16()? != TPM_ALG_NULL {
            return Err(invalid("pubArea symmetric algorithm must be TPM_ALG_NULL"));
        }
        // Scheme, with a hash algorithm detail unless it is null
        if reader.u16()? != TPM_ALG_NULL {
            reader.u16()?;
        }

        let key = match key_type {
            TPM_ALG_RSA => {
                let key_bits = reader.u16()?;
                let exponent = match reader.u32()? {
                    0 => RSA_DEFAULT_EXPONENT,
                    other => other,
                };
                let modulus = reader.sized()?.to_vec();
                TpmPublicKey::Rsa {
                    key_bits,
                    exponent,
                    modulus,
                }
            }
            TPM_ALG_ECC => {
                let curve_id = reader.u16()?;
                if reader.u16()? != TPM_ALG_NULL {
                    reader.u16()?;
                }
                let x = reader.sized()?.to_vec();
                let y = reader.sized()?.to_vec();
                TpmPublicKey::Ecc { curve_id, x, y }
            }
            other => {
                return Err(WebAuthnError::InvalidAttestationStatement(format!(
                    "Unsupported pubArea type {other:#06x}"
                )))
            }
        };

        reader.finish()?;
        Ok(Self {
            name_alg,
            object_attributes,
            auth_policy,
            key,
        })
    }

    /// Whether the TPM key equals the credential public key
    #[must_use]
    pub fn matches(&self, credential_key: &CoseKey) -> bool {
        match (&self.key, &credential_key.key) {
            (
                TpmPublicKey::Rsa {
                    exponent, modulus, ..
                },
                CoseKeyType::Rsa(rsa),
            ) => {
                let e = rsa
                    .e
                    .iter()
                    .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
                *modulus == rsa.n && u64::from(*exponent) == e
            }
            (TpmPublicKey::Ecc { curve_id, x, y }, CoseKeyType::Ec2(ec)) => {
                let curve = match *curve_id {
                    TPM_ECC_NIST_P256 => Some(EcCurve::P256),
                    TPM_ECC_NIST_P384 => Some(EcCurve::P384),
                    TPM_ECC_NIST_P521 => Some(EcCurve::P521),
                    _ => None,
                };
                curve == Some(ec.curve) && *x == ec.x && *y == ec.y
            }
            _ => false,
        }
    }
}

/// Parsed `TPMS_ATTEST` (`certInfo`) of type certify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmAttest {
    pub qualified_signer: Vec<u8>,
    pub extra_data: Vec<u8>,
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: bool,
    pub firmware_version: u64,
    pub attested_name: Vec<u8>,
    pub attested_qualified_name: Vec<u8>,
}

impl TpmAttest {
    /// Parse a `TPMS_ATTEST` structure
    ///
    /// # Errors
    /// Returns `InvalidAttestationStatement` if the magic or type are wrong,
    /// the structure is truncated or bytes remain
    pub fn parse(bytes: &[u8]) -> Result<Self, WebAuthnError> {
        let mut reader = TpmReader::new(bytes, "certInfo");
        if reader.u32()? != TPM_GENERATED_VALUE {
            return Err(invalid("certInfo magic is not TPM_GENERATED_VALUE"));
        }
        if reader.u16()? != TPM_ST_ATTEST_CERTIFY {
            return Err(invalid("certInfo type is not TPM_ST_ATTEST_CERTIFY"));
        }

        let qualified_signer = reader.sized()?.to_vec();
        let extra_data = reader.sized()?.to_vec();
        let clock = reader.u64()?;
        let reset_count = reader.u32()?;
        let restart_count = reader.u32()?;
        let safe = reader.u8()? != 0;
        let firmware_version = reader.u64()?;
        let attested_name = reader.sized()?.to_vec();
        let attested_qualified_name = reader.sized()?.to_vec();
        reader.finish()?;

        Ok(Self {
            qualified_signer,
            extra_data,
            clock,
            reset_count,
            restart_count,
            safe,
            firmware_version,
            attested_name,
            attested_qualified_name,
        })
    }
}

fn name_digest(name_alg: u16) -> Result<MessageDigest, WebAuthnError> {
    match name_alg {
        TPM_ALG_SHA1 => Ok(MessageDigest::sha1()),
        TPM_ALG_SHA256 => Ok(MessageDigest::sha256()),
        TPM_ALG_SHA384 => Ok(MessageDigest::sha384()),
        TPM_ALG_SHA512 => Ok(MessageDigest::sha512()),
        other => Err(WebAuthnError::InvalidAttestationStatement(format!(
            "Unsupported TPM name algorithm {other:#06x}"
        ))),
    }
}

/// `tpm` verifier
#[derive(Debug, Default, Clone, Copy)]
pub struct TpmAttestation;

impl TpmAttestation {
    fn structures(att_stmt: &CborMap) -> Result<(&[u8], &[u8]), WebAuthnError> {
        let cert_info = map_get_bytes(att_stmt, "certInfo").ok_or_else(|| invalid("Missing certInfo"))?;
        let pub_area = map_get_bytes(att_stmt, "pubArea").ok_or_else(|| invalid("Missing pubArea"))?;
        Ok((cert_info, pub_area))
    }
}

impl AttestationStatementVerifier for TpmAttestation {
    fn name(&self) -> &'static str {
        AttestationFormat::Tpm.as_str()
    }

    fn load(&self, attestation: &AttestationObject) -> Result<AttestationStatement, WebAuthnError> {
        let att_stmt = &attestation.att_stmt;
        if map_get_text(att_stmt, "ver") != Some("2.0") {
            return Err(invalid("TPM attestation version must be 2.0"));
        }
        if map_get(att_stmt, "ecdaaKeyId").is_some() {
            return Err(WebAuthnError::UnsupportedFormat(
                "tpm ECDAA attestation".to_string(),
            ));
        }
        certificate::algorithm(att_stmt)?;
        certificate::signature(att_stmt)?;
        let (cert_info, pub_area) = Self::structures(att_stmt)?;
        TpmAttest::parse(cert_info)?;
        TpmPublic::parse(pub_area)?;
        let chain = certificate::x5c_certificates(att_stmt)?;

        Ok(AttestationStatement {
            format: AttestationFormat::Tpm,
            att_stmt: att_stmt.clone(),
            attestation_type: AttestationType::AttCa,
            trust_path: certificate::trust_path(&chain)?,
        })
    }

    fn is_valid(
        &self,
        client_data_hash: &[u8],
        statement: &AttestationStatement,
        auth_data: &AuthenticatorData,
    ) -> Result<bool, WebAuthnError> {
        let attested = auth_data.attested_credential_data.as_ref().ok_or_else(|| {
            WebAuthnError::MalformedAuthenticatorData("Missing attested credential data".to_string())
        })?;
        let att_stmt = &statement.att_stmt;
        let alg = certificate::algorithm(att_stmt)?;
        let sig = certificate::signature(att_stmt)?;
        let (cert_info_bytes, pub_area_bytes) = Self::structures(att_stmt)?;
        let cert_info = TpmAttest::parse(cert_info_bytes)?;
        let pub_area = TpmPublic::parse(pub_area_bytes)?;

        // 1. pubArea describes the credential key
        if !pub_area.matches(&attested.credential_public_key) {
            debug!("❌ TPM pubArea does not match the credential public key");
            return Ok(false);
        }

        // 2. extraData is the hash of authenticatorData || clientDataHash
        let digest = CoseAlgorithm::from_id(alg)?
            .digest()
            .ok_or_else(|| invalid("TPM attestation algorithm must use a digest"))?;
        let mut att_to_be_signed = auth_data.raw().to_vec();
        att_to_be_signed.extend_from_slice(client_data_hash);
        let expected_extra = hash(digest, &att_to_be_signed).map_err(openssl_error("TPM extraData hash"))?;
        if !constant_time_eq(&cert_info.extra_data, &expected_extra) {
            debug!("❌ TPM extraData does not match attestation data hash");
            return Ok(false);
        }

        // 3. The certified name is the name of pubArea
        let mut expected_name = pub_area.name_alg.to_be_bytes().to_vec();
        let name_hash = hash(name_digest(pub_area.name_alg)?, pub_area_bytes)
            .map_err(openssl_error("TPM name hash"))?;
        expected_name.extend_from_slice(&name_hash);
        if cert_info.attested_name != expected_name {
            debug!("❌ TPM certified name does not match pubArea");
            return Ok(false);
        }

        // 4. AIK certificate requirements
        let chain = certificate::x5c_certificates(att_stmt)?;
        let aik_der = &chain[0];
        check_aik_certificate(aik_der, &attested.aaguid)?;

        // 5. AIK signature over certInfo
        let aik_key = certificate::public_key(aik_der)?;
        if !crate::cose::verify_with_pkey(alg, &aik_key, cert_info_bytes, &sig)? {
            debug!("❌ TPM certInfo signature does not verify with AIK");
            return Ok(false);
        }

        Ok(true)
    }
}

fn check_aik_certificate(der: &[u8], aaguid: &uuid::Uuid) -> Result<(), WebAuthnError> {
    let cert = certificate::parse(der)?;

    if !certificate::is_v3(&cert) {
        return Err(invalid("AIK certificate must be version 3"));
    }
    if cert.subject().iter_attributes().next().is_some() {
        return Err(invalid("AIK certificate subject must be empty"));
    }
    if certificate::find_extension(&cert, OID_SUBJECT_ALT_NAME).is_none() {
        return Err(invalid("AIK certificate must have a subject alternative name"));
    }

    let has_aik_usage = cert.extensions().iter().any(|ext| {
        matches!(
            ext.parsed_extension(),
            ParsedExtension::ExtendedKeyUsage(eku)
                if eku.other.iter().any(|oid| oid.to_id_string() == OID_TCG_KP_AIK_CERTIFICATE)
        )
    });
    if !has_aik_usage {
        return Err(invalid("AIK certificate lacks the tcg-kp-AIKCertificate usage"));
    }

    if certificate::is_ca(&cert) {
        return Err(invalid("AIK certificate must not be a CA"));
    }

    if let Some(cert_aaguid) = certificate::aaguid_extension(&cert)? {
        if cert_aaguid != *aaguid {
            return Err(invalid("AIK certificate AAGUID does not match authenticator data"));
        }
    }

    Ok(())
}
