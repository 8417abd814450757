//! Attestation certificate helpers
//!
//! Shared parsing for `x5c` arrays and the X.509 extension lookups the
//! certificate-based formats need. `OpenSSL` handles keys and signatures;
//! `x509-parser` is used to read extensions and subject attributes.

use ciborium::value::Value;
use openssl::pkey::{PKey, Public};
use openssl::x509::X509;
use uuid::Uuid;
use x509_parser::prelude::{
    FromDer, GeneralName, ParsedExtension, X509Certificate, X509Extension, X509Version,
};

use crate::webauthn::cbor::{map_get, value_as_i64, CborMap};
use crate::webauthn::crypto::{der_to_pem, openssl_error};
use crate::webauthn::WebAuthnError;

/// FIDO `id-fido-gen-ce-aaguid` extension
pub const OID_FIDO_GEN_CE_AAGUID: &str = "1.3.6.1.4.1.45724.1.1.4";

fn invalid(message: impl Into<String>) -> WebAuthnError {
    WebAuthnError::InvalidAttestationStatement(message.into())
}

/// Read the `x5c` member: a non-empty array of DER certificates, leaf first
///
/// # Errors
/// Returns `InvalidAttestationStatement` when the member is missing, empty,
/// not an array of byte strings, or contains something that is not a
/// certificate
pub fn x5c_certificates(att_stmt: &CborMap) -> Result<Vec<Vec<u8>>, WebAuthnError> {
    let entries = map_get(att_stmt, "x5c")
        .ok_or_else(|| invalid("Missing x5c"))?
        .as_array()
        .ok_or_else(|| invalid("x5c must be an array"))?;

    if entries.is_empty() {
        return Err(invalid("x5c must not be empty"));
    }

    entries
        .iter()
        .map(|entry| {
            let der = entry
                .as_bytes()
                .ok_or_else(|| invalid("x5c entries must be byte strings"))?;
            X509::from_der(der).map_err(|_| invalid("x5c entry is not a certificate"))?;
            Ok(der.clone())
        })
        .collect()
}

/// Read the `sig` member
///
/// # Errors
/// Returns `InvalidAttestationStatement` when missing or not a byte string
pub fn signature(att_stmt: &CborMap) -> Result<Vec<u8>, WebAuthnError> {
    map_get(att_stmt, "sig")
        .and_then(Value::as_bytes)
        .cloned()
        .ok_or_else(|| invalid("Missing or invalid sig"))
}

/// Read the `alg` member
///
/// # Errors
/// Returns `InvalidAttestationStatement` when missing or not an integer
pub fn algorithm(att_stmt: &CborMap) -> Result<i64, WebAuthnError> {
    map_get(att_stmt, "alg")
        .and_then(value_as_i64)
        .ok_or_else(|| invalid("Missing or invalid alg"))
}

/// Convert a DER chain into PEM strings, preserving order
///
/// # Errors
/// Returns `InvalidAttestationStatement` if an entry is not a certificate
pub fn chain_to_pem(chain: &[Vec<u8>]) -> Result<Vec<String>, WebAuthnError> {
    chain.iter().map(|der| der_to_pem(der)).collect()
}

/// Public key of a DER certificate
///
/// # Errors
/// Returns `InvalidAttestationStatement` if the certificate cannot be read
pub fn public_key(der: &[u8]) -> Result<PKey<Public>, WebAuthnError> {
    let cert = X509::from_der(der).map_err(|_| invalid("Invalid certificate"))?;
    cert.public_key()
        .map_err(openssl_error("certificate public key"))
}

/// Parse a DER certificate for extension inspection
///
/// # Errors
/// Returns `InvalidAttestationStatement` if the DER is not a certificate
pub fn parse(der: &[u8]) -> Result<X509Certificate<'_>, WebAuthnError> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|_| invalid("Unable to parse certificate"))
}

/// Find an extension by dotted OID
#[must_use]
pub fn find_extension<'a>(
    cert: &'a X509Certificate<'a>,
    oid: &str,
) -> Option<&'a X509Extension<'a>> {
    cert.extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == oid)
}

/// AAGUID carried in the FIDO certificate extension
///
/// # Errors
/// Returns `InvalidAttestationStatement` if the extension is critical or its
/// value is not an OCTET STRING holding 16 bytes
pub fn aaguid_extension(cert: &X509Certificate<'_>) -> Result<Option<Uuid>, WebAuthnError> {
    let Some(ext) = find_extension(cert, OID_FIDO_GEN_CE_AAGUID) else {
        return Ok(None);
    };
    if ext.critical {
        return Err(invalid("AAGUID extension must not be critical"));
    }

    let (_, object) =
        der_parser::parse_der(ext.value).map_err(|_| invalid("Invalid AAGUID extension"))?;
    let bytes = object
        .as_slice()
        .map_err(|_| invalid("AAGUID extension is not an OCTET STRING"))?;
    Uuid::from_slice(bytes)
        .map(Some)
        .map_err(|_| invalid("AAGUID extension must hold 16 bytes"))
}

/// Whether basic constraints mark the certificate as a CA
#[must_use]
pub fn is_ca(cert: &X509Certificate<'_>) -> bool {
    cert.extensions()
        .iter()
        .any(|ext| matches!(ext.parsed_extension(), ParsedExtension::BasicConstraints(bc) if bc.ca))
}

/// Whether the certificate is X.509 version 3
#[must_use]
pub fn is_v3(cert: &X509Certificate<'_>) -> bool {
    cert.version() == X509Version::V3
}

/// Whether the certificate has a DNS subject alternative name equal to `host`,
/// or a subject common name equal to it when no SAN is present
#[must_use]
pub fn is_issued_to(cert: &X509Certificate<'_>, host: &str) -> bool {
    let mut saw_san = false;
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            saw_san = true;
            if san
                .general_names
                .iter()
                .any(|name| matches!(name, GeneralName::DNSName(dns) if *dns == host))
            {
                return true;
            }
        }
    }
    !saw_san
        && cert
            .subject()
            .iter_common_name()
            .any(|cn| cn.as_str().is_ok_and(|value| value == host))
}

/// Build the trust path PEM chain for a DER `x5c`
///
/// # Errors
/// Returns `InvalidAttestationStatement` if an entry is not a certificate
pub fn trust_path(chain: &[Vec<u8>]) -> Result<super::TrustPath, WebAuthnError> {
    Ok(super::TrustPath::CertificateChain(chain_to_pem(chain)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::cbor::int;

    #[test]
    fn test_x5c_structure_checks() {
        let missing: CborMap = vec![];
        assert!(matches!(
            x5c_certificates(&missing),
            Err(WebAuthnError::InvalidAttestationStatement(_))
        ));

        let empty: CborMap = vec![(Value::Text("x5c".to_string()), Value::Array(vec![]))];
        assert!(matches!(
            x5c_certificates(&empty),
            Err(WebAuthnError::InvalidAttestationStatement(_))
        ));

        let garbage: CborMap = vec![(
            Value::Text("x5c".to_string()),
            Value::Array(vec![Value::Bytes(b"FOO".to_vec())]),
        )];
        assert!(matches!(
            x5c_certificates(&garbage),
            Err(WebAuthnError::InvalidAttestationStatement(_))
        ));
    }

    #[test]
    fn test_sig_and_alg_members() {
        let stmt: CborMap = vec![
            (Value::Text("alg".to_string()), int(-7)),
            (Value::Text("sig".to_string()), Value::Bytes(vec![1, 2, 3])),
        ];
        assert_eq!(algorithm(&stmt).unwrap(), -7);
        assert_eq!(signature(&stmt).unwrap(), vec![1, 2, 3]);

        let wrong: CborMap = vec![(Value::Text("alg".to_string()), Value::Text("ES256".to_string()))];
        assert!(algorithm(&wrong).is_err());
        assert!(signature(&wrong).is_err());
    }
}
