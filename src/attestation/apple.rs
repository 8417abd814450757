//! `apple` anonymous attestation
//!
//! The leaf certificate of `x5c` is issued per credential. It certifies the
//! credential key and carries a nonce extension holding
//! `SHA-256(authenticatorData || clientDataHash)`.

use der_parser::ber::BerObjectContent;
use log::debug;

use super::certificate;
use super::{
    AttestationFormat, AttestationStatement, AttestationStatementVerifier, AttestationType,
};
use crate::cose::CoseKey;
use crate::webauthn::authenticator_data::AuthenticatorData;
use crate::webauthn::cbor::AttestationObject;
use crate::webauthn::crypto::{constant_time_eq, sha256_concat};
use crate::webauthn::WebAuthnError;

/// Apple anonymous attestation nonce extension
pub const OID_APPLE_NONCE: &str = "1.2.840.113635.100.8.2";

fn invalid(message: &str) -> WebAuthnError {
    WebAuthnError::InvalidAttestationStatement(message.to_string())
}

/// Extract the nonce from `SEQUENCE { [1] EXPLICIT OCTET STRING }`
///
/// # Errors
/// Returns `InvalidAttestationStatement` if the extension has another shape
pub fn parse_nonce_extension(value: &[u8]) -> Result<Vec<u8>, WebAuthnError> {
    let (_, object) = der_parser::parse_der(value).map_err(|_| invalid("Invalid nonce DER"))?;
    let items = object
        .as_sequence()
        .map_err(|_| invalid("Nonce extension is not a sequence"))?;

    let tagged = items
        .iter()
        .find(|item| item.header.tag().0 == 1)
        .ok_or_else(|| invalid("Nonce extension lacks the [1] member"))?;
    let BerObjectContent::Unknown(any) = &tagged.content else {
        return Err(invalid("Nonce member is not context-specific"));
    };
    let (_, inner) = der_parser::parse_der(any.data).map_err(|_| invalid("Invalid nonce value"))?;
    Ok(inner
        .as_slice()
        .map_err(|_| invalid("Nonce is not an OCTET STRING"))?
        .to_vec())
}

/// `apple` verifier
#[derive(Debug, Default, Clone, Copy)]
pub struct AppleAttestation;

impl AttestationStatementVerifier for AppleAttestation {
    fn name(&self) -> &'static str {
        AttestationFormat::Apple.as_str()
    }

    fn load(&self, attestation: &AttestationObject) -> Result<AttestationStatement, WebAuthnError> {
        let chain = certificate::x5c_certificates(&attestation.att_stmt)?;

        Ok(AttestationStatement {
            format: AttestationFormat::Apple,
            att_stmt: attestation.att_stmt.clone(),
            attestation_type: AttestationType::AnonCa,
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
        let chain = certificate::x5c_certificates(&statement.att_stmt)?;
        let leaf_der = &chain[0];
        let leaf = certificate::parse(leaf_der)?;

        // 1. Nonce binds authenticator data and client data
        let extension = certificate::find_extension(&leaf, OID_APPLE_NONCE)
            .ok_or_else(|| invalid("Missing Apple nonce extension"))?;
        let nonce = parse_nonce_extension(extension.value)?;
        let expected = sha256_concat(auth_data.raw(), client_data_hash);
        if !constant_time_eq(&nonce, &expected) {
            debug!("❌ apple nonce does not match attestation data hash");
            return Ok(false);
        }

        // 2. The certificate certifies the credential key
        let cert_key = certificate::public_key(leaf_der)?;
        let leaf_key = CoseKey::from_public_pkey(&cert_key, None)?;
        if !leaf_key.same_public_key(&attested.credential_public_key) {
            debug!("❌ apple certificate key differs from credential key");
            return Ok(false);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nonce_extension() {
        let mut der = vec![0x30, 0x24, 0xa1, 0x22, 0x04, 0x20];
        der.extend_from_slice(&[0x5a; 32]);
        assert_eq!(parse_nonce_extension(&der).unwrap(), vec![0x5a; 32]);
    }

    #[test]
    fn test_nonce_extension_without_tagged_member() {
        let der = [0x30, 0x03, 0x02, 0x01, 0x01];
        assert!(matches!(
            parse_nonce_extension(&der),
            Err(WebAuthnError::InvalidAttestationStatement(_))
        ));
    }
}
