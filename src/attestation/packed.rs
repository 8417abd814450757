//! `packed` attestation
//!
//! The `WebAuthn`-optimized format. With `x5c` the signature over
//! `authenticatorData || clientDataHash` is made by an attestation
//! certificate (basic attestation); without it the credential key signs
//! for itself (self attestation).

use log::debug;

use super::certificate;
use super::{
    AttestationFormat, AttestationStatement, AttestationStatementVerifier, AttestationType,
    TrustPath,
};
use crate::webauthn::authenticator_data::AuthenticatorData;
use crate::webauthn::cbor::{map_get, AttestationObject};
use crate::webauthn::WebAuthnError;

const ATTESTATION_OU: &str = "Authenticator Attestation";

#[derive(Debug, Default, Clone, Copy)]
pub struct PackedAttestation;

impl AttestationStatementVerifier for PackedAttestation {
    fn name(&self) -> &'static str {
        AttestationFormat::Packed.as_str()
    }

    fn load(&self, attestation: &AttestationObject) -> Result<AttestationStatement, WebAuthnError> {
        let att_stmt = &attestation.att_stmt;
        certificate::algorithm(att_stmt)?;
        certificate::signature(att_stmt)?;

        if map_get(att_stmt, "ecdaaKeyId").is_some() {
            return Err(WebAuthnError::UnsupportedFormat(
                "packed ECDAA attestation".to_string(),
            ));
        }

        let (attestation_type, trust_path) = if map_get(att_stmt, "x5c").is_some() {
            let chain = certificate::x5c_certificates(att_stmt)?;
            (AttestationType::Basic, certificate::trust_path(&chain)?)
        } else {
            (AttestationType::SelfAttestation, TrustPath::Empty)
        };

        Ok(AttestationStatement {
            format: AttestationFormat::Packed,
            att_stmt: att_stmt.clone(),
            attestation_type,
            trust_path,
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

        let alg = certificate::algorithm(&statement.att_stmt)?;
        let sig = certificate::signature(&statement.att_stmt)?;
        let mut signed = auth_data.raw().to_vec();
        signed.extend_from_slice(client_data_hash);

        match statement.attestation_type {
            AttestationType::Basic => {
                let chain = certificate::x5c_certificates(&statement.att_stmt)?;
                let leaf = &chain[0];

                let cert_key = certificate::public_key(leaf)?;
                if !crate::cose::verify_with_pkey(alg, &cert_key, &signed, &sig)? {
                    debug!("❌ packed attestation signature does not verify with x5c leaf");
                    return Ok(false);
                }

                check_certificate_requirements(leaf, &attested.aaguid)?;
                Ok(true)
            }
            AttestationType::SelfAttestation => {
                let key = &attested.credential_public_key;
                if key.alg.is_some_and(|key_alg| key_alg != alg) {
                    return Err(WebAuthnError::InvalidAttestationStatement(format!(
                        "Statement algorithm {alg} does not match the credential key"
                    )));
                }
                crate::cose::verify(alg, key, &signed, &sig)
            }
            other => Err(WebAuthnError::InvalidAttestationStatement(format!(
                "Unexpected packed attestation type {other:?}"
            ))),
        }
    }
}

/// Packed attestation certificate requirements
fn check_certificate_requirements(
    der: &[u8],
    aaguid: &uuid::Uuid,
) -> Result<(), WebAuthnError> {
    let cert = certificate::parse(der)?;
    let fail = |reason: &str| Err(WebAuthnError::InvalidAttestationStatement(reason.to_string()));

    if !certificate::is_v3(&cert) {
        return fail("Attestation certificate must be version 3");
    }

    let subject = cert.subject();
    let country_ok = subject
        .iter_country()
        .any(|c| c.as_str().is_ok_and(|value| value.len() == 2));
    let organization_ok = subject
        .iter_organization()
        .any(|o| o.as_str().is_ok_and(|value| !value.is_empty()));
    let unit_ok = subject
        .iter_organizational_unit()
        .any(|ou| ou.as_str().is_ok_and(|value| value == ATTESTATION_OU));
    let common_name_ok = subject
        .iter_common_name()
        .any(|cn| cn.as_str().is_ok_and(|value| !value.is_empty()));
    if !(country_ok && organization_ok && unit_ok && common_name_ok) {
        return fail("Attestation certificate subject does not meet packed requirements");
    }

    if certificate::is_ca(&cert) {
        return fail("Attestation certificate must not be a CA");
    }

    if let Some(cert_aaguid) = certificate::aaguid_extension(&cert)? {
        if cert_aaguid != *aaguid {
            return fail("Certificate AAGUID does not match authenticator data");
        }
    }

    Ok(())
}
