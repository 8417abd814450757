//! `fido-u2f` attestation
//!
//! Used by authenticators implementing the legacy FIDO U2F protocol. The
//! statement carries a single attestation certificate and an ECDSA signature
//! over the U2F registration payload:
//!
//! ```text
//! 0x00 | rpIdHash | clientDataHash | credentialId | 0x04 | x | y
//! ```

use log::debug;
use openssl::pkey::Id;

use super::certificate;
use super::{
    AttestationFormat, AttestationStatement, AttestationStatementVerifier, AttestationType,
};
use crate::cose::{CoseAlgorithm, CoseKeyType, EcCurve};
use crate::webauthn::authenticator_data::AuthenticatorData;
use crate::webauthn::cbor::AttestationObject;
use crate::webauthn::WebAuthnError;

#[derive(Debug, Default, Clone, Copy)]
pub struct FidoU2fAttestation;

impl AttestationStatementVerifier for FidoU2fAttestation {
    fn name(&self) -> &'static str {
        AttestationFormat::FidoU2f.as_str()
    }

    fn load(&self, attestation: &AttestationObject) -> Result<AttestationStatement, WebAuthnError> {
        certificate::signature(&attestation.att_stmt)?;
        let chain = certificate::x5c_certificates(&attestation.att_stmt)?;
        if chain.len() != 1 {
            return Err(WebAuthnError::InvalidAttestationStatement(
                "fido-u2f requires exactly one certificate".to_string(),
            ));
        }

        Ok(AttestationStatement {
            format: AttestationFormat::FidoU2f,
            att_stmt: attestation.att_stmt.clone(),
            attestation_type: AttestationType::Basic,
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

        // 1. The credential key must be EC2 on P-256
        let CoseKeyType::Ec2(ec) = &attested.credential_public_key.key else {
            debug!("❌ fido-u2f credential key is not EC2");
            return Ok(false);
        };
        if ec.curve != EcCurve::P256 {
            debug!("❌ fido-u2f credential key is not on P-256");
            return Ok(false);
        }

        // 2. The attestation certificate key must be EC on P-256 as well
        let chain = certificate::x5c_certificates(&statement.att_stmt)?;
        let cert_key = certificate::public_key(&chain[0])?;
        if cert_key.id() != Id::EC {
            debug!("❌ fido-u2f attestation certificate key is not EC");
            return Ok(false);
        }

        // 3. Rebuild the U2F registration payload
        let mut signed = Vec::with_capacity(1 + 32 + 32 + attested.credential_id.len() + 65);
        signed.push(0x00);
        signed.extend_from_slice(&auth_data.rp_id_hash);
        signed.extend_from_slice(client_data_hash);
        signed.extend_from_slice(&attested.credential_id);
        signed.extend_from_slice(&ec.uncompressed_point());

        // 4. Verify the signature with the certificate key
        let sig = certificate::signature(&statement.att_stmt)?;
        match crate::cose::verify_with_pkey(CoseAlgorithm::Es256.id(), &cert_key, &signed, &sig) {
            Ok(valid) => Ok(valid),
            // A certificate key on another curve cannot have produced this
            Err(WebAuthnError::UnsupportedAlgorithm(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
