//! `none` attestation
//!
//! The authenticator provides no attestation. The statement is accepted for
//! loading whatever it contains, but only an empty map is valid.

use super::{
    AttestationFormat, AttestationStatement, AttestationStatementVerifier, AttestationType,
    TrustPath,
};
use crate::webauthn::authenticator_data::AuthenticatorData;
use crate::webauthn::cbor::AttestationObject;
use crate::webauthn::WebAuthnError;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoneAttestation;

impl AttestationStatementVerifier for NoneAttestation {
    fn name(&self) -> &'static str {
        AttestationFormat::None.as_str()
    }

    fn load(&self, attestation: &AttestationObject) -> Result<AttestationStatement, WebAuthnError> {
        Ok(AttestationStatement {
            format: AttestationFormat::None,
            att_stmt: attestation.att_stmt.clone(),
            attestation_type: AttestationType::None,
            trust_path: TrustPath::Empty,
        })
    }

    fn is_valid(
        &self,
        _client_data_hash: &[u8],
        statement: &AttestationStatement,
        _auth_data: &AuthenticatorData,
    ) -> Result<bool, WebAuthnError> {
        Ok(statement.att_stmt.is_empty())
    }
}
