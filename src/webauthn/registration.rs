//! Attestation (registration) ceremony
//!
//! Runs the registration states in order and yields a credential source only
//! when every state succeeds:
//!
//! ```text
//! ParseCredential -> VerifyClientData -> LoadAttestationStatement
//!   -> VerifyAttestationSignature -> VerifyCertificateChain -> ConsultMetadata
//!   -> VerifyRpIdHash -> VerifyFlags -> VerifyCredentialKey -> VerifyExtensions
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;

use super::authenticator_data::{AttestedCredentialData, AuthenticatorData};
use super::cbor::AttestationObject;
use super::client_data::{verify_client_data, CeremonyType, ClientDataExpectations, TokenBindingHandler};
use super::crypto::{constant_time_eq, decode_base64url, sha256};
use super::errors::WebAuthnError;
use super::extensions::{ExtensionOutputChecker, ExtensionOutputs};
use super::settings::WebAuthnSettings;
use super::types::{
    PublicKeyCredentialSource, RegistrationResponse, RegistrationState,
    PUBLIC_KEY_CREDENTIAL_TYPE,
};
use crate::attestation::{AttestationFormat, AttestationStatement, AttestationStatementSupport};
use crate::trust::{CertificateChainValidator, MetadataTrustResolver};
use crate::utils::logging::{Ceremony, LoggingHelper};

/// Collaborators of the registration ceremony
pub struct RegistrationVerifier<'a> {
    pub settings: &'a WebAuthnSettings,
    pub attestation: &'a AttestationStatementSupport,
    pub chain_validator: &'a dyn CertificateChainValidator,
    pub metadata: Option<&'a MetadataTrustResolver>,
    pub token_binding: &'a dyn TokenBindingHandler,
    pub extension_checker: &'a dyn ExtensionOutputChecker,
}

/// Decoded registration response
struct ParsedCredential {
    raw_id: Vec<u8>,
    client_data_json: Vec<u8>,
    attestation: AttestationObject,
    auth_data: AuthenticatorData,
}

impl ParsedCredential {
    fn attested(&self) -> Result<&AttestedCredentialData, WebAuthnError> {
        self.auth_data
            .attested_credential_data
            .as_ref()
            .ok_or_else(|| {
                WebAuthnError::MalformedAuthenticatorData(
                    "Registration requires attested credential data".to_string(),
                )
            })
    }
}

impl RegistrationVerifier<'_> {
    /// Verify a registration response against the stored ceremony state
    ///
    /// # Errors
    /// Returns the typed error of the first state that fails
    pub fn verify(
        &self,
        response: &RegistrationResponse,
        state: &RegistrationState,
    ) -> Result<PublicKeyCredentialSource, WebAuthnError> {
        LoggingHelper::log_ceremony_start(Ceremony::Registration, &response.id);
        let result = self.run(response, state);
        match &result {
            Ok(source) => LoggingHelper::log_registration_success(
                &source.credential_id,
                &source.attestation_format,
                source.attestation_type.as_str(),
            ),
            Err(e) => LoggingHelper::log_ceremony_failure(Ceremony::Registration, e),
        }
        result
    }

    fn run(
        &self,
        response: &RegistrationResponse,
        state: &RegistrationState,
    ) -> Result<PublicKeyCredentialSource, WebAuthnError> {
        let credential = Self::parse_credential(response)?;
        let attested = credential.attested()?;

        LoggingHelper::log_step(Ceremony::Registration, "client data");
        let challenge = decode_base64url(&state.challenge, "challenge")?;
        let client_data = verify_client_data(
            &credential.client_data_json,
            &ClientDataExpectations {
                ceremony: CeremonyType::Create,
                challenge: &challenge,
                origins: &self.settings.rp_origins,
                secured_rp_ids: &self.settings.secured_rp_ids,
                token_binding: self.token_binding,
            },
        )?;
        let client_data_hash = client_data.hash();

        LoggingHelper::log_step(Ceremony::Registration, "load attestation statement");
        let format = AttestationFormat::try_from(credential.attestation.fmt.as_str())?;
        if !self.settings.allows_format(format) {
            return Err(WebAuthnError::UnsupportedFormat(format!(
                "{format} is not an allowed attestation format"
            )));
        }
        let verifier = self.attestation.verifier(format);
        let statement = verifier.load(&credential.attestation)?;

        LoggingHelper::log_step(Ceremony::Registration, "attestation signature");
        if !verifier.is_valid(&client_data_hash, &statement, &credential.auth_data)? {
            return Err(WebAuthnError::InvalidAttestationStatement(format!(
                "{format} attestation statement does not verify"
            )));
        }

        if statement.attestation_type.uses_certificates() {
            LoggingHelper::log_step(Ceremony::Registration, "certificate chain");
            self.verify_certificate_chain(&statement, attested)?;
        }

        // U2F authenticators carry a nil AAGUID and have nothing to look up
        if let Some(metadata) = self.metadata.filter(|_| !attested.aaguid.is_nil()) {
            LoggingHelper::log_step(Ceremony::Registration, "metadata");
            metadata.check(&attested.aaguid)?;
        }

        LoggingHelper::log_step(Ceremony::Registration, "rp id hash");
        let expected_rp_id_hash = sha256(self.settings.rp_id.as_bytes());
        if !constant_time_eq(&credential.auth_data.rp_id_hash, &expected_rp_id_hash) {
            return Err(WebAuthnError::RpIdHashMismatch);
        }

        let flags = credential.auth_data.flags;
        if !flags.user_present() {
            return Err(WebAuthnError::UserNotPresent);
        }
        if state.user_verification.is_required() && !flags.user_verified() {
            return Err(WebAuthnError::UserNotVerified);
        }

        LoggingHelper::log_step(Ceremony::Registration, "credential key");
        let key_alg = attested.credential_public_key.alg.ok_or_else(|| {
            WebAuthnError::InvalidKeyData("Credential public key has no alg".to_string())
        })?;
        if !state.algorithms.contains(&key_alg) {
            return Err(WebAuthnError::UnsupportedAlgorithm(format!(
                "Credential algorithm {key_alg} was not offered"
            )));
        }

        LoggingHelper::log_step(Ceremony::Registration, "extensions");
        let outputs = ExtensionOutputs::from_authenticator_data(credential.auth_data.extensions.as_ref())?;
        self.extension_checker.check(&state.extensions, &outputs)?;

        Ok(PublicKeyCredentialSource {
            credential_id: URL_SAFE_NO_PAD.encode(&credential.raw_id),
            credential_type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            transports: response.response.transports.clone(),
            attestation_type: statement.attestation_type,
            attestation_format: format.as_str().to_string(),
            trust_path: statement.trust_path.clone(),
            aaguid: attested.aaguid,
            credential_public_key: attested.credential_public_key_bytes.clone(),
            user_handle: state.user_handle.clone(),
            counter: credential.auth_data.sign_count,
            backup_eligible: flags.backup_eligible(),
            backup_state: flags.backup_state(),
            uv_initialized: flags.user_verified(),
            created_at: Utc::now(),
            last_used: None,
        })
    }

    fn parse_credential(response: &RegistrationResponse) -> Result<ParsedCredential, WebAuthnError> {
        if response.r#type != PUBLIC_KEY_CREDENTIAL_TYPE {
            return Err(WebAuthnError::MalformedInput(format!(
                "Unexpected credential type {}",
                response.r#type
            )));
        }

        let raw_id = decode_base64url(&response.raw_id, "rawId")?;
        if decode_base64url(&response.id, "id")? != raw_id {
            return Err(WebAuthnError::MalformedInput(
                "Credential id does not match rawId".to_string(),
            ));
        }

        let client_data_json =
            decode_base64url(&response.response.client_data_json, "clientDataJSON")?;
        let attestation = AttestationObject::from_base64url(&response.response.attestation_object)?;
        let auth_data = AuthenticatorData::parse(&attestation.auth_data)?;

        let credential = ParsedCredential {
            raw_id,
            client_data_json,
            attestation,
            auth_data,
        };
        if credential.attested()?.credential_id != credential.raw_id {
            return Err(WebAuthnError::MalformedInput(
                "Attested credential id does not match rawId".to_string(),
            ));
        }
        Ok(credential)
    }

    fn verify_certificate_chain(
        &self,
        statement: &AttestationStatement,
        attested: &AttestedCredentialData,
    ) -> Result<(), WebAuthnError> {
        let Some(chain) = statement.trust_path.certificates() else {
            return Err(WebAuthnError::InvalidAttestationStatement(
                "Certificate attestation without a certificate trust path".to_string(),
            ));
        };

        let mut anchors = match self.metadata {
            Some(metadata) => metadata
                .resolve_trust_anchors(&attested.aaguid)?
                .unwrap_or_default(),
            None => Vec::new(),
        };
        anchors.extend(self.settings.trusted_root_certificates.iter().cloned());

        if anchors.is_empty() {
            if self.settings.require_attestation_trust_anchor {
                return Err(WebAuthnError::CertificateChain(format!(
                    "No trust anchor for authenticator {}",
                    attested.aaguid
                )));
            }
            LoggingHelper::log_untrusted_attestation(&attested.aaguid);
            return Ok(());
        }

        self.chain_validator.check(chain, &anchors)
    }
}
