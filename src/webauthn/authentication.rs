//! Assertion (authentication) ceremony
//!
//! ```text
//! ParseCredential -> LookupStoredSource -> VerifyClientData -> VerifyRpIdHash
//!   -> VerifyFlags -> VerifySignature -> VerifySignatureCounter
//!   -> VerifyExtensions -> PersistCounter
//! ```
//!
//! An unknown credential id fails before any cryptographic work. The counter
//! is persisted with a compare-and-swap against the value the signature was
//! checked against, so only one of two racing assertions can succeed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;

use super::authenticator_data::AuthenticatorData;
use super::client_data::{verify_client_data, CeremonyType, ClientDataExpectations, TokenBindingHandler};
use super::counter::CounterChecker;
use super::crypto::{constant_time_eq, decode_base64url, sha256};
use super::errors::WebAuthnError;
use super::extensions::{ExtensionOutputChecker, ExtensionOutputs};
use super::settings::WebAuthnSettings;
use super::types::{
    AuthenticationResponse, AuthenticationResult, AuthenticationState,
    PublicKeyCredentialSource, PUBLIC_KEY_CREDENTIAL_TYPE,
};
use crate::repository::CredentialSourceRepository;
use crate::utils::logging::{Ceremony, LoggingHelper};

/// Collaborators of the authentication ceremony
pub struct AuthenticationVerifier<'a> {
    pub settings: &'a WebAuthnSettings,
    pub repository: &'a dyn CredentialSourceRepository,
    pub token_binding: &'a dyn TokenBindingHandler,
    pub extension_checker: &'a dyn ExtensionOutputChecker,
    pub counter_checker: &'a dyn CounterChecker,
}

/// Decoded assertion response
struct ParsedAssertion {
    credential_id: String,
    client_data_json: Vec<u8>,
    auth_data: AuthenticatorData,
    signature: Vec<u8>,
    user_handle: Option<Vec<u8>>,
}

impl AuthenticationVerifier<'_> {
    /// Verify an assertion response against the stored ceremony state
    ///
    /// # Errors
    /// Returns the typed error of the first state that fails
    pub fn verify(
        &self,
        response: &AuthenticationResponse,
        state: &AuthenticationState,
    ) -> Result<AuthenticationResult, WebAuthnError> {
        LoggingHelper::log_ceremony_start(Ceremony::Authentication, &response.id);
        let result = self.run(response, state);
        match &result {
            Ok(outcome) => {
                LoggingHelper::log_authentication_success(&outcome.credential_id, outcome.counter);
            }
            Err(e) => LoggingHelper::log_ceremony_failure(Ceremony::Authentication, e),
        }
        result
    }

    fn run(
        &self,
        response: &AuthenticationResponse,
        state: &AuthenticationState,
    ) -> Result<AuthenticationResult, WebAuthnError> {
        let assertion = Self::parse_assertion(response)?;

        LoggingHelper::log_step(Ceremony::Authentication, "lookup credential");
        let source = self.lookup_source(&assertion, state)?;

        LoggingHelper::log_step(Ceremony::Authentication, "client data");
        let challenge = decode_base64url(&state.challenge, "challenge")?;
        let client_data = verify_client_data(
            &assertion.client_data_json,
            &ClientDataExpectations {
                ceremony: CeremonyType::Get,
                challenge: &challenge,
                origins: &self.settings.rp_origins,
                secured_rp_ids: &self.settings.secured_rp_ids,
                token_binding: self.token_binding,
            },
        )?;

        LoggingHelper::log_step(Ceremony::Authentication, "rp id hash");
        let expected_rp_id_hash = sha256(self.settings.rp_id.as_bytes());
        if !constant_time_eq(&assertion.auth_data.rp_id_hash, &expected_rp_id_hash) {
            return Err(WebAuthnError::RpIdHashMismatch);
        }

        let flags = assertion.auth_data.flags;
        if !flags.user_present() {
            return Err(WebAuthnError::UserNotPresent);
        }
        if state.user_verification.is_required() && !flags.user_verified() {
            return Err(WebAuthnError::UserNotVerified);
        }

        LoggingHelper::log_step(Ceremony::Authentication, "signature");
        let key = source.public_key()?;
        let alg = key.alg.ok_or_else(|| {
            WebAuthnError::InvalidKeyData("Stored public key has no alg".to_string())
        })?;
        let mut signed = assertion.auth_data.raw().to_vec();
        signed.extend_from_slice(&client_data.hash());
        if !crate::cose::verify(alg, &key, &signed, &assertion.signature)? {
            return Err(WebAuthnError::InvalidSignature);
        }

        LoggingHelper::log_step(Ceremony::Authentication, "signature counter");
        let presented = assertion.auth_data.sign_count;
        self.counter_checker.check(source.counter, presented)?;

        LoggingHelper::log_step(Ceremony::Authentication, "extensions");
        let outputs =
            ExtensionOutputs::from_authenticator_data(assertion.auth_data.extensions.as_ref())?;
        self.extension_checker.check(&state.extensions, &outputs)?;

        if !self
            .repository
            .update_counter(&source.credential_id, source.counter, presented)?
        {
            return Err(WebAuthnError::InvalidCounter {
                stored: source.counter,
                presented,
            });
        }

        Ok(AuthenticationResult {
            credential_id: source.credential_id,
            user_handle: source.user_handle,
            counter: presented,
            user_verified: flags.user_verified(),
            backup_state: flags.backup_state(),
            extensions: outputs,
            authenticated_at: Utc::now(),
        })
    }

    fn parse_assertion(response: &AuthenticationResponse) -> Result<ParsedAssertion, WebAuthnError> {
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

        let assertion = &response.response;
        let client_data_json = decode_base64url(&assertion.client_data_json, "clientDataJSON")?;
        let auth_data_bytes = decode_base64url(&assertion.authenticator_data, "authenticatorData")?;
        let signature = decode_base64url(&assertion.signature, "signature")?;
        let user_handle = assertion
            .user_handle
            .as_deref()
            .filter(|handle| !handle.is_empty())
            .map(|handle| decode_base64url(handle, "userHandle"))
            .transpose()?;

        Ok(ParsedAssertion {
            credential_id: URL_SAFE_NO_PAD.encode(&raw_id),
            client_data_json,
            auth_data: AuthenticatorData::parse(&auth_data_bytes)?,
            signature,
            user_handle,
        })
    }

    fn lookup_source(
        &self,
        assertion: &ParsedAssertion,
        state: &AuthenticationState,
    ) -> Result<PublicKeyCredentialSource, WebAuthnError> {
        if !state.allow_credentials.is_empty()
            && !state
                .allow_credentials
                .iter()
                .any(|allowed| *allowed == assertion.credential_id)
        {
            return Err(WebAuthnError::CredentialNotFound);
        }

        let source = self
            .repository
            .find_by_id(&assertion.credential_id)?
            .ok_or(WebAuthnError::CredentialNotFound)?;

        let owner = decode_base64url(&source.user_handle, "stored user handle")?;
        match (&state.user_handle, &assertion.user_handle) {
            // The user was identified before the ceremony
            (Some(expected), presented) => {
                if decode_base64url(expected, "expected user handle")? != owner {
                    return Err(WebAuthnError::UserHandleMismatch);
                }
                if presented.as_ref().is_some_and(|handle| *handle != owner) {
                    return Err(WebAuthnError::UserHandleMismatch);
                }
            }
            // Discoverable credential: the response names the owner
            (None, Some(presented)) => {
                if *presented != owner {
                    return Err(WebAuthnError::UserHandleMismatch);
                }
            }
            (None, None) => return Err(WebAuthnError::UserHandleMismatch),
        }

        Ok(source)
    }
}
