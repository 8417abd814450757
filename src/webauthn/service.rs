//! `WebAuthn` service implementation
//!
//! This module provides the main `WebAuthn` service, wiring settings, the
//! credential repository and the trust collaborators into the registration
//! and authentication ceremonies.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;

use super::authentication::AuthenticationVerifier;
use super::client_data::{IgnoreTokenBindingHandler, TokenBindingHandler};
use super::counter::{CounterChecker, StrictCounterChecker};
use super::crypto;
use super::errors::WebAuthnError;
use super::extensions::{ExtensionInputs, ExtensionOutputChecker, RequestedExtensionsChecker};
use super::registration::RegistrationVerifier;
use super::settings::WebAuthnSettings;
use super::types::{
    AuthenticationOptions, AuthenticationResponse, AuthenticationResult, AuthenticationState,
    AuthenticatorSelectionCriteria, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters,
    PublicKeyCredentialSource, RegistrationOptions, RegistrationResponse, RegistrationState,
    RelyingParty, UserEntity, PUBLIC_KEY_CREDENTIAL_TYPE,
};
use crate::attestation::AttestationStatementSupport;
use crate::repository::CredentialSourceRepository;
use crate::trust::{CertificateChainChecker, CertificateChainValidator, MetadataTrustResolver};

/// Generate a user handle using secure random data
///
/// # Errors
/// Returns an error if the system random source fails
pub fn generate_user_handle() -> Result<String, WebAuthnError> {
    crypto::generate_user_handle()
}

/// Core `WebAuthn` service
pub struct WebAuthnService {
    settings: Arc<WebAuthnSettings>,
    repository: Arc<dyn CredentialSourceRepository>,
    attestation: AttestationStatementSupport,
    chain_validator: Arc<dyn CertificateChainValidator>,
    metadata: Option<MetadataTrustResolver>,
    token_binding: Arc<dyn TokenBindingHandler>,
    extension_checker: Arc<dyn ExtensionOutputChecker>,
    counter_checker: Arc<dyn CounterChecker>,
}

impl WebAuthnService {
    /// Create a new `WebAuthnService` with the given settings and repository
    ///
    /// Certificate chains are validated without revocation checks until a
    /// validator is supplied with [`WebAuthnService::with_chain_validator`].
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the settings are invalid
    pub fn new(
        settings: WebAuthnSettings,
        repository: Arc<dyn CredentialSourceRepository>,
    ) -> Result<Self, WebAuthnError> {
        settings.validate()?;
        Ok(Self {
            attestation: AttestationStatementSupport::new(&settings),
            settings: Arc::new(settings),
            repository,
            chain_validator: Arc::new(CertificateChainChecker::new()),
            metadata: None,
            token_binding: Arc::new(IgnoreTokenBindingHandler),
            extension_checker: Arc::new(RequestedExtensionsChecker),
            counter_checker: Arc::new(StrictCounterChecker),
        })
    }

    /// Create a service whose chain validator checks CRLs over HTTP as
    /// configured in `settings.revocation`
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the settings are invalid or the HTTP
    /// client cannot be built
    #[cfg(feature = "http-crl")]
    pub fn with_http_revocation(
        settings: WebAuthnSettings,
        repository: Arc<dyn CredentialSourceRepository>,
    ) -> Result<Self, WebAuthnError> {
        use crate::trust::{HttpCrlFetcher, RevocationChecker};

        let revocation = settings.revocation.clone();
        let service = Self::new(settings, repository)?;
        if !revocation.enabled {
            return Ok(service);
        }
        let fetcher = HttpCrlFetcher::new(revocation.crl_timeout_seconds)?;
        let checker = CertificateChainChecker::new()
            .with_revocation(RevocationChecker::new(revocation.policy, Arc::new(fetcher)));
        Ok(service.with_chain_validator(Arc::new(checker)))
    }

    #[must_use]
    pub fn with_chain_validator(mut self, validator: Arc<dyn CertificateChainValidator>) -> Self {
        self.chain_validator = validator;
        self
    }

    /// Consult `resolver` during registration
    ///
    /// `metadata.require_metadata_statement` in the settings makes the
    /// resolver reject authenticators without a metadata statement.
    #[must_use]
    pub fn with_metadata(mut self, resolver: MetadataTrustResolver) -> Self {
        let resolver = if self.settings.metadata.require_metadata_statement {
            resolver.requiring_statement()
        } else {
            resolver
        };
        self.metadata = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_attestation_support(mut self, support: AttestationStatementSupport) -> Self {
        self.attestation = support;
        self
    }

    #[must_use]
    pub fn with_token_binding_handler(mut self, handler: Arc<dyn TokenBindingHandler>) -> Self {
        self.token_binding = handler;
        self
    }

    #[must_use]
    pub fn with_extension_checker(mut self, checker: Arc<dyn ExtensionOutputChecker>) -> Self {
        self.extension_checker = checker;
        self
    }

    #[must_use]
    pub fn with_counter_checker(mut self, checker: Arc<dyn CounterChecker>) -> Self {
        self.counter_checker = checker;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &WebAuthnSettings {
        &self.settings
    }

    /// Create registration options for a new credential
    ///
    /// # Arguments
    /// * `user_handle` - Base64URL user handle (unique identifier)
    /// * `user_name` - User name (e.g., email)
    /// * `display_name` - User display name
    /// * `extensions` - Extension inputs to request
    ///
    /// # Returns
    /// Registration options and state to be stored for later verification
    ///
    /// # Errors
    /// Returns an error if challenge generation or the repository fails
    pub fn start_registration(
        &self,
        user_handle: &str,
        user_name: &str,
        display_name: &str,
        extensions: ExtensionInputs,
    ) -> Result<(RegistrationOptions, RegistrationState), WebAuthnError> {
        let challenge = URL_SAFE_NO_PAD.encode(crypto::generate_challenge()?);

        // Existing credentials of the user must not be registered again
        let exclude_credentials = self
            .repository
            .find_all_for_user(user_handle)?
            .iter()
            .map(PublicKeyCredentialSource::descriptor)
            .collect();

        let options = RegistrationOptions {
            challenge: challenge.clone(),
            rp: RelyingParty {
                id: self.settings.rp_id.clone(),
                name: self.settings.rp_name.clone(),
            },
            user: UserEntity {
                id: user_handle.to_string(),
                name: user_name.to_string(),
                display_name: display_name.to_string(),
            },
            pub_key_cred_params: self
                .settings
                .algorithms
                .iter()
                .map(|alg| PublicKeyCredentialParameters {
                    r#type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
                    alg: *alg,
                })
                .collect(),
            timeout: self.settings.timeout_millis(),
            attestation: self.settings.attestation_conveyance,
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: self.settings.authenticator_attachment,
                require_resident_key: false,
                user_verification: self.settings.user_verification,
            },
            exclude_credentials,
            extensions: extensions.clone(),
        };

        let state = RegistrationState {
            user_handle: user_handle.to_string(),
            user_name: user_name.to_string(),
            challenge,
            user_verification: self.settings.user_verification,
            algorithms: self.settings.algorithms.clone(),
            extensions,
            created_at: Utc::now(),
        };

        Ok((options, state))
    }

    /// Complete registration with client response and store the credential
    ///
    /// # Errors
    /// Returns a `WebAuthnError` if any registration state fails or the
    /// credential id is already registered
    pub fn finish_registration(
        &self,
        response: &RegistrationResponse,
        state: &RegistrationState,
    ) -> Result<PublicKeyCredentialSource, WebAuthnError> {
        let verifier = RegistrationVerifier {
            settings: &self.settings,
            attestation: &self.attestation,
            chain_validator: self.chain_validator.as_ref(),
            metadata: self.metadata.as_ref(),
            token_binding: self.token_binding.as_ref(),
            extension_checker: self.extension_checker.as_ref(),
        };
        let source = verifier.verify(response, state)?;

        if !self.repository.save_if_absent(source.clone())? {
            return Err(WebAuthnError::Repository(
                "Credential id is already registered".to_string(),
            ));
        }
        Ok(source)
    }

    /// Create authentication options
    ///
    /// # Arguments
    /// * `user_handle` - Base64URL user handle when the user is known; its
    ///   credentials become `allowCredentials`
    /// * `extensions` - Extension inputs to request
    ///
    /// # Errors
    /// Returns an error if challenge generation or the repository fails
    pub fn start_authentication(
        &self,
        user_handle: Option<&str>,
        extensions: ExtensionInputs,
    ) -> Result<(AuthenticationOptions, AuthenticationState), WebAuthnError> {
        let challenge = URL_SAFE_NO_PAD.encode(crypto::generate_challenge()?);

        let allow_credentials: Vec<PublicKeyCredentialDescriptor> = match user_handle {
            Some(handle) => self
                .repository
                .find_all_for_user(handle)?
                .iter()
                .map(PublicKeyCredentialSource::descriptor)
                .collect(),
            None => Vec::new(),
        };

        let options = AuthenticationOptions {
            challenge: challenge.clone(),
            timeout: self.settings.timeout_millis(),
            rp_id: self.settings.rp_id.clone(),
            allow_credentials: allow_credentials.clone(),
            user_verification: self.settings.user_verification,
            extensions: extensions.clone(),
        };

        let state = AuthenticationState {
            challenge,
            user_verification: self.settings.user_verification,
            user_handle: user_handle.map(str::to_string),
            allow_credentials: allow_credentials
                .into_iter()
                .map(|descriptor| descriptor.id)
                .collect(),
            extensions,
            created_at: Utc::now(),
        };

        Ok((options, state))
    }

    /// Complete authentication with client response
    ///
    /// # Errors
    /// Returns a `WebAuthnError` if any authentication state fails
    pub fn finish_authentication(
        &self,
        response: &AuthenticationResponse,
        state: &AuthenticationState,
    ) -> Result<AuthenticationResult, WebAuthnError> {
        let verifier = AuthenticationVerifier {
            settings: &self.settings,
            repository: self.repository.as_ref(),
            token_binding: self.token_binding.as_ref(),
            extension_checker: self.extension_checker.as_ref(),
            counter_checker: self.counter_checker.as_ref(),
        };
        verifier.verify(response, state)
    }
}
