// Centralized logging for ceremony progress so verifiers share one format
use log::{debug, info, warn};

use crate::webauthn::WebAuthnError;

/// Ceremony being logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceremony {
    Registration,
    Authentication,
}

impl Ceremony {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Ceremony::Registration => "registration",
            Ceremony::Authentication => "authentication",
        }
    }
}

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log the start of a ceremony
    pub fn log_ceremony_start(ceremony: Ceremony, credential_id: &str) {
        debug!("🔑 Verifying {} for credential {}", ceremony.as_str(), credential_id);
    }

    /// Log entry into a verification step
    pub fn log_step(ceremony: Ceremony, step: &str) {
        debug!("{} step: {}", ceremony.as_str(), step);
    }

    /// Log a successful registration
    pub fn log_registration_success(credential_id: &str, format: &str, attestation_type: &str) {
        info!(
            "✅ Registered credential {credential_id} (format: {format}, attestation: {attestation_type})"
        );
    }

    /// Log a successful authentication
    pub fn log_authentication_success(credential_id: &str, counter: u32) {
        info!("✅ Authenticated credential {credential_id} (counter: {counter})");
    }

    /// Log a failed ceremony; expected validation failures are not errors
    pub fn log_ceremony_failure(ceremony: Ceremony, error: &WebAuthnError) {
        warn!("❌ {} failed ({:?}): {}", ceremony.as_str(), error.kind(), error);
    }

    /// Log that certificate trust could not be established but was not required
    pub fn log_untrusted_attestation(aaguid: &uuid::Uuid) {
        warn!("⚠️ No trust anchor for authenticator {aaguid}, accepting attestation without chain validation");
    }
}
