//! `WebAuthn` settings implementation
//!
//! This module defines the relying party and trust policy settings that are
//! threaded, immutable, through every ceremony.

use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::WebAuthnError;
use super::types::{
    AttestationConveyancePreference, AuthenticatorAttachment, UserVerificationRequirement,
};
use crate::attestation::AttestationFormat;
use crate::cose::CoseAlgorithm;
use crate::trust::RevocationPolicy;

/// `WebAuthn` settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebAuthnSettings {
    /// Relying Party ID (usually the domain)
    pub rp_id: String,
    /// Relying Party name (displayed to user)
    pub rp_name: String,
    /// Allowed origins (e.g., <https://example.com>)
    pub rp_origins: Vec<String>,
    /// RP ids whose origins are accepted over plain http
    pub secured_rp_ids: Vec<String>,
    /// Timeout in seconds for operations
    pub timeout_seconds: u64,
    pub user_verification: UserVerificationRequirement,
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    pub attestation_conveyance: AttestationConveyancePreference,
    /// Attestation statement formats accepted at registration
    pub allowed_attestation_formats: Vec<String>,
    /// COSE algorithms offered at registration, in preference order
    pub algorithms: Vec<i64>,
    /// PEM trust anchors used in addition to metadata roots
    pub trusted_root_certificates: Vec<String>,
    /// Reject certificate based attestation when no trust anchor is known
    pub require_attestation_trust_anchor: bool,
    pub revocation: RevocationSettings,
    pub metadata: MetadataSettings,
    pub safetynet: SafetyNetSettings,
    pub android_key: AndroidKeySettings,
}

/// CRL checking during certificate chain validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationSettings {
    pub enabled: bool,
    pub policy: RevocationPolicy,
    pub crl_timeout_seconds: u64,
}

/// Metadata policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// Fail registration when the AAGUID has no metadata statement
    pub require_metadata_statement: bool,
}

/// SafetyNet response freshness window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyNetSettings {
    pub max_age_seconds: u64,
    pub clock_skew_seconds: u64,
}

/// Android key attestation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidKeySettings {
    /// Require key origin and purpose to be TEE enforced
    pub require_tee: bool,
}

impl Default for WebAuthnSettings {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "VouchRS".to_string(),
            rp_origins: vec!["https://localhost".to_string()],
            secured_rp_ids: Vec::new(),
            timeout_seconds: 60,
            user_verification: UserVerificationRequirement::Preferred,
            authenticator_attachment: None,
            attestation_conveyance: AttestationConveyancePreference::None,
            allowed_attestation_formats: AttestationFormat::ALL
                .iter()
                .map(|format| format.as_str().to_string())
                .collect(),
            algorithms: vec![
                CoseAlgorithm::Es256.id(),
                CoseAlgorithm::EdDsa.id(),
                CoseAlgorithm::Rs256.id(),
            ],
            trusted_root_certificates: Vec::new(),
            require_attestation_trust_anchor: false,
            revocation: RevocationSettings::default(),
            metadata: MetadataSettings::default(),
            safetynet: SafetyNetSettings::default(),
            android_key: AndroidKeySettings::default(),
        }
    }
}

impl Default for RevocationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: RevocationPolicy::FailClosed,
            crl_timeout_seconds: 10,
        }
    }
}

impl Default for SafetyNetSettings {
    fn default() -> Self {
        Self {
            max_age_seconds: 60,
            clock_skew_seconds: 0,
        }
    }
}

impl Default for AndroidKeySettings {
    fn default() -> Self {
        Self { require_tee: true }
    }
}

impl WebAuthnSettings {
    /// Check the settings are usable
    ///
    /// # Errors
    /// Returns `ConfigurationError` for an empty RP id or origin list, an
    /// origin that is not https outside the secured RP ids, an unknown
    /// attestation format or an unknown algorithm
    pub fn validate(&self) -> Result<(), WebAuthnError> {
        let fail = |message: String| Err(WebAuthnError::ConfigurationError(message));

        if self.rp_id.trim().is_empty() {
            return fail("rp_id must not be empty".to_string());
        }
        if self.rp_origins.is_empty() {
            return fail("rp_origins must list at least one origin".to_string());
        }

        for origin in &self.rp_origins {
            let Ok(url) = Url::parse(origin) else {
                return fail(format!("Invalid origin: {origin}"));
            };
            let host = url.host_str().unwrap_or_default();
            let secured = url.scheme() == "https"
                || host == "localhost"
                || self.secured_rp_ids.iter().any(|id| id == host);
            if !secured {
                return fail(format!("Origin must use https: {origin}"));
            }
        }

        for format in &self.allowed_attestation_formats {
            if AttestationFormat::try_from(format.as_str()).is_err() {
                return fail(format!("Unknown attestation format: {format}"));
            }
        }

        if self.algorithms.is_empty() {
            return fail("algorithms must not be empty".to_string());
        }
        for alg in &self.algorithms {
            if CoseAlgorithm::from_id(*alg).is_err() {
                return fail(format!("Unknown COSE algorithm: {alg}"));
            }
        }

        Ok(())
    }

    /// Whether an attestation format is accepted
    #[must_use]
    pub fn allows_format(&self, format: AttestationFormat) -> bool {
        self.allowed_attestation_formats
            .iter()
            .any(|allowed| allowed == format.as_str())
    }

    /// Ceremony timeout in milliseconds
    #[must_use]
    pub fn timeout_millis(&self) -> u32 {
        u32::try_from(self.timeout_seconds.saturating_mul(1000)).unwrap_or(u32::MAX)
    }
}
