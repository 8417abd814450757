//! `WebAuthn` attestation statement verification
//!
//! Every attestation statement format is a closed variant of
//! [`AttestationFormat`] with exactly one verifier. Dispatch is an exhaustive
//! match, so supporting a new format means adding a variant and its verifier.
//!
//! Verifiers follow one contract: `load` checks the statement structure and
//! fails before any cryptographic work, `is_valid` performs the format's
//! signature and certificate checks and returns `Ok(false)` when they fail.

pub mod android_key;
pub mod android_safetynet;
pub mod apple;
pub mod certificate;
pub mod fido_u2f;
pub mod none;
pub mod packed;
pub mod tpm;
pub mod trust_path;

use std::fmt;

use crate::webauthn::authenticator_data::AuthenticatorData;
use crate::webauthn::cbor::{AttestationObject, CborMap};
use crate::webauthn::settings::WebAuthnSettings;
use crate::webauthn::WebAuthnError;

pub use android_key::AndroidKeyAttestation;
pub use android_safetynet::AndroidSafetyNetAttestation;
pub use apple::AppleAttestation;
pub use fido_u2f::FidoU2fAttestation;
pub use none::NoneAttestation;
pub use packed::PackedAttestation;
pub use tpm::TpmAttestation;
pub use trust_path::{AttestationType, TrustPath};

/// Attestation statement formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttestationFormat {
    None,
    FidoU2f,
    Packed,
    AndroidKey,
    AndroidSafetyNet,
    Tpm,
    Apple,
}

impl AttestationFormat {
    /// Every known format
    pub const ALL: [AttestationFormat; 7] = [
        AttestationFormat::None,
        AttestationFormat::FidoU2f,
        AttestationFormat::Packed,
        AttestationFormat::AndroidKey,
        AttestationFormat::AndroidSafetyNet,
        AttestationFormat::Tpm,
        AttestationFormat::Apple,
    ];

    /// Registered format identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AttestationFormat::None => "none",
            AttestationFormat::FidoU2f => "fido-u2f",
            AttestationFormat::Packed => "packed",
            AttestationFormat::AndroidKey => "android-key",
            AttestationFormat::AndroidSafetyNet => "android-safetynet",
            AttestationFormat::Tpm => "tpm",
            AttestationFormat::Apple => "apple",
        }
    }
}

impl TryFrom<&str> for AttestationFormat {
    type Error = WebAuthnError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        AttestationFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == value)
            .ok_or_else(|| WebAuthnError::UnsupportedFormat(value.to_string()))
    }
}

impl fmt::Display for AttestationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded attestation statement
#[derive(Debug, Clone)]
pub struct AttestationStatement {
    pub format: AttestationFormat,
    /// Raw `attStmt` map
    pub att_stmt: CborMap,
    pub attestation_type: AttestationType,
    pub trust_path: TrustPath,
}

/// Verification strategy for one attestation statement format
pub trait AttestationStatementVerifier: Send + Sync {
    /// Format identifier handled by this verifier
    fn name(&self) -> &'static str;

    /// Check the statement structure and determine its trust path
    ///
    /// # Errors
    /// Returns `InvalidAttestationStatement` if required members are missing
    /// or ill-typed
    fn load(&self, attestation: &AttestationObject) -> Result<AttestationStatement, WebAuthnError>;

    /// Verify the statement against authenticator data and client data hash
    ///
    /// # Errors
    /// Returns an error only for malformed or impossible states; a statement
    /// that fails cryptographic verification yields `Ok(false)`
    fn is_valid(
        &self,
        client_data_hash: &[u8],
        statement: &AttestationStatement,
        auth_data: &AuthenticatorData,
    ) -> Result<bool, WebAuthnError>;
}

/// The set of verifiers, one per format
pub struct AttestationStatementSupport {
    none: NoneAttestation,
    fido_u2f: FidoU2fAttestation,
    packed: PackedAttestation,
    android_key: AndroidKeyAttestation,
    android_safetynet: AndroidSafetyNetAttestation,
    tpm: TpmAttestation,
    apple: AppleAttestation,
}

impl AttestationStatementSupport {
    /// Build verifiers configured from settings
    #[must_use]
    pub fn new(settings: &WebAuthnSettings) -> Self {
        Self {
            none: NoneAttestation,
            fido_u2f: FidoU2fAttestation,
            packed: PackedAttestation,
            android_key: AndroidKeyAttestation::new(settings.android_key.require_tee),
            android_safetynet: AndroidSafetyNetAttestation::new(
                settings.safetynet.max_age_seconds,
                settings.safetynet.clock_skew_seconds,
            ),
            tpm: TpmAttestation,
            apple: AppleAttestation,
        }
    }

    /// Replace the SafetyNet verifier, e.g. to pin its clock
    #[must_use]
    pub fn with_safetynet(mut self, verifier: AndroidSafetyNetAttestation) -> Self {
        self.android_safetynet = verifier;
        self
    }

    /// Verifier responsible for a format
    #[must_use]
    pub fn verifier(&self, format: AttestationFormat) -> &dyn AttestationStatementVerifier {
        match format {
            AttestationFormat::None => &self.none,
            AttestationFormat::FidoU2f => &self.fido_u2f,
            AttestationFormat::Packed => &self.packed,
            AttestationFormat::AndroidKey => &self.android_key,
            AttestationFormat::AndroidSafetyNet => &self.android_safetynet,
            AttestationFormat::Tpm => &self.tpm,
            AttestationFormat::Apple => &self.apple,
        }
    }
}

impl Default for AttestationStatementSupport {
    fn default() -> Self {
        Self::new(&WebAuthnSettings::default())
    }
}
