//! `WebAuthn` core types
//!
//! This module defines the ceremony options sent to the client, the
//! responses it returns, the per-ceremony state the caller keeps between the
//! start and finish calls, and the credential record produced by a
//! successful registration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extensions::{ExtensionInputs, ExtensionOutputs};
use crate::attestation::{AttestationType, TrustPath};
use crate::cose::CoseKey;
use crate::webauthn::WebAuthnError;

/// Credential type, always "public-key"
pub const PUBLIC_KEY_CREDENTIAL_TYPE: &str = "public-key";

/// User verification requirement for a ceremony
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

impl UserVerificationRequirement {
    /// Whether the UV flag must be set in authenticator data
    #[must_use]
    pub fn is_required(self) -> bool {
        self == UserVerificationRequirement::Required
    }
}

/// Attestation conveyance preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyancePreference {
    #[default]
    None,
    Indirect,
    Direct,
    Enterprise,
}

/// Authenticator attachment modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorAttachment {
    Platform,
    CrossPlatform,
}

/// `WebAuthn` registration options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingParty,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u32, // Timeout in milliseconds
    pub attestation: AttestationConveyancePreference,
    pub authenticator_selection: AuthenticatorSelectionCriteria,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptor>,
    #[serde(default, skip_serializing_if = "ExtensionInputs::is_empty")]
    pub extensions: ExtensionInputs,
}

/// `WebAuthn` authentication options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub timeout: u32,      // Timeout in milliseconds
    pub rp_id: String,
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
    #[serde(default, skip_serializing_if = "ExtensionInputs::is_empty")]
    pub extensions: ExtensionInputs,
}

/// `WebAuthn` relying party information
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingParty {
    pub id: String,   // Domain name (e.g., "example.com")
    pub name: String, // Display name
}

/// `WebAuthn` user entity
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserEntity {
    pub id: String,   // Base64URL-encoded user handle
    pub name: String, // Username (e.g., email)
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Public key credential parameters
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
    pub alg: i64, // COSE algorithm identifier
}

/// Authenticator selection criteria
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    pub require_resident_key: bool,
    pub user_verification: UserVerificationRequirement,
}

/// Public key credential descriptor
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
    pub id: String,     // Base64URL-encoded credential ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
}

/// Registration response from client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: String,     // Base64URL-encoded credential ID
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAttestationResponse,
    #[serde(default)]
    pub client_extension_results: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
}

/// Authentication response from client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub id: String,     // Base64URL-encoded credential ID
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAssertionResponse,
    #[serde(default)]
    pub client_extension_results: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
}

/// Authenticator attestation response during registration
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    pub attestation_object: String, // Base64URL-encoded attestation object
    #[serde(default)]
    pub transports: Vec<String>,
}

/// Authenticator assertion response during authentication
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    pub authenticator_data: String, // Base64URL-encoded authenticator data
    pub signature: String,          // Base64URL-encoded signature
    #[serde(default)]
    pub user_handle: Option<String>, // Base64URL-encoded user handle
}

/// Registration state stored during registration process
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationState {
    pub user_handle: String, // Base64URL-encoded user handle
    pub user_name: String,
    pub challenge: String, // Base64URL-encoded challenge
    pub user_verification: UserVerificationRequirement,
    /// COSE algorithms offered in the options
    pub algorithms: Vec<i64>,
    #[serde(default)]
    pub extensions: ExtensionInputs,
    pub created_at: DateTime<Utc>,
}

/// Authentication state stored during authentication process
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationState {
    pub challenge: String, // Base64URL-encoded challenge
    pub user_verification: UserVerificationRequirement,
    /// Expected credential owner, when the user was identified up front
    #[serde(default)]
    pub user_handle: Option<String>,
    /// Base64URL credential ids offered in `allowCredentials`
    #[serde(default)]
    pub allow_credentials: Vec<String>,
    #[serde(default)]
    pub extensions: ExtensionInputs,
    pub created_at: DateTime<Utc>,
}

/// Credential record created by a successful registration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PublicKeyCredentialSource {
    pub credential_id: String, // Base64URL-encoded credential ID
    pub credential_type: String,
    #[serde(default)]
    pub transports: Vec<String>,
    pub attestation_type: AttestationType,
    pub attestation_format: String,
    pub trust_path: TrustPath,
    pub aaguid: Uuid,
    pub credential_public_key: Vec<u8>, // COSE-encoded public key
    pub user_handle: String,            // Base64URL-encoded user handle
    pub counter: u32,
    #[serde(default)]
    pub backup_eligible: bool,
    #[serde(default)]
    pub backup_state: bool,
    /// UV flag observed at registration
    #[serde(default)]
    pub uv_initialized: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl PublicKeyCredentialSource {
    /// Decode the stored COSE public key
    ///
    /// # Errors
    /// Returns `InvalidKeyData` if the stored bytes are not a COSE key
    pub fn public_key(&self) -> Result<CoseKey, WebAuthnError> {
        CoseKey::from_bytes(&self.credential_public_key)
    }

    /// Descriptor for `allowCredentials` / `excludeCredentials`
    #[must_use]
    pub fn descriptor(&self) -> PublicKeyCredentialDescriptor {
        PublicKeyCredentialDescriptor {
            r#type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            id: self.credential_id.clone(),
            transports: self.transports.clone(),
        }
    }
}

/// Authentication result
#[derive(Clone, Debug)]
pub struct AuthenticationResult {
    pub credential_id: String, // Base64URL-encoded credential ID
    pub user_handle: String,   // Base64URL-encoded user handle
    pub counter: u32,          // Updated signature counter
    pub user_verified: bool,
    pub backup_state: bool,
    pub extensions: ExtensionOutputs,
    pub authenticated_at: DateTime<Utc>,
}
