//! `WebAuthn` client data verification
//!
//! This module parses `clientDataJSON` and checks it against the values the
//! relying party expects for the ceremony. All sub-checks run; every failed
//! one is reported in a single `InvalidClientData` error.

use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

use super::crypto::{constant_time_eq, sha256};
use super::errors::{ClientDataCheck, WebAuthnError};

/// Ceremony type carried in `clientDataJSON.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyType {
    /// Registration (`webauthn.create`)
    Create,
    /// Authentication (`webauthn.get`)
    Get,
}

impl CeremonyType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CeremonyType::Create => "webauthn.create",
            CeremonyType::Get => "webauthn.get",
        }
    }
}

/// Token binding status reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenBindingStatus {
    Present,
    Supported,
    NotSupported,
}

/// Token binding information from client data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBinding {
    pub status: TokenBindingStatus,
    /// Base64url token binding id, required when status is `present`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Decides whether a present token binding is acceptable
pub trait TokenBindingHandler: Send + Sync {
    /// Check token binding information whose status is `present`
    ///
    /// # Errors
    /// Returns an error describing why the binding is rejected
    fn check(&self, token_binding: &TokenBinding) -> Result<(), WebAuthnError>;
}

/// Accepts any token binding
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreTokenBindingHandler;

impl TokenBindingHandler for IgnoreTokenBindingHandler {
    fn check(&self, _token_binding: &TokenBinding) -> Result<(), WebAuthnError> {
        Ok(())
    }
}

/// Rejects every present token binding
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenBindingNotSupportedHandler;

impl TokenBindingHandler for TokenBindingNotSupportedHandler {
    fn check(&self, _token_binding: &TokenBinding) -> Result<(), WebAuthnError> {
        Err(WebAuthnError::InvalidClientData(vec![
            ClientDataCheck::TokenBinding,
        ]))
    }
}

#[derive(Deserialize)]
struct RawClientData {
    #[serde(rename = "type")]
    ceremony_type: String,
    challenge: String,
    origin: String,
    #[serde(rename = "crossOrigin", default)]
    cross_origin: Option<bool>,
    #[serde(rename = "tokenBinding", default)]
    token_binding: Option<TokenBinding>,
}

/// Parsed `clientDataJSON`
#[derive(Debug, Clone)]
pub struct CollectedClientData {
    pub ceremony_type: String,
    /// Base64url challenge as sent by the client
    pub challenge: String,
    pub origin: String,
    pub cross_origin: bool,
    pub token_binding: Option<TokenBinding>,
    raw: Vec<u8>,
}

impl CollectedClientData {
    /// Parse client data JSON bytes
    ///
    /// # Errors
    /// Returns `MalformedInput` if the bytes are not JSON with string
    /// `type`, `challenge` and `origin` members
    pub fn parse(raw: &[u8]) -> Result<Self, WebAuthnError> {
        let parsed: RawClientData = serde_json::from_slice(raw)
            .map_err(|e| WebAuthnError::MalformedInput(format!("Invalid client data JSON: {e}")))?;
        Ok(Self {
            ceremony_type: parsed.ceremony_type,
            challenge: parsed.challenge,
            origin: parsed.origin,
            cross_origin: parsed.cross_origin.unwrap_or(false),
            token_binding: parsed.token_binding,
            raw: raw.to_vec(),
        })
    }

    /// The JSON bytes this structure was parsed from
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// SHA-256 of the raw JSON bytes
    #[must_use]
    pub fn hash(&self) -> [u8; 32] {
        sha256(&self.raw)
    }
}

/// Values the relying party expects in client data
pub struct ClientDataExpectations<'a> {
    pub ceremony: CeremonyType,
    pub challenge: &'a [u8],
    pub origins: &'a [String],
    /// RP ids allowed over plain http
    pub secured_rp_ids: &'a [String],
    pub token_binding: &'a dyn TokenBindingHandler,
}

/// Parse and verify client data JSON
///
/// # Arguments
/// * `raw` - Raw `clientDataJSON` bytes
/// * `expected` - Expected ceremony type, challenge and origins
///
/// # Returns
/// The parsed client data when every check passes
///
/// # Errors
/// Returns `MalformedInput` if the JSON cannot be parsed and
/// `InvalidClientData` listing every failed check otherwise
pub fn verify_client_data(
    raw: &[u8],
    expected: &ClientDataExpectations<'_>,
) -> Result<CollectedClientData, WebAuthnError> {
    let client_data = CollectedClientData::parse(raw)?;
    let mut failed = Vec::new();

    if client_data.ceremony_type != expected.ceremony.as_str() {
        debug!(
            "❌ Client data type {} does not match {}",
            client_data.ceremony_type,
            expected.ceremony.as_str()
        );
        failed.push(ClientDataCheck::Type);
    }

    if !challenge_matches(&client_data.challenge, expected.challenge) {
        debug!("❌ Client data challenge does not match");
        failed.push(ClientDataCheck::Challenge);
    }

    if !origin_matches(&client_data.origin, expected.origins, expected.secured_rp_ids) {
        debug!("❌ Client data origin {} is not allowed", client_data.origin);
        failed.push(ClientDataCheck::Origin);
    }

    if let Some(token_binding) = &client_data.token_binding {
        if token_binding.status == TokenBindingStatus::Present {
            let accepted = token_binding.id.is_some()
                && expected.token_binding.check(token_binding).is_ok();
            if !accepted {
                debug!("❌ Token binding rejected");
                failed.push(ClientDataCheck::TokenBinding);
            }
        }
    }

    if failed.is_empty() {
        Ok(client_data)
    } else {
        Err(WebAuthnError::InvalidClientData(failed))
    }
}

fn challenge_matches(presented: &str, expected: &[u8]) -> bool {
    super::crypto::decode_base64url(presented, "challenge")
        .is_ok_and(|decoded| constant_time_eq(&decoded, expected))
}

/// Origin check: scheme, host and port must equal one expected origin, and
/// the origin must use https unless its host is a secured RP id
fn origin_matches(presented: &str, expected: &[String], secured_rp_ids: &[String]) -> bool {
    let Ok(origin) = Url::parse(presented) else {
        return false;
    };
    let Some(host) = origin.host_str() else {
        return false;
    };

    let secure_transport = origin.scheme() == "https"
        || host == "localhost"
        || secured_rp_ids.iter().any(|id| id == host);
    if !secure_transport {
        return false;
    }

    expected.iter().any(|candidate| {
        Url::parse(candidate).is_ok_and(|candidate| {
            candidate.scheme() == origin.scheme()
                && candidate.host_str() == Some(host)
                && candidate.port_or_known_default() == origin.port_or_known_default()
        })
    })
}
