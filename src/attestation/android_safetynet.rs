//! `android-safetynet` attestation
//!
//! The statement carries a SafetyNet attestation response: a compact JWS
//! whose header holds the signing certificate chain and whose payload nonce
//! is the base64 SHA-256 of `authenticatorData || clientDataHash`.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use serde::Deserialize;

use super::certificate;
use super::{
    AttestationFormat, AttestationStatement, AttestationStatementVerifier, AttestationType,
};
use crate::cose::CoseAlgorithm;
use crate::webauthn::authenticator_data::AuthenticatorData;
use crate::webauthn::cbor::{map_get_bytes, map_get_text, AttestationObject, CborMap};
use crate::webauthn::crypto::{openssl_error, sha256_concat};
use crate::webauthn::WebAuthnError;

/// Host the SafetyNet signing certificate must be issued to
pub const SAFETYNET_SIGNER_HOST: &str = "attest.android.com";

#[derive(Debug, Deserialize)]
struct JwsHeader {
    alg: String,
    #[serde(default)]
    x5c: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyNetPayload {
    nonce: String,
    timestamp_ms: i64,
    #[serde(default)]
    cts_profile_match: bool,
}

/// A compact JWS split into its parts
struct CompactJws {
    header: JwsHeader,
    payload: SafetyNetPayload,
    signing_input: Vec<u8>,
    signature: Vec<u8>,
}

fn invalid(message: &str) -> WebAuthnError {
    WebAuthnError::InvalidAttestationStatement(message.to_string())
}

impl CompactJws {
    fn parse(response: &[u8]) -> Result<Self, WebAuthnError> {
        let text =
            std::str::from_utf8(response).map_err(|_| invalid("SafetyNet response is not UTF-8"))?;
        let parts: Vec<&str> = text.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
            return Err(invalid("SafetyNet response is not a compact JWS"));
        };

        let decode = |part: &str, what: &str| {
            URL_SAFE_NO_PAD
                .decode(part)
                .map_err(|_| invalid(&format!("Invalid JWS {what} encoding")))
        };

        let header: JwsHeader = serde_json::from_slice(&decode(*header_b64, "header")?)
            .map_err(|_| invalid("Invalid JWS header"))?;
        let payload: SafetyNetPayload = serde_json::from_slice(&decode(*payload_b64, "payload")?)
            .map_err(|_| invalid("Invalid SafetyNet payload"))?;
        let signature = decode(*signature_b64, "signature")?;

        Ok(Self {
            header,
            payload,
            signing_input: format!("{header_b64}.{payload_b64}").into_bytes(),
            signature,
        })
    }

    fn certificate_chain(&self) -> Result<Vec<Vec<u8>>, WebAuthnError> {
        if self.header.x5c.is_empty() {
            return Err(invalid("JWS header has no x5c"));
        }
        self.header
            .x5c
            .iter()
            .map(|entry| {
                STANDARD
                    .decode(entry)
                    .map_err(|_| invalid("Invalid x5c entry in JWS header"))
            })
            .collect()
    }
}

/// Map a JWS algorithm name onto the COSE registry
fn jws_algorithm(name: &str) -> Result<CoseAlgorithm, WebAuthnError> {
    match name {
        "RS256" => Ok(CoseAlgorithm::Rs256),
        "RS384" => Ok(CoseAlgorithm::Rs384),
        "RS512" => Ok(CoseAlgorithm::Rs512),
        "PS256" => Ok(CoseAlgorithm::Ps256),
        "ES256" => Ok(CoseAlgorithm::Es256),
        "ES384" => Ok(CoseAlgorithm::Es384),
        other => Err(WebAuthnError::UnsupportedAlgorithm(format!("JWS {other}"))),
    }
}

/// JWS ECDSA signatures are `r || s`; `OpenSSL` expects DER
fn ecdsa_raw_to_der(raw: &[u8]) -> Result<Vec<u8>, WebAuthnError> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(invalid("Invalid JWS ECDSA signature length"));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let r = BigNum::from_slice(r).map_err(openssl_error("ECDSA r"))?;
    let s = BigNum::from_slice(s).map_err(openssl_error("ECDSA s"))?;
    EcdsaSig::from_private_components(r, s)
        .and_then(|sig| sig.to_der())
        .map_err(openssl_error("ECDSA signature encoding"))
}

// Upper bound for configured windows, keeps date arithmetic in range
const MAX_WINDOW_SECONDS: i64 = 10 * 365 * 24 * 3600;

fn window(seconds: u64) -> Duration {
    Duration::seconds(i64::try_from(seconds).map_or(MAX_WINDOW_SECONDS, |s| s.min(MAX_WINDOW_SECONDS)))
}

/// `android-safetynet` verifier
#[derive(Debug, Clone, Copy)]
pub struct AndroidSafetyNetAttestation {
    max_age: Duration,
    clock_skew: Duration,
    clock: fn() -> DateTime<Utc>,
}

impl AndroidSafetyNetAttestation {
    /// Create a verifier accepting responses at most `max_age_seconds` old and
    /// at most `clock_skew_seconds` in the future
    #[must_use]
    pub fn new(max_age_seconds: u64, clock_skew_seconds: u64) -> Self {
        Self {
            max_age: window(max_age_seconds),
            clock_skew: window(clock_skew_seconds),
            clock: Utc::now,
        }
    }

    /// Use a different time source
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    fn is_fresh(&self, timestamp_ms: i64) -> bool {
        let Some(issued) = DateTime::<Utc>::from_timestamp_millis(timestamp_ms) else {
            return false;
        };
        let now = (self.clock)();
        issued >= now - self.max_age && issued <= now + self.clock_skew
    }

    fn response(att_stmt: &CborMap) -> Result<&[u8], WebAuthnError> {
        map_get_bytes(att_stmt, "response").ok_or_else(|| invalid("Missing response"))
    }
}

impl Default for AndroidSafetyNetAttestation {
    fn default() -> Self {
        Self::new(60, 0)
    }
}

impl AttestationStatementVerifier for AndroidSafetyNetAttestation {
    fn name(&self) -> &'static str {
        AttestationFormat::AndroidSafetyNet.as_str()
    }

    fn load(&self, attestation: &AttestationObject) -> Result<AttestationStatement, WebAuthnError> {
        let att_stmt = &attestation.att_stmt;
        if !map_get_text(att_stmt, "ver").is_some_and(|ver| !ver.is_empty()) {
            return Err(invalid("Missing ver"));
        }
        let jws = CompactJws::parse(Self::response(att_stmt)?)?;
        let chain = jws.certificate_chain()?;

        Ok(AttestationStatement {
            format: AttestationFormat::AndroidSafetyNet,
            att_stmt: att_stmt.clone(),
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
        let jws = CompactJws::parse(Self::response(&statement.att_stmt)?)?;
        let chain = jws.certificate_chain()?;
        let leaf_der = &chain[0];

        // 1. JWS signature with the leaf certificate key
        let algorithm = jws_algorithm(&jws.header.alg)?;
        let signature = if matches!(algorithm, CoseAlgorithm::Es256 | CoseAlgorithm::Es384) {
            ecdsa_raw_to_der(&jws.signature)?
        } else {
            jws.signature.clone()
        };
        let cert_key = certificate::public_key(leaf_der)?;
        if !crate::cose::verify_with_pkey(algorithm.id(), &cert_key, &jws.signing_input, &signature)?
        {
            debug!("❌ SafetyNet JWS signature does not verify");
            return Ok(false);
        }

        // 2. Signed by the SafetyNet service
        let leaf = certificate::parse(leaf_der)?;
        if !certificate::is_issued_to(&leaf, SAFETYNET_SIGNER_HOST) {
            debug!("❌ SafetyNet signer is not {SAFETYNET_SIGNER_HOST}");
            return Ok(false);
        }

        // 3. Nonce binds authenticator data and client data
        let expected_nonce = STANDARD.encode(sha256_concat(auth_data.raw(), client_data_hash));
        if jws.payload.nonce != expected_nonce {
            debug!("❌ SafetyNet nonce does not match");
            return Ok(false);
        }

        // 4. Device integrity
        if !jws.payload.cts_profile_match {
            debug!("❌ SafetyNet ctsProfileMatch is false");
            return Ok(false);
        }

        // 5. Freshness
        if !self.is_fresh(jws.payload.timestamp_ms) {
            debug!("❌ SafetyNet response timestamp outside the accepted window");
            return Ok(false);
        }

        Ok(true)
    }
}
