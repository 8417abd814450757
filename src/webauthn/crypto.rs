//! `WebAuthn` cryptography operations
//!
//! This module provides the small cryptographic helpers shared by the
//! ceremonies: challenge generation, hashing, constant-time comparison and
//! certificate encoding conversions.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use openssl::error::ErrorStack;
use openssl::x509::X509;
use ring::rand::SecureRandom;
use sha2::{Digest, Sha256};

use super::errors::WebAuthnError;

/// Length in bytes of generated challenges
pub const CHALLENGE_LENGTH: usize = 32;

/// Generate a secure random challenge
///
/// # Errors
/// Returns `InternalError` if the system random source fails
pub fn generate_challenge() -> Result<Vec<u8>, WebAuthnError> {
    random_bytes(CHALLENGE_LENGTH)
}

/// Generate a user handle
///
/// # Returns
/// A 16 byte random identifier, base64url encoded
///
/// # Errors
/// Returns `InternalError` if the system random source fails
pub fn generate_user_handle() -> Result<String, WebAuthnError> {
    random_bytes(16).map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
}

fn random_bytes(len: usize) -> Result<Vec<u8>, WebAuthnError> {
    let mut bytes = vec![0u8; len];
    ring::rand::SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| WebAuthnError::InternalError("Random generator failure".to_string()))?;
    Ok(bytes)
}

/// Hash data using SHA-256
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hash the concatenation of two byte strings using SHA-256
#[must_use]
pub fn sha256_concat(first: &[u8], second: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize().into()
}

/// Compare two byte strings in constant time
///
/// Lengths are not secret; only equal length inputs are compared byte-wise.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a, b)
}

/// Decode base64url without padding, tolerating trailing `=`
///
/// # Errors
/// Returns `MalformedInput` naming `field` if the input is not base64url
pub fn decode_base64url(value: &str, field: &str) -> Result<Vec<u8>, WebAuthnError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|_| WebAuthnError::MalformedInput(format!("Invalid {field} encoding")))
}

/// Map an `OpenSSL` error stack into an internal error with context
pub fn openssl_error(context: &'static str) -> impl Fn(ErrorStack) -> WebAuthnError {
    move |e| WebAuthnError::InternalError(format!("{context}: {e}"))
}

/// Convert a DER certificate into PEM
///
/// # Errors
/// Returns `InvalidAttestationStatement` if the bytes are not a certificate
pub fn der_to_pem(der: &[u8]) -> Result<String, WebAuthnError> {
    let cert = X509::from_der(der).map_err(|_| {
        WebAuthnError::InvalidAttestationStatement("Invalid X.509 certificate".to_string())
    })?;
    let pem = cert
        .to_pem()
        .map_err(openssl_error("certificate PEM encoding"))?;
    String::from_utf8(pem)
        .map_err(|_| WebAuthnError::InternalError("PEM output is not UTF-8".to_string()))
}

/// Parse a PEM certificate
///
/// # Errors
/// Returns `CertificateChain` if the text is not a PEM certificate
pub fn pem_to_x509(pem: &str) -> Result<X509, WebAuthnError> {
    X509::from_pem(pem.as_bytes())
        .map_err(|_| WebAuthnError::CertificateChain("Invalid PEM certificate".to_string()))
}
