//! `WebAuthn` error types
//!
//! This module defines the error type returned by every verification step.
//! Each variant maps onto one [`ErrorKind`] so a boundary layer can turn it
//! into a response without leaking cryptographic detail.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Client data sub-check that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDataCheck {
    /// `type` did not equal the expected ceremony type
    Type,
    /// `challenge` did not equal the expected challenge
    Challenge,
    /// `origin` is not one of the expected origins
    Origin,
    /// Token binding was present and rejected by the handler
    TokenBinding,
}

impl fmt::Display for ClientDataCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientDataCheck::Type => write!(f, "type"),
            ClientDataCheck::Challenge => write!(f, "challenge"),
            ClientDataCheck::Origin => write!(f, "origin"),
            ClientDataCheck::TokenBinding => write!(f, "tokenBinding"),
        }
    }
}

/// Coarse error taxonomy used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedInput,
    InvalidClientData,
    UnsupportedFormat,
    InvalidAttestationStatement,
    CertificateChainFailure,
    InvalidAssertion,
    InvalidCounter,
    CredentialNotFound,
    CompromisedAuthenticator,
    MissingMetadataStatement,
    Configuration,
    Internal,
}

/// `WebAuthn` errors that can occur during verification
#[derive(Debug, Error)]
pub enum WebAuthnError {
    /// Truncated or ill-typed binary or JSON input
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Authenticator data could not be parsed with strict length accounting
    #[error("Malformed authenticator data: {0}")]
    MalformedAuthenticatorData(String),

    /// One or more client data checks failed
    #[error("Invalid client data: failed {}", join_checks(.0))]
    InvalidClientData(Vec<ClientDataCheck>),

    /// Unknown or disallowed attestation statement format
    #[error("Unsupported attestation format: {0}")]
    UnsupportedFormat(String),

    /// Unknown COSE algorithm or algorithm/key type mismatch
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// COSE key is missing parameters or has wrong coordinate lengths
    #[error("Invalid key data: {0}")]
    InvalidKeyData(String),

    /// Structural or cryptographic failure of an attestation statement
    #[error("Invalid attestation statement: {0}")]
    InvalidAttestationStatement(String),

    /// Path validation failed against every trusted root
    #[error("Certificate chain validation failed: {0}")]
    CertificateChain(String),

    /// The supplied chain and the trust anchor share a certificate
    #[error("Invalid certificate chain with duplicated certificates")]
    DuplicateCertificatesInChain,

    /// A certificate in the chain appears on its issuer's CRL
    #[error("Certificate with serial {0} is revoked")]
    RevokedCertificate(String),

    /// Presented counter does not advance past the stored one
    #[error("Invalid signature counter: stored {stored}, presented {presented}")]
    InvalidCounter { stored: u32, presented: u32 },

    /// No stored credential source for the presented credential id
    #[error("Credential not found")]
    CredentialNotFound,

    /// Metadata reports the authenticator as compromised
    #[error("Authenticator {0} is reported as compromised")]
    CompromisedAuthenticator(Uuid),

    /// Metadata is required but no statement exists for the AAGUID
    #[error("No metadata statement for authenticator {0}")]
    MissingMetadataStatement(Uuid),

    /// `rpIdHash` in authenticator data does not match the RP ID
    #[error("RP ID hash mismatch")]
    RpIdHashMismatch,

    /// User present flag not set
    #[error("User presence flag not set")]
    UserNotPresent,

    /// User verification required but flag not set
    #[error("User verification required but not performed")]
    UserNotVerified,

    /// Attestation or assertion signature did not verify
    #[error("Invalid signature")]
    InvalidSignature,

    /// Response user handle does not match the credential owner
    #[error("User handle mismatch")]
    UserHandleMismatch,

    /// Extension outputs were not requested or are malformed
    #[error("Invalid extensions: {0}")]
    InvalidExtensions(String),

    /// Configuration error (e.g., invalid settings)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Credential storage collaborator failed
    #[error("Repository error: {0}")]
    Repository(String),

    /// Other internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

fn join_checks(checks: &[ClientDataCheck]) -> String {
    checks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl WebAuthnError {
    /// Map the error onto the coarse taxonomy
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedInput(_) | Self::MalformedAuthenticatorData(_) => {
                ErrorKind::MalformedInput
            }
            Self::InvalidClientData(_) => ErrorKind::InvalidClientData,
            Self::UnsupportedFormat(_) | Self::UnsupportedAlgorithm(_) => {
                ErrorKind::UnsupportedFormat
            }
            Self::InvalidKeyData(_) | Self::InvalidAttestationStatement(_) => {
                ErrorKind::InvalidAttestationStatement
            }
            Self::CertificateChain(_)
            | Self::DuplicateCertificatesInChain
            | Self::RevokedCertificate(_) => ErrorKind::CertificateChainFailure,
            Self::RpIdHashMismatch
            | Self::UserNotPresent
            | Self::UserNotVerified
            | Self::InvalidSignature
            | Self::UserHandleMismatch
            | Self::InvalidExtensions(_) => ErrorKind::InvalidAssertion,
            Self::InvalidCounter { .. } => ErrorKind::InvalidCounter,
            Self::CredentialNotFound => ErrorKind::CredentialNotFound,
            Self::CompromisedAuthenticator(_) => ErrorKind::CompromisedAuthenticator,
            Self::MissingMetadataStatement(_) => ErrorKind::MissingMetadataStatement,
            Self::ConfigurationError(_) => ErrorKind::Configuration,
            Self::Repository(_) | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to return to a client
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::MalformedInput => "malformed request",
            ErrorKind::InvalidClientData => "invalid client data",
            ErrorKind::UnsupportedFormat => "unsupported authenticator",
            ErrorKind::InvalidAttestationStatement
            | ErrorKind::CertificateChainFailure
            | ErrorKind::CompromisedAuthenticator
            | ErrorKind::MissingMetadataStatement => "invalid registration",
            ErrorKind::InvalidAssertion | ErrorKind::InvalidCounter => "invalid assertion",
            ErrorKind::CredentialNotFound => "unknown credential",
            ErrorKind::Configuration | ErrorKind::Internal => "internal error",
        }
    }
}
