//! Attestation trust evaluation
//!
//! Certificate path validation with CRL checks, and metadata driven trust
//! anchor resolution.

pub mod chain;
pub mod metadata;
pub mod revocation;

pub use chain::{CertificateChainChecker, CertificateChainValidator, MAX_CHAIN_DEPTH};
pub use metadata::{
    AuthenticatorStatus, InMemoryMetadataRepository, MetadataBlobEntry, MetadataStatement,
    MetadataStatementRepository, MetadataTrustResolver, StatusReport,
};
#[cfg(feature = "http-crl")]
pub use revocation::HttpCrlFetcher;
pub use revocation::{CrlFetcher, RevocationChecker, RevocationPolicy};
