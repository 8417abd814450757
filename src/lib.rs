#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the vouchrs-webauthn library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod attestation;
pub mod cose;
pub mod repository;
pub mod settings;
pub mod trust;
pub mod utils;
pub mod webauthn;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use attestation::{AttestationFormat, AttestationType, TrustPath};
pub use repository::{CredentialSourceRepository, InMemoryCredentialSourceRepository};
pub use settings::VerifierSettings;
pub use trust::{CertificateChainChecker, MetadataTrustResolver, RevocationPolicy};
pub use webauthn::{ErrorKind, WebAuthnError, WebAuthnService, WebAuthnSettings};
