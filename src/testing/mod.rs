//! Testing utilities for the verifier
//!
//! Available to unit tests and, with the `testing` feature, to integration
//! tests.
//!
//! ## Organization
//!
//! - [`fixtures`] - Pre-built settings, services and metadata
//! - [`builders`] - Test certificate authorities and CRLs
//! - [`assertions`] - Assertion helpers for verification errors
//! - [`mock`] - Software authenticator and CRL fetchers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vouchrs_webauthn::testing::{TestAttestation, TestFixtures};
//! use vouchrs_webauthn::webauthn::ExtensionInputs;
//!
//! let (service, _repository) = TestFixtures::service();
//! let authenticator = TestFixtures::authenticator();
//!
//! let (options, state) = service
//!     .start_registration("dXNlcg", "alice", "Alice", ExtensionInputs::default())
//!     .unwrap();
//! let response = authenticator.register(&options.challenge, &TestAttestation::None);
//! assert!(service.finish_registration(&response, &state).is_ok());
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod mock;

// Re-export commonly used items for convenience
pub use assertions::*;
pub use builders::{TestCa, TestCertificate, TestCertificateBuilder};
pub use fixtures::TestFixtures;
pub use mock::{
    AndroidKeyStatement, AppleStatement, SafetyNetStatement, SoftwareAuthenticator,
    StaticCrlFetcher, TestAttestation, TpmStatement,
};

/// Common test constants
pub mod constants {
    use uuid::Uuid;

    /// Relying party id of the test fixtures
    pub const TEST_RP_ID: &str = "example.com";

    /// Origin of the test relying party
    pub const TEST_ORIGIN: &str = "https://example.com";

    /// Base64url user handle
    pub const TEST_USER_HANDLE: &str = "dGVzdC11c2VyLWhhbmRsZQ";

    /// Default test user name
    pub const TEST_USER_NAME: &str = "test@example.com";

    /// Default test display name
    pub const TEST_DISPLAY_NAME: &str = "Test User";

    /// AAGUID of the software authenticator
    pub const TEST_AAGUID: Uuid = Uuid::from_bytes([
        0x56, 0x6f, 0x75, 0x63, 0x68, 0x72, 0x73, 0x2d, 0x74, 0x65, 0x73, 0x74, 0x2d, 0x61, 0x61,
        0x67,
    ]);
}
