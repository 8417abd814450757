//! Test fixtures providing pre-built test objects
//!
//! Relying party settings, services over an in-memory repository, and
//! metadata entries pointing at a [`TestCa`].

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::builders::{TestCa, TestCertificate};
use super::constants::{TEST_AAGUID, TEST_ORIGIN, TEST_RP_ID};
use super::mock::SoftwareAuthenticator;
use crate::repository::InMemoryCredentialSourceRepository;
use crate::trust::{
    AuthenticatorStatus, InMemoryMetadataRepository, MetadataBlobEntry, MetadataStatement,
    MetadataTrustResolver, StatusReport,
};
use crate::webauthn::{WebAuthnService, WebAuthnSettings};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Settings for the test relying party
    #[must_use]
    pub fn settings() -> WebAuthnSettings {
        WebAuthnSettings {
            rp_id: TEST_RP_ID.to_string(),
            rp_name: "Vouchrs Test".to_string(),
            rp_origins: vec![TEST_ORIGIN.to_string()],
            ..WebAuthnSettings::default()
        }
    }

    /// Service over a fresh in-memory repository, returned alongside it
    ///
    /// # Panics
    ///
    /// Panics if `settings` are invalid.
    #[must_use]
    pub fn service_with(
        settings: WebAuthnSettings,
    ) -> (WebAuthnService, Arc<InMemoryCredentialSourceRepository>) {
        let repository = Arc::new(InMemoryCredentialSourceRepository::new());
        let service = WebAuthnService::new(settings, repository.clone()).unwrap();
        (service, repository)
    }

    /// Service with the default test settings
    #[must_use]
    pub fn service() -> (WebAuthnService, Arc<InMemoryCredentialSourceRepository>) {
        Self::service_with(Self::settings())
    }

    /// Authenticator for the test relying party
    #[must_use]
    pub fn authenticator() -> SoftwareAuthenticator {
        SoftwareAuthenticator::new(TEST_RP_ID, TEST_ORIGIN).with_aaguid(TEST_AAGUID)
    }

    /// Metadata entry naming `root` as the attestation root of `TEST_AAGUID`
    #[must_use]
    pub fn metadata_entry(root: &TestCertificate, status: AuthenticatorStatus) -> MetadataBlobEntry {
        MetadataBlobEntry {
            aaguid: Some(TEST_AAGUID),
            metadata_statement: Some(MetadataStatement {
                aaguid: Some(TEST_AAGUID),
                description: "Vouchrs Test Authenticator".to_string(),
                attestation_types: vec!["basic_full".to_string()],
                attestation_root_certificates: vec![STANDARD.encode(root.der())],
            }),
            status_reports: vec![StatusReport {
                status,
                effective_date: Some("2024-01-01".to_string()),
                certificate: None,
                url: None,
            }],
        }
    }

    /// Metadata resolver trusting the root of `ca` for `TEST_AAGUID`
    #[must_use]
    pub fn metadata_resolver(
        ca: &TestCa,
        status: AuthenticatorStatus,
        require_statement: bool,
    ) -> MetadataTrustResolver {
        let mut repository = InMemoryMetadataRepository::new();
        repository.insert(Self::metadata_entry(&ca.root, status));
        MetadataTrustResolver::new(Arc::new(repository), require_statement)
    }
}
