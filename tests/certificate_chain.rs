use std::sync::Arc;

use vouchrs_webauthn::testing::constants::{
    TEST_AAGUID, TEST_DISPLAY_NAME, TEST_USER_HANDLE, TEST_USER_NAME,
};
use vouchrs_webauthn::testing::{
    assert_error_kind, StaticCrlFetcher, TestAttestation, TestCa, TestCertificate,
    TestCertificateBuilder, TestFixtures,
};
use vouchrs_webauthn::trust::{
    CertificateChainChecker, CertificateChainValidator, RevocationChecker, RevocationPolicy,
    MAX_CHAIN_DEPTH,
};
use vouchrs_webauthn::webauthn::ExtensionInputs;
use vouchrs_webauthn::{ErrorKind, WebAuthnError, WebAuthnSettings};

fn pems(certs: &[&TestCertificate]) -> Vec<String> {
    certs.iter().map(|cert| cert.pem()).collect()
}

fn checker(policy: RevocationPolicy, fetcher: StaticCrlFetcher) -> CertificateChainChecker {
    CertificateChainChecker::new().with_revocation(RevocationChecker::new(policy, Arc::new(fetcher)))
}

#[test]
fn test_valid_chain_without_revocation() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);

    let result = CertificateChainChecker::new()
        .check(&pems(&[&leaf, &ca.intermediate]), &pems(&[&ca.root]));
    assert!(result.is_ok());
}

#[test]
fn test_intermediate_can_anchor_the_chain() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);

    let result = CertificateChainChecker::new().check(&pems(&[&leaf]), &pems(&[&ca.intermediate]));
    assert!(result.is_ok());
}

#[test]
fn test_trusted_self_signed_certificate() {
    let cert = TestCertificateBuilder::attestation("Self Signed Token").self_signed();

    let result = CertificateChainChecker::new().check(&pems(&[&cert]), &pems(&[&cert]));
    assert!(result.is_ok());
}

#[test]
fn test_second_root_is_tried() {
    let ca = TestCa::new();
    let other = TestCa::new();
    let leaf = ca.attestation_certificate(None);

    let result = CertificateChainChecker::new().check(
        &pems(&[&leaf, &ca.intermediate]),
        &pems(&[&other.root, &ca.root]),
    );
    assert!(result.is_ok());
}

#[test]
fn test_chain_including_anchor_is_rejected() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);

    let result = CertificateChainChecker::new().check(
        &pems(&[&leaf, &ca.intermediate, &ca.root]),
        &pems(&[&ca.root]),
    );
    assert!(matches!(result, Err(WebAuthnError::DuplicateCertificatesInChain)));
}

#[test]
fn test_duplicate_within_chain_is_rejected() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);

    let result = CertificateChainChecker::new().check(
        &pems(&[&leaf, &ca.intermediate, &ca.intermediate]),
        &pems(&[&ca.root]),
    );
    assert!(matches!(result, Err(WebAuthnError::DuplicateCertificatesInChain)));
}

#[test]
fn test_untrusted_chain() {
    let ca = TestCa::new();
    let other = TestCa::new();
    let leaf = ca.attestation_certificate(None);

    let result = CertificateChainChecker::new()
        .check(&pems(&[&leaf, &ca.intermediate]), &pems(&[&other.root]));
    assert!(matches!(result, Err(WebAuthnError::CertificateChain(_))));
}

#[test]
fn test_empty_inputs() {
    let ca = TestCa::new();
    let checker = CertificateChainChecker::new();

    assert!(matches!(
        checker.check(&[], &pems(&[&ca.root])),
        Err(WebAuthnError::CertificateChain(_))
    ));
    assert!(matches!(
        checker.check(&pems(&[&ca.intermediate]), &[]),
        Err(WebAuthnError::CertificateChain(_))
    ));
}

#[test]
fn test_chain_depth_limit() {
    let root = TestCertificateBuilder::new("Deep Root").ca().self_signed();
    let mut issuers = vec![root.clone()];
    for level in 0..MAX_CHAIN_DEPTH {
        let issuer = issuers.last().unwrap();
        let next = TestCertificateBuilder::new(&format!("Deep Intermediate {level}"))
            .ca()
            .issued_by(issuer);
        issuers.push(next);
    }
    let leaf = TestCertificateBuilder::attestation("Deep Leaf").issued_by(issuers.last().unwrap());

    let mut chain = vec![&leaf];
    chain.extend(issuers[1..].iter().rev());
    assert_eq!(chain.len(), MAX_CHAIN_DEPTH + 1);

    let result = CertificateChainChecker::new().check(&pems(&chain), &pems(&[&root]));
    assert!(matches!(result, Err(WebAuthnError::CertificateChain(_))));

    // One certificate shorter validates
    let result = CertificateChainChecker::new().check(&pems(&chain[..MAX_CHAIN_DEPTH]), &pems(&[&issuers[1]]));
    assert!(result.is_ok());
}

#[test]
fn test_crl_not_listing_the_certificate() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);
    let fetcher =
        StaticCrlFetcher::new().with_crl(TestCa::INTERMEDIATE_CRL_URL, ca.intermediate_crl(&[]));

    let result = checker(RevocationPolicy::FailClosed, fetcher)
        .check(&pems(&[&leaf, &ca.intermediate]), &pems(&[&ca.root]));
    assert!(result.is_ok());
}

#[test]
fn test_revoked_certificate_is_rejected_under_both_policies() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);

    for policy in [RevocationPolicy::FailClosed, RevocationPolicy::FailOpen] {
        let fetcher = StaticCrlFetcher::new()
            .with_crl(TestCa::INTERMEDIATE_CRL_URL, ca.intermediate_crl(&[&leaf]));
        let result =
            checker(policy, fetcher).check(&pems(&[&leaf, &ca.intermediate]), &pems(&[&ca.root]));
        assert!(matches!(result, Err(WebAuthnError::RevokedCertificate(_))));
    }
}

#[test]
fn test_unreachable_crl_follows_policy() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);
    let chain = pems(&[&leaf, &ca.intermediate]);
    let roots = pems(&[&ca.root]);

    let fail_closed = checker(RevocationPolicy::FailClosed, StaticCrlFetcher::new());
    assert_error_kind(
        &fail_closed.check(&chain, &roots),
        ErrorKind::CertificateChainFailure,
    );

    let fail_open = checker(RevocationPolicy::FailOpen, StaticCrlFetcher::new());
    assert!(fail_open.check(&chain, &roots).is_ok());
}

#[test]
fn test_stale_crl_follows_policy() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);
    let chain = pems(&[&leaf, &ca.intermediate]);
    let roots = pems(&[&ca.root]);

    let stale = || {
        StaticCrlFetcher::new().with_crl(TestCa::INTERMEDIATE_CRL_URL, ca.stale_intermediate_crl())
    };
    assert!(matches!(
        checker(RevocationPolicy::FailClosed, stale()).check(&chain, &roots),
        Err(WebAuthnError::CertificateChain(_))
    ));
    assert!(checker(RevocationPolicy::FailOpen, stale())
        .check(&chain, &roots)
        .is_ok());
}

#[test]
fn test_crl_from_wrong_issuer_is_not_trusted() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(None);
    // A CRL listing the leaf, but signed by the root instead of its issuer
    let forged = TestCa::crl(&ca.root, &[&leaf], chrono::Utc::now() + chrono::Duration::days(1));
    let fetcher = StaticCrlFetcher::new().with_crl(TestCa::INTERMEDIATE_CRL_URL, forged);

    let result = checker(RevocationPolicy::FailClosed, fetcher)
        .check(&pems(&[&leaf, &ca.intermediate]), &pems(&[&ca.root]));
    assert!(matches!(result, Err(WebAuthnError::CertificateChain(_))));
}

#[test]
fn test_registration_with_revoked_attestation_certificate() {
    let ca = TestCa::new();
    let leaf = ca.attestation_certificate(Some(TEST_AAGUID));
    let fetcher = StaticCrlFetcher::new()
        .with_crl(TestCa::INTERMEDIATE_CRL_URL, ca.intermediate_crl(&[&leaf]));

    let (service, repository) = TestFixtures::service_with(WebAuthnSettings {
        trusted_root_certificates: vec![ca.root.pem()],
        ..TestFixtures::settings()
    });
    let service =
        service.with_chain_validator(Arc::new(checker(RevocationPolicy::FailClosed, fetcher)));
    let authenticator = TestFixtures::authenticator();

    let (options, state) = service
        .start_registration(
            TEST_USER_HANDLE,
            TEST_USER_NAME,
            TEST_DISPLAY_NAME,
            ExtensionInputs::default(),
        )
        .unwrap();
    let attestation = TestAttestation::Packed(vec![leaf, ca.intermediate.clone()]);
    let response = authenticator.register(&options.challenge, &attestation);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::RevokedCertificate(_))
    ));
    assert!(repository.is_empty().unwrap());
}
