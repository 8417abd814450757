//! Registration with the certificate based attestation formats
//!
//! Each format gets a trusted positive case and one rejection per value that
//! binds the statement to the ceremony.

use chrono::{DateTime, Duration, Utc};
use vouchrs_webauthn::attestation::android_safetynet::SAFETYNET_SIGNER_HOST;
use vouchrs_webauthn::attestation::{AndroidSafetyNetAttestation, AttestationStatementSupport};
use vouchrs_webauthn::cose::CoseKey;
use vouchrs_webauthn::testing::builders::p256_key;
use vouchrs_webauthn::testing::constants::{TEST_DISPLAY_NAME, TEST_USER_HANDLE, TEST_USER_NAME};
use vouchrs_webauthn::testing::{
    assert_error_kind, AndroidKeyStatement, AppleStatement, SafetyNetStatement,
    SoftwareAuthenticator, TestAttestation, TestCa, TestCertificate, TestCertificateBuilder,
    TestFixtures, TpmStatement,
};
use vouchrs_webauthn::webauthn::{ExtensionInputs, PublicKeyCredentialSource};
use vouchrs_webauthn::{
    AttestationType, CredentialSourceRepository, ErrorKind, WebAuthnError, WebAuthnService,
    WebAuthnSettings,
};

fn settings_trusting(root: &TestCertificate) -> WebAuthnSettings {
    WebAuthnSettings {
        trusted_root_certificates: vec![root.pem()],
        ..TestFixtures::settings()
    }
}

fn register(
    service: &WebAuthnService,
    authenticator: &SoftwareAuthenticator,
    attestation: &TestAttestation,
) -> Result<PublicKeyCredentialSource, WebAuthnError> {
    let (options, state) = service
        .start_registration(
            TEST_USER_HANDLE,
            TEST_USER_NAME,
            TEST_DISPLAY_NAME,
            ExtensionInputs::default(),
        )
        .unwrap();
    let response = authenticator.register(&options.challenge, attestation);
    service.finish_registration(&response, &state)
}

fn assert_rejected(service: &WebAuthnService, attestation: &TestAttestation) {
    let authenticator = TestFixtures::authenticator();
    assert_error_kind(
        &register(service, &authenticator, attestation),
        ErrorKind::InvalidAttestationStatement,
    );
}

// android-key

#[test]
fn test_android_key_attestation_registers() {
    let ca = TestCa::new();
    let (service, repository) = TestFixtures::service_with(settings_trusting(&ca.root));
    let authenticator = TestFixtures::authenticator();

    let attestation =
        TestAttestation::AndroidKey(AndroidKeyStatement::new(ca.intermediate.clone()));
    let source = register(&service, &authenticator, &attestation).unwrap();

    assert_eq!(source.attestation_format, "android-key");
    assert_eq!(source.attestation_type, AttestationType::Basic);
    assert_eq!(source.trust_path.certificates().map(<[String]>::len), Some(2));
    assert!(repository.find_by_id(&source.credential_id).unwrap().is_some());
}

#[test]
fn test_android_key_wrong_challenge_is_rejected() {
    let ca = TestCa::new();
    let (service, repository) = TestFixtures::service_with(settings_trusting(&ca.root));

    let attestation = TestAttestation::AndroidKey(AndroidKeyStatement {
        challenge: Some(vec![0x42; 32]),
        ..AndroidKeyStatement::new(ca.intermediate.clone())
    });
    assert_rejected(&service, &attestation);
    assert!(repository.is_empty().unwrap());
}

#[test]
fn test_android_key_all_applications_is_rejected() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.root));

    let attestation = TestAttestation::AndroidKey(AndroidKeyStatement {
        all_applications: true,
        ..AndroidKeyStatement::new(ca.intermediate.clone())
    });
    assert_rejected(&service, &attestation);
}

#[test]
fn test_android_key_software_enforced_properties() {
    let ca = TestCa::new();
    let attestation = TestAttestation::AndroidKey(AndroidKeyStatement {
        tee_enforced: false,
        ..AndroidKeyStatement::new(ca.intermediate.clone())
    });

    let (strict, _) = TestFixtures::service_with(settings_trusting(&ca.root));
    assert_rejected(&strict, &attestation);

    let mut settings = settings_trusting(&ca.root);
    settings.android_key.require_tee = false;
    let (lenient, _) = TestFixtures::service_with(settings);
    let source = register(&lenient, &TestFixtures::authenticator(), &attestation).unwrap();
    assert_eq!(source.attestation_type, AttestationType::Basic);
}

#[test]
fn test_android_key_untrusted_issuer_is_rejected() {
    let ca = TestCa::new();
    let other = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&other.root));

    let attestation =
        TestAttestation::AndroidKey(AndroidKeyStatement::new(ca.intermediate.clone()));
    let result = register(&service, &TestFixtures::authenticator(), &attestation);

    assert_error_kind(&result, ErrorKind::CertificateChainFailure);
}

// apple

#[test]
fn test_apple_anonymous_attestation_registers() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.root));
    let authenticator = TestFixtures::authenticator();

    let attestation = TestAttestation::Apple(AppleStatement::new(ca.intermediate.clone()));
    let source = register(&service, &authenticator, &attestation).unwrap();

    assert_eq!(source.attestation_format, "apple");
    assert_eq!(source.attestation_type, AttestationType::AnonCa);
    assert_eq!(source.public_key().unwrap(), authenticator.cose_key());
}

#[test]
fn test_apple_wrong_nonce_is_rejected() {
    let ca = TestCa::new();
    let (service, repository) = TestFixtures::service_with(settings_trusting(&ca.root));

    let attestation = TestAttestation::Apple(AppleStatement {
        nonce: Some(vec![0x42; 32]),
        ..AppleStatement::new(ca.intermediate.clone())
    });
    assert_rejected(&service, &attestation);
    assert!(repository.is_empty().unwrap());
}

// android-safetynet

const SAFETYNET_MAX_AGE_SECONDS: u64 = 60;

fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
}

fn safetynet_service(ca: &TestCa) -> WebAuthnService {
    let settings = settings_trusting(&ca.root);
    let support = AttestationStatementSupport::new(&settings).with_safetynet(
        AndroidSafetyNetAttestation::new(SAFETYNET_MAX_AGE_SECONDS, 0).with_clock(fixed_now),
    );
    let (service, _) = TestFixtures::service_with(settings);
    service.with_attestation_support(support)
}

fn safetynet_statement(ca: &TestCa, signer_host: &str) -> SafetyNetStatement {
    let signer = TestCertificateBuilder::new(signer_host).issued_by(&ca.intermediate);
    SafetyNetStatement {
        timestamp: fixed_now() - Duration::seconds(30),
        ..SafetyNetStatement::new(vec![signer, ca.intermediate.clone()])
    }
}

#[test]
fn test_safetynet_attestation_registers() {
    let ca = TestCa::new();
    let service = safetynet_service(&ca);

    let attestation =
        TestAttestation::AndroidSafetyNet(safetynet_statement(&ca, SAFETYNET_SIGNER_HOST));
    let source = register(&service, &TestFixtures::authenticator(), &attestation).unwrap();

    assert_eq!(source.attestation_format, "android-safetynet");
    assert_eq!(source.attestation_type, AttestationType::Basic);
    assert_eq!(source.trust_path.certificates().map(<[String]>::len), Some(2));
}

#[test]
fn test_safetynet_wrong_signer_host_is_rejected() {
    let ca = TestCa::new();
    let service = safetynet_service(&ca);

    let attestation =
        TestAttestation::AndroidSafetyNet(safetynet_statement(&ca, "evil.example.com"));
    assert_rejected(&service, &attestation);
}

#[test]
fn test_safetynet_wrong_nonce_is_rejected() {
    let ca = TestCa::new();
    let service = safetynet_service(&ca);

    let attestation = TestAttestation::AndroidSafetyNet(SafetyNetStatement {
        nonce: Some("bm90IHRoZSBub25jZQ==".to_string()),
        ..safetynet_statement(&ca, SAFETYNET_SIGNER_HOST)
    });
    assert_rejected(&service, &attestation);
}

#[test]
fn test_safetynet_stale_response_is_rejected() {
    let ca = TestCa::new();
    let service = safetynet_service(&ca);

    let attestation = TestAttestation::AndroidSafetyNet(SafetyNetStatement {
        timestamp: fixed_now() - Duration::seconds(120),
        ..safetynet_statement(&ca, SAFETYNET_SIGNER_HOST)
    });
    assert_rejected(&service, &attestation);
}

#[test]
fn test_safetynet_failed_cts_profile_is_rejected() {
    let ca = TestCa::new();
    let service = safetynet_service(&ca);

    let attestation = TestAttestation::AndroidSafetyNet(SafetyNetStatement {
        cts_profile_match: false,
        ..safetynet_statement(&ca, SAFETYNET_SIGNER_HOST)
    });
    assert_rejected(&service, &attestation);
}

// tpm

fn tpm_statement(ca: &TestCa) -> TpmStatement {
    let aik = TestCertificateBuilder::tpm_aik().issued_by(&ca.intermediate);
    TpmStatement::new(aik, ca.intermediate.clone())
}

#[test]
fn test_tpm_attestation_registers() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.root));

    let attestation = TestAttestation::Tpm(tpm_statement(&ca));
    let source = register(&service, &TestFixtures::authenticator(), &attestation).unwrap();

    assert_eq!(source.attestation_format, "tpm");
    assert_eq!(source.attestation_type, AttestationType::AttCa);
}

#[test]
fn test_tpm_wrong_extra_data_is_rejected() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.root));

    let attestation = TestAttestation::Tpm(TpmStatement {
        extra_data: Some(vec![0x42; 32]),
        ..tpm_statement(&ca)
    });
    assert_rejected(&service, &attestation);
}

#[test]
fn test_tpm_certifying_another_key_is_rejected() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.root));

    let other_key = CoseKey::from_public_pkey(&p256_key(), Some(-7)).unwrap();
    let attestation = TestAttestation::Tpm(TpmStatement {
        certified_key: Some(other_key),
        ..tpm_statement(&ca)
    });
    assert_rejected(&service, &attestation);
}

#[test]
fn test_tpm_aik_with_subject_is_rejected() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.root));

    let aik = TestCertificateBuilder::new("Named AIK").issued_by(&ca.intermediate);
    let attestation = TestAttestation::Tpm(TpmStatement::new(aik, ca.intermediate.clone()));
    assert_rejected(&service, &attestation);
}
