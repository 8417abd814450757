use vouchrs_webauthn::testing::builders::p256_key;
use vouchrs_webauthn::testing::constants::{
    TEST_AAGUID, TEST_DISPLAY_NAME, TEST_ORIGIN, TEST_USER_HANDLE, TEST_USER_NAME,
};
use vouchrs_webauthn::testing::{
    assert_client_data_failure, assert_error_kind, SoftwareAuthenticator, TestAttestation, TestCa,
    TestCertificate, TestCertificateBuilder, TestFixtures,
};
use vouchrs_webauthn::trust::AuthenticatorStatus;
use vouchrs_webauthn::webauthn::{
    CeremonyType, ClientDataCheck, ExtensionInputs, RegistrationOptions, RegistrationState,
    UserVerificationRequirement,
};
use vouchrs_webauthn::{
    AttestationType, CredentialSourceRepository, ErrorKind, TrustPath, WebAuthnError,
    WebAuthnService, WebAuthnSettings,
};

fn start(service: &WebAuthnService) -> (RegistrationOptions, RegistrationState) {
    service
        .start_registration(
            TEST_USER_HANDLE,
            TEST_USER_NAME,
            TEST_DISPLAY_NAME,
            ExtensionInputs::default(),
        )
        .unwrap()
}

fn settings_trusting(root: &TestCertificate) -> WebAuthnSettings {
    WebAuthnSettings {
        trusted_root_certificates: vec![root.pem()],
        ..TestFixtures::settings()
    }
}

#[test]
fn test_none_attestation_registers_credential() {
    let (service, repository) = TestFixtures::service();
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::None);
    let source = service.finish_registration(&response, &state).unwrap();

    assert_eq!(source.credential_id, authenticator.credential_id_b64());
    assert_eq!(source.attestation_type, AttestationType::None);
    assert_eq!(source.attestation_format, "none");
    assert_eq!(source.trust_path, TrustPath::Empty);
    assert_eq!(source.aaguid, TEST_AAGUID);
    assert_eq!(source.user_handle, TEST_USER_HANDLE);
    assert_eq!(source.counter, 0);
    assert!(source.uv_initialized);
    assert_eq!(source.public_key().unwrap(), authenticator.cose_key());

    let stored = repository.find_by_id(&source.credential_id).unwrap();
    assert_eq!(stored, Some(source));
}

#[test]
fn test_packed_self_attestation() {
    let (service, _) = TestFixtures::service();
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::PackedSelf);
    let source = service.finish_registration(&response, &state).unwrap();

    assert_eq!(source.attestation_type, AttestationType::SelfAttestation);
    assert_eq!(source.trust_path, TrustPath::Empty);
}

#[test]
fn test_packed_basic_attestation_with_trusted_root() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.root));
    let authenticator = TestFixtures::authenticator();
    let leaf = ca.attestation_certificate(Some(TEST_AAGUID));

    let (options, state) = start(&service);
    let attestation = TestAttestation::Packed(vec![leaf, ca.intermediate.clone()]);
    let response = authenticator.register(&options.challenge, &attestation);
    let source = service.finish_registration(&response, &state).unwrap();

    assert_eq!(source.attestation_type, AttestationType::Basic);
    assert_eq!(source.trust_path.certificates().map(<[String]>::len), Some(2));
}

#[test]
fn test_packed_certificate_aaguid_must_match() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.root));
    let authenticator = TestFixtures::authenticator();
    let leaf = ca.attestation_certificate(Some(uuid::Uuid::from_u128(7)));

    let (options, state) = start(&service);
    let attestation = TestAttestation::Packed(vec![leaf, ca.intermediate.clone()]);
    let response = authenticator.register(&options.challenge, &attestation);

    assert_error_kind(
        &service.finish_registration(&response, &state),
        ErrorKind::InvalidAttestationStatement,
    );
}

#[test]
fn test_untrusted_root_is_rejected() {
    let ca = TestCa::new();
    let other = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&other.root));
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let attestation = TestAttestation::Packed(vec![
        ca.attestation_certificate(Some(TEST_AAGUID)),
        ca.intermediate.clone(),
    ]);
    let response = authenticator.register(&options.challenge, &attestation);

    assert_error_kind(
        &service.finish_registration(&response, &state),
        ErrorKind::CertificateChainFailure,
    );
}

#[test]
fn test_missing_trust_anchor_policy() {
    let ca = TestCa::new();
    let authenticator = TestFixtures::authenticator();
    let attestation = TestAttestation::Packed(vec![
        ca.attestation_certificate(Some(TEST_AAGUID)),
        ca.intermediate.clone(),
    ]);

    // Accepted without chain validation by default
    let (service, _) = TestFixtures::service();
    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &attestation);
    assert!(service.finish_registration(&response, &state).is_ok());

    // Rejected when a trust anchor is required
    let (strict, _) = TestFixtures::service_with(WebAuthnSettings {
        require_attestation_trust_anchor: true,
        ..TestFixtures::settings()
    });
    let (options, state) = start(&strict);
    let response = authenticator.register(&options.challenge, &attestation);
    assert_error_kind(
        &strict.finish_registration(&response, &state),
        ErrorKind::CertificateChainFailure,
    );
}

#[test]
fn test_metadata_supplies_trust_anchor() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service();
    let service =
        service.with_metadata(TestFixtures::metadata_resolver(&ca, AuthenticatorStatus::FidoCertified, true));
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let attestation = TestAttestation::Packed(vec![
        ca.attestation_certificate(Some(TEST_AAGUID)),
        ca.intermediate.clone(),
    ]);
    let response = authenticator.register(&options.challenge, &attestation);
    let source = service.finish_registration(&response, &state).unwrap();

    assert_eq!(source.attestation_type, AttestationType::Basic);
}

#[test]
fn test_compromised_authenticator_is_rejected() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service();
    let service = service.with_metadata(TestFixtures::metadata_resolver(
        &ca,
        AuthenticatorStatus::AttestationKeyCompromise,
        false,
    ));
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let attestation = TestAttestation::Packed(vec![
        ca.attestation_certificate(Some(TEST_AAGUID)),
        ca.intermediate.clone(),
    ]);
    let response = authenticator.register(&options.challenge, &attestation);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::CompromisedAuthenticator(aaguid)) if aaguid == TEST_AAGUID
    ));
}

#[test]
fn test_missing_metadata_statement_when_required() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service();
    let service = service.with_metadata(TestFixtures::metadata_resolver(
        &ca,
        AuthenticatorStatus::FidoCertified,
        true,
    ));
    let unknown = uuid::Uuid::from_u128(42);
    let authenticator = TestFixtures::authenticator().with_aaguid(unknown);

    let (options, state) = start(&service);
    let attestation =
        TestAttestation::Packed(vec![ca.attestation_certificate(None), ca.intermediate.clone()]);
    let response = authenticator.register(&options.challenge, &attestation);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::MissingMetadataStatement(aaguid)) if aaguid == unknown
    ));
}

#[test]
fn test_compromised_self_attested_authenticator_is_rejected() {
    let ca = TestCa::new();
    let (service, repository) = TestFixtures::service();
    let service = service.with_metadata(TestFixtures::metadata_resolver(
        &ca,
        AuthenticatorStatus::UserVerificationBypass,
        false,
    ));
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::PackedSelf);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::CompromisedAuthenticator(aaguid)) if aaguid == TEST_AAGUID
    ));
    assert!(repository.is_empty().unwrap());
}

#[test]
fn test_metadata_statement_required_by_settings() {
    let ca = TestCa::new();
    let mut settings = TestFixtures::settings();
    settings.metadata.require_metadata_statement = true;
    let (service, _) = TestFixtures::service_with(settings);
    // The resolver itself tolerates missing statements
    let service = service.with_metadata(TestFixtures::metadata_resolver(
        &ca,
        AuthenticatorStatus::FidoCertified,
        false,
    ));
    let unknown = uuid::Uuid::from_u128(42);
    let authenticator = TestFixtures::authenticator().with_aaguid(unknown);

    let (options, state) = start(&service);
    let attestation =
        TestAttestation::Packed(vec![ca.attestation_certificate(None), ca.intermediate.clone()]);
    let response = authenticator.register(&options.challenge, &attestation);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::MissingMetadataStatement(aaguid)) if aaguid == unknown
    ));

    // Without the setting the same registration proceeds
    let (lenient, _) = TestFixtures::service();
    let lenient = lenient.with_metadata(TestFixtures::metadata_resolver(
        &ca,
        AuthenticatorStatus::FidoCertified,
        false,
    ));
    let (options, state) = start(&lenient);
    let response = authenticator.register(&options.challenge, &attestation);
    assert!(lenient.finish_registration(&response, &state).is_ok());
}

#[test]
fn test_metadata_skipped_for_nil_aaguid() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.intermediate));
    let service = service.with_metadata(TestFixtures::metadata_resolver(
        &ca,
        AuthenticatorStatus::FidoCertified,
        true,
    ));
    let authenticator = SoftwareAuthenticator::new("example.com", TEST_ORIGIN);
    let cert = TestCertificateBuilder::attestation("U2F Test Token").issued_by(&ca.intermediate);

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::FidoU2f(cert));
    assert!(service.finish_registration(&response, &state).is_ok());
}

#[test]
fn test_fido_u2f_attestation() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.intermediate));
    let authenticator = SoftwareAuthenticator::new("example.com", TEST_ORIGIN);
    let cert = TestCertificateBuilder::attestation("U2F Test Token").issued_by(&ca.intermediate);

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::FidoU2f(cert));
    let source = service.finish_registration(&response, &state).unwrap();

    assert_eq!(source.attestation_format, "fido-u2f");
    assert_eq!(source.attestation_type, AttestationType::Basic);
}

#[test]
fn test_fido_u2f_signature_from_other_key_is_invalid() {
    let ca = TestCa::new();
    let (service, _) = TestFixtures::service_with(settings_trusting(&ca.intermediate));
    let authenticator = SoftwareAuthenticator::new("example.com", TEST_ORIGIN);
    let cert = TestCertificateBuilder::attestation("U2F Test Token").issued_by(&ca.intermediate);
    let forged = TestCertificate {
        cert: cert.cert,
        key: p256_key(),
    };

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::FidoU2f(forged));

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::InvalidAttestationStatement(_))
    ));
}

#[test]
fn test_challenge_mismatch() {
    let (service, _) = TestFixtures::service();
    let authenticator = TestFixtures::authenticator();

    let (_, state) = start(&service);
    let (other_options, _) = start(&service);
    let response = authenticator.register(&other_options.challenge, &TestAttestation::None);

    assert_client_data_failure(
        &service.finish_registration(&response, &state),
        &[ClientDataCheck::Challenge],
    );
}

#[test]
fn test_all_client_data_failures_are_reported() {
    let (service, _) = TestFixtures::service();
    let mut authenticator = TestFixtures::authenticator();
    authenticator.origin = "https://evil.example".to_string();

    let (options, state) = start(&service);
    let client_data = authenticator.client_data_json(CeremonyType::Get, &options.challenge);
    let response = authenticator.register_with_client_data(&client_data, &TestAttestation::None);

    assert_client_data_failure(
        &service.finish_registration(&response, &state),
        &[ClientDataCheck::Type, ClientDataCheck::Origin],
    );
}

#[test]
fn test_format_allow_list() {
    let (service, _) = TestFixtures::service_with(WebAuthnSettings {
        allowed_attestation_formats: vec!["packed".to_string()],
        ..TestFixtures::settings()
    });
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::None);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_rp_id_hash_mismatch() {
    let (service, _) = TestFixtures::service();
    let mut authenticator = TestFixtures::authenticator();
    authenticator.rp_id = "evil.example".to_string();

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::PackedSelf);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::RpIdHashMismatch)
    ));
}

#[test]
fn test_user_verification_required() {
    let (service, _) = TestFixtures::service_with(WebAuthnSettings {
        user_verification: UserVerificationRequirement::Required,
        ..TestFixtures::settings()
    });
    let mut authenticator = TestFixtures::authenticator();
    authenticator.user_verified = false;

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::None);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::UserNotVerified)
    ));
}

#[test]
fn test_user_presence_required() {
    let (service, _) = TestFixtures::service();
    let mut authenticator = TestFixtures::authenticator();
    authenticator.user_present = false;

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::None);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::UserNotPresent)
    ));
}

#[test]
fn test_algorithm_must_be_offered() {
    let (service, _) = TestFixtures::service_with(WebAuthnSettings {
        algorithms: vec![-257],
        ..TestFixtures::settings()
    });
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let response = authenticator.register(&options.challenge, &TestAttestation::None);

    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::UnsupportedAlgorithm(_))
    ));
}

#[test]
fn test_duplicate_registration_and_exclude_list() {
    let (service, _) = TestFixtures::service();
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    assert!(options.exclude_credentials.is_empty());
    let response = authenticator.register(&options.challenge, &TestAttestation::None);
    service.finish_registration(&response, &state).unwrap();

    let (options, state) = start(&service);
    assert_eq!(options.exclude_credentials.len(), 1);
    assert_eq!(
        options.exclude_credentials[0].id,
        authenticator.credential_id_b64()
    );

    let response = authenticator.register(&options.challenge, &TestAttestation::None);
    assert!(matches!(
        service.finish_registration(&response, &state),
        Err(WebAuthnError::Repository(_))
    ));
}

#[test]
fn test_mismatched_raw_id_is_malformed() {
    let (service, _) = TestFixtures::service();
    let authenticator = TestFixtures::authenticator();

    let (options, state) = start(&service);
    let mut response = authenticator.register(&options.challenge, &TestAttestation::None);
    response.raw_id = "AAAA".to_string();

    assert_error_kind(
        &service.finish_registration(&response, &state),
        ErrorKind::MalformedInput,
    );
}
