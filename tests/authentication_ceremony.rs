use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use vouchrs_webauthn::testing::constants::{
    TEST_DISPLAY_NAME, TEST_ORIGIN, TEST_RP_ID, TEST_USER_HANDLE, TEST_USER_NAME,
};
use vouchrs_webauthn::testing::{
    assert_client_data_failure, assert_error_kind, SoftwareAuthenticator, TestAttestation,
    TestFixtures,
};
use vouchrs_webauthn::webauthn::{
    ClientDataCheck, CounterChecker, ExtensionInputs, UserVerificationRequirement,
};
use vouchrs_webauthn::{
    CredentialSourceRepository, ErrorKind, InMemoryCredentialSourceRepository, WebAuthnError,
    WebAuthnService, WebAuthnSettings,
};

const OTHER_USER_HANDLE: &str = "b3RoZXItdXNlcg";

fn register(service: &WebAuthnService, authenticator: &SoftwareAuthenticator, user_handle: &str) {
    let (options, state) = service
        .start_registration(
            user_handle,
            TEST_USER_NAME,
            TEST_DISPLAY_NAME,
            ExtensionInputs::default(),
        )
        .unwrap();
    let response = authenticator.register(&options.challenge, &TestAttestation::None);
    service.finish_registration(&response, &state).unwrap();
}

fn registered() -> (
    WebAuthnService,
    Arc<InMemoryCredentialSourceRepository>,
    SoftwareAuthenticator,
) {
    let (service, repository) = TestFixtures::service();
    let authenticator = TestFixtures::authenticator();
    register(&service, &authenticator, TEST_USER_HANDLE);
    (service, repository, authenticator)
}

#[test]
fn test_authentication_with_known_user() {
    let (service, repository, mut authenticator) = registered();

    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    assert_eq!(options.rp_id, TEST_RP_ID);
    assert_eq!(options.allow_credentials.len(), 1);
    assert_eq!(options.allow_credentials[0].id, authenticator.credential_id_b64());

    let response = authenticator.authenticate(&options.challenge, Some(TEST_USER_HANDLE));
    let result = service.finish_authentication(&response, &state).unwrap();

    assert_eq!(result.credential_id, authenticator.credential_id_b64());
    assert_eq!(result.user_handle, TEST_USER_HANDLE);
    assert_eq!(result.counter, 1);
    assert!(result.user_verified);

    let stored = repository
        .find_by_id(&authenticator.credential_id_b64())
        .unwrap()
        .unwrap();
    assert_eq!(stored.counter, 1);
    assert!(stored.last_used.is_some());
}

#[test]
fn test_discoverable_credential_needs_user_handle() {
    let (service, _, mut authenticator) = registered();

    let (options, state) = service
        .start_authentication(None, ExtensionInputs::default())
        .unwrap();
    assert!(options.allow_credentials.is_empty());
    let response = authenticator.authenticate(&options.challenge, Some(TEST_USER_HANDLE));
    assert!(service.finish_authentication(&response, &state).is_ok());

    let (options, state) = service
        .start_authentication(None, ExtensionInputs::default())
        .unwrap();
    let response = authenticator.authenticate(&options.challenge, None);
    assert!(matches!(
        service.finish_authentication(&response, &state),
        Err(WebAuthnError::UserHandleMismatch)
    ));
}

#[test]
fn test_user_handle_of_another_user() {
    let (service, _, mut authenticator) = registered();

    let (options, state) = service
        .start_authentication(None, ExtensionInputs::default())
        .unwrap();
    let response = authenticator.authenticate(&options.challenge, Some(OTHER_USER_HANDLE));

    assert!(matches!(
        service.finish_authentication(&response, &state),
        Err(WebAuthnError::UserHandleMismatch)
    ));
}

#[test]
fn test_unknown_credential() {
    let (service, _, _) = registered();
    let mut stranger = SoftwareAuthenticator::new(TEST_RP_ID, TEST_ORIGIN);

    let (options, state) = service
        .start_authentication(None, ExtensionInputs::default())
        .unwrap();
    let response = stranger.authenticate(&options.challenge, Some(TEST_USER_HANDLE));

    assert_error_kind(
        &service.finish_authentication(&response, &state),
        ErrorKind::CredentialNotFound,
    );
}

#[test]
fn test_credential_outside_allow_list() {
    let (service, _, _) = registered();
    let mut other = TestFixtures::authenticator();
    register(&service, &other, OTHER_USER_HANDLE);

    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let response = other.authenticate(&options.challenge, Some(OTHER_USER_HANDLE));

    assert!(matches!(
        service.finish_authentication(&response, &state),
        Err(WebAuthnError::CredentialNotFound)
    ));
}

#[test]
fn test_replayed_counter_is_rejected() {
    let (service, repository, mut authenticator) = registered();

    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let first = authenticator.authenticate(&options.challenge, None);
    service.finish_authentication(&first, &state).unwrap();

    // Same counter value presented again
    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    authenticator.counter_step = 0;
    let replay = authenticator.authenticate(&options.challenge, None);

    assert!(matches!(
        service.finish_authentication(&replay, &state),
        Err(WebAuthnError::InvalidCounter {
            stored: 1,
            presented: 1
        })
    ));
    let stored = repository
        .find_by_id(&authenticator.credential_id_b64())
        .unwrap()
        .unwrap();
    assert_eq!(stored.counter, 1);
}

#[test]
fn test_counter_regression_is_rejected() {
    let (service, _, mut authenticator) = registered();
    authenticator.counter_step = 5;

    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let response = authenticator.authenticate(&options.challenge, None);
    service.finish_authentication(&response, &state).unwrap();

    authenticator.counter = 0;
    authenticator.counter_step = 2;
    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let response = authenticator.authenticate(&options.challenge, None);

    assert_error_kind(
        &service.finish_authentication(&response, &state),
        ErrorKind::InvalidCounter,
    );
}

#[test]
fn test_authenticator_without_counter_is_tolerated() {
    let (service, _, mut authenticator) = registered();
    authenticator.counter_step = 0;

    for _ in 0..2 {
        let (options, state) = service
            .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
            .unwrap();
        let response = authenticator.authenticate(&options.challenge, None);
        let result = service.finish_authentication(&response, &state).unwrap();
        assert_eq!(result.counter, 0);
    }
}

#[test]
fn test_custom_counter_checker() {
    struct AcceptAnyCounter;

    impl CounterChecker for AcceptAnyCounter {
        fn check(&self, _stored: u32, _presented: u32) -> Result<(), WebAuthnError> {
            Ok(())
        }
    }

    let (service, _, mut authenticator) = registered();
    let service = service.with_counter_checker(Arc::new(AcceptAnyCounter));
    authenticator.counter_step = 3;

    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let response = authenticator.authenticate(&options.challenge, None);
    service.finish_authentication(&response, &state).unwrap();

    // A permissive checker lets a regressed counter through
    authenticator.counter = 0;
    authenticator.counter_step = 1;
    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let response = authenticator.authenticate(&options.challenge, None);
    assert!(service.finish_authentication(&response, &state).is_ok());
}

#[test]
fn test_tampered_signature() {
    let (service, _, mut authenticator) = registered();

    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let mut response = authenticator.authenticate(&options.challenge, None);
    let mut signature = URL_SAFE_NO_PAD.decode(&response.response.signature).unwrap();
    let last = signature.len() - 1;
    signature[last] ^= 0x01;
    response.response.signature = URL_SAFE_NO_PAD.encode(signature);

    assert!(matches!(
        service.finish_authentication(&response, &state),
        Err(WebAuthnError::InvalidSignature)
    ));
}

#[test]
fn test_assertion_challenge_mismatch() {
    let (service, _, mut authenticator) = registered();

    let (_, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let (other, _) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let response = authenticator.authenticate(&other.challenge, None);

    assert_client_data_failure(
        &service.finish_authentication(&response, &state),
        &[ClientDataCheck::Challenge],
    );
}

#[test]
fn test_user_verification_required_for_assertion() {
    let (service, _) = TestFixtures::service_with(WebAuthnSettings {
        user_verification: UserVerificationRequirement::Required,
        ..TestFixtures::settings()
    });
    let mut authenticator = TestFixtures::authenticator();
    register(&service, &authenticator, TEST_USER_HANDLE);
    authenticator.user_verified = false;

    let (options, state) = service
        .start_authentication(Some(TEST_USER_HANDLE), ExtensionInputs::default())
        .unwrap();
    let response = authenticator.authenticate(&options.challenge, None);

    assert!(matches!(
        service.finish_authentication(&response, &state),
        Err(WebAuthnError::UserNotVerified)
    ));
}
