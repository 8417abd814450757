//! Custom assertion helpers for verification results

use std::fmt::Debug;

use crate::webauthn::{ClientDataCheck, ErrorKind, WebAuthnError};

/// Assert that a result failed with the expected error kind
///
/// # Panics
///
/// Panics if the result is `Ok` or fails with another kind.
pub fn assert_error_kind<T: Debug>(result: &Result<T, WebAuthnError>, expected: ErrorKind) {
    match result {
        Ok(value) => panic!("Expected {expected:?} failure, got Ok({value:?})"),
        Err(e) => assert_eq!(e.kind(), expected, "Unexpected error: {e}"),
    }
}

/// Assert that client data verification failed exactly on `expected`
///
/// # Panics
///
/// Panics if the result is not `InvalidClientData` with the given checks.
pub fn assert_client_data_failure<T: Debug>(
    result: &Result<T, WebAuthnError>,
    expected: &[ClientDataCheck],
) {
    match result {
        Err(WebAuthnError::InvalidClientData(failed)) => assert_eq!(failed.as_slice(), expected),
        other => panic!("Expected InvalidClientData({expected:?}), got {other:?}"),
    }
}
