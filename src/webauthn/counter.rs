//! Signature counter policy
//!
//! A presented counter must move strictly past the stored one. Authenticators
//! that never implement a counter report zero every time and are tolerated.

use log::warn;

use super::errors::WebAuthnError;

/// Decides whether a presented signature counter is acceptable
pub trait CounterChecker: Send + Sync {
    /// # Errors
    /// Returns `InvalidCounter` when the counter indicates a possible clone
    fn check(&self, stored: u32, presented: u32) -> Result<(), WebAuthnError>;
}

/// Rejects any counter that does not advance
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictCounterChecker;

impl CounterChecker for StrictCounterChecker {
    fn check(&self, stored: u32, presented: u32) -> Result<(), WebAuthnError> {
        check_counter(stored, presented)
    }
}

/// Check a presented counter against the stored one
///
/// # Errors
/// Returns `InvalidCounter` unless `presented > stored` or both are zero
pub fn check_counter(stored: u32, presented: u32) -> Result<(), WebAuthnError> {
    if presented > stored || (stored == 0 && presented == 0) {
        return Ok(());
    }
    warn!("⚠️ Signature counter did not advance (stored {stored}, presented {presented}), possible cloned authenticator");
    Err(WebAuthnError::InvalidCounter { stored, presented })
}
