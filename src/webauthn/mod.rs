//! `WebAuthn` implementation
//!
//! This module provides the ceremony level of the verifier: parsing of
//! authenticator and client data, the signature counter policy, extension
//! checks, and the registration and authentication orchestrators built on
//! the attestation and trust modules.

pub mod authentication;
pub mod authenticator_data;
pub mod cbor;
pub mod client_data;
pub mod counter;
pub mod crypto;
mod errors;
pub mod extensions;
pub mod registration;
mod service;
pub mod settings;
mod types;

// Re-exports for public use
pub use authenticator_data::{AttestedCredentialData, AuthenticatorData, AuthenticatorFlags};
pub use client_data::{
    CeremonyType, CollectedClientData, IgnoreTokenBindingHandler, TokenBinding,
    TokenBindingHandler, TokenBindingNotSupportedHandler, TokenBindingStatus,
};
pub use counter::{check_counter, CounterChecker, StrictCounterChecker};
pub use errors::{ClientDataCheck, ErrorKind, WebAuthnError};
pub use extensions::{
    ExtensionInputs, ExtensionOutputChecker, ExtensionOutputs, RequestedExtensionsChecker,
};
pub use service::{generate_user_handle, WebAuthnService};
pub use settings::WebAuthnSettings;
pub use types::*;
