//! COSE key and algorithm registry
//!
//! Typed COSE keys decoded from credential data, and the mapping from COSE
//! algorithm identifiers to signature verification.

pub mod algorithm;
pub mod key;

pub use algorithm::{verify, verify_with_pkey, CoseAlgorithm};
pub use key::{CoseKey, CoseKeyType, Ec2Key, EcCurve, OkpCurve, OkpKey, RsaKey, SymmetricKey};
