//! COSE algorithm registry
//!
//! Maps COSE algorithm identifiers onto `OpenSSL` signature primitives.
//! Verification returns `Ok(false)` for a signature that does not verify and
//! reserves errors for unknown algorithms and algorithm/key mismatches.

use std::fmt;

use log::debug;
use openssl::hash::MessageDigest;
use openssl::pkey::{HasPublic, Id, PKeyRef};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};

use super::key::{CoseKey, CoseKeyType, EcCurve};
use crate::webauthn::crypto::openssl_error;
use crate::webauthn::WebAuthnError;

/// Signature algorithms registered for `WebAuthn` use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoseAlgorithm {
    Es256,
    Es384,
    Es512,
    EdDsa,
    Rs256,
    Rs384,
    Rs512,
    Rs1,
    Ps256,
    Ps384,
    Ps512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureScheme {
    Ecdsa(EcCurve),
    EdDsa,
    RsaPkcs1,
    RsaPss,
}

impl CoseAlgorithm {
    /// Every supported algorithm, preferred first
    pub const ALL: [CoseAlgorithm; 11] = [
        CoseAlgorithm::Es256,
        CoseAlgorithm::EdDsa,
        CoseAlgorithm::Es384,
        CoseAlgorithm::Es512,
        CoseAlgorithm::Ps256,
        CoseAlgorithm::Ps384,
        CoseAlgorithm::Ps512,
        CoseAlgorithm::Rs256,
        CoseAlgorithm::Rs384,
        CoseAlgorithm::Rs512,
        CoseAlgorithm::Rs1,
    ];

    /// COSE algorithm identifier
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            CoseAlgorithm::Es256 => -7,
            CoseAlgorithm::Es384 => -35,
            CoseAlgorithm::Es512 => -36,
            CoseAlgorithm::EdDsa => -8,
            CoseAlgorithm::Rs256 => -257,
            CoseAlgorithm::Rs384 => -258,
            CoseAlgorithm::Rs512 => -259,
            CoseAlgorithm::Rs1 => -65535,
            CoseAlgorithm::Ps256 => -37,
            CoseAlgorithm::Ps384 => -38,
            CoseAlgorithm::Ps512 => -39,
        }
    }

    /// Look up an algorithm by COSE identifier
    ///
    /// # Errors
    /// Returns `UnsupportedAlgorithm` for identifiers outside the registry
    pub fn from_id(id: i64) -> Result<Self, WebAuthnError> {
        CoseAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.id() == id)
            .ok_or_else(|| WebAuthnError::UnsupportedAlgorithm(format!("COSE algorithm {id}")))
    }

    /// Message digest used by the algorithm (`None` for `EdDSA`)
    #[must_use]
    pub fn digest(self) -> Option<MessageDigest> {
        match self {
            CoseAlgorithm::EdDsa => None,
            CoseAlgorithm::Rs1 => Some(MessageDigest::sha1()),
            CoseAlgorithm::Es256 | CoseAlgorithm::Rs256 | CoseAlgorithm::Ps256 => {
                Some(MessageDigest::sha256())
            }
            CoseAlgorithm::Es384 | CoseAlgorithm::Rs384 | CoseAlgorithm::Ps384 => {
                Some(MessageDigest::sha384())
            }
            CoseAlgorithm::Es512 | CoseAlgorithm::Rs512 | CoseAlgorithm::Ps512 => {
                Some(MessageDigest::sha512())
            }
        }
    }

    fn scheme(self) -> SignatureScheme {
        match self {
            CoseAlgorithm::Es256 => SignatureScheme::Ecdsa(EcCurve::P256),
            CoseAlgorithm::Es384 => SignatureScheme::Ecdsa(EcCurve::P384),
            CoseAlgorithm::Es512 => SignatureScheme::Ecdsa(EcCurve::P521),
            CoseAlgorithm::EdDsa => SignatureScheme::EdDsa,
            CoseAlgorithm::Rs256
            | CoseAlgorithm::Rs384
            | CoseAlgorithm::Rs512
            | CoseAlgorithm::Rs1 => SignatureScheme::RsaPkcs1,
            CoseAlgorithm::Ps256 | CoseAlgorithm::Ps384 | CoseAlgorithm::Ps512 => {
                SignatureScheme::RsaPss
            }
        }
    }

    /// Check that a COSE key can be used with this algorithm
    ///
    /// # Errors
    /// Returns `UnsupportedAlgorithm` when key type or curve do not match
    pub fn check_key(self, key: &CoseKey) -> Result<(), WebAuthnError> {
        let compatible = match (self.scheme(), &key.key) {
            (SignatureScheme::Ecdsa(curve), CoseKeyType::Ec2(ec)) => ec.curve == curve,
            (SignatureScheme::EdDsa, CoseKeyType::Okp(_))
            | (SignatureScheme::RsaPkcs1 | SignatureScheme::RsaPss, CoseKeyType::Rsa(_)) => true,
            _ => false,
        };
        if !compatible {
            return Err(WebAuthnError::UnsupportedAlgorithm(format!(
                "{self} cannot be used with key type {}",
                key.kty()
            )));
        }
        if let Some(alg) = key.alg {
            if alg != self.id() {
                return Err(WebAuthnError::UnsupportedAlgorithm(format!(
                    "Key is restricted to algorithm {alg}, not {self}"
                )));
            }
        }
        Ok(())
    }

    fn check_pkey<T: HasPublic>(self, pkey: &PKeyRef<T>) -> Result<(), WebAuthnError> {
        let compatible = match self.scheme() {
            SignatureScheme::Ecdsa(curve) => {
                pkey.id() == Id::EC
                    && pkey
                        .ec_key()
                        .ok()
                        .and_then(|ec| ec.group().curve_name())
                        .is_some_and(|nid| nid == curve.nid())
            }
            SignatureScheme::EdDsa => pkey.id() == Id::ED25519 || pkey.id() == Id::ED448,
            SignatureScheme::RsaPkcs1 | SignatureScheme::RsaPss => pkey.id() == Id::RSA,
        };
        if compatible {
            Ok(())
        } else {
            Err(WebAuthnError::UnsupportedAlgorithm(format!(
                "{self} does not match the certificate key"
            )))
        }
    }
}

impl fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoseAlgorithm::Es256 => "ES256",
            CoseAlgorithm::Es384 => "ES384",
            CoseAlgorithm::Es512 => "ES512",
            CoseAlgorithm::EdDsa => "EdDSA",
            CoseAlgorithm::Rs256 => "RS256",
            CoseAlgorithm::Rs384 => "RS384",
            CoseAlgorithm::Rs512 => "RS512",
            CoseAlgorithm::Rs1 => "RS1",
            CoseAlgorithm::Ps256 => "PS256",
            CoseAlgorithm::Ps384 => "PS384",
            CoseAlgorithm::Ps512 => "PS512",
        };
        f.write_str(name)
    }
}

/// Verify a signature with a COSE credential key
///
/// # Arguments
/// * `algorithm_id` - COSE algorithm identifier
/// * `key` - Credential public key
/// * `signed_data` - Data that was signed
/// * `signature` - Signature to check
///
/// # Returns
/// * `Ok(true)` if the signature verifies
/// * `Ok(false)` if it does not
///
/// # Errors
/// Returns `UnsupportedAlgorithm` for unknown identifiers or when the key type
/// does not match the algorithm, and `InvalidKeyData` for unusable keys
pub fn verify(
    algorithm_id: i64,
    key: &CoseKey,
    signed_data: &[u8],
    signature: &[u8],
) -> Result<bool, WebAuthnError> {
    let algorithm = CoseAlgorithm::from_id(algorithm_id)?;
    algorithm.check_key(key)?;
    let pkey = key.to_public_pkey()?;
    verify_signature(algorithm, &pkey, signed_data, signature)
}

/// Verify a signature with a certificate public key
///
/// # Errors
/// Returns `UnsupportedAlgorithm` for unknown identifiers or when the key does
/// not match the algorithm
pub fn verify_with_pkey<T: HasPublic>(
    algorithm_id: i64,
    pkey: &PKeyRef<T>,
    signed_data: &[u8],
    signature: &[u8],
) -> Result<bool, WebAuthnError> {
    let algorithm = CoseAlgorithm::from_id(algorithm_id)?;
    algorithm.check_pkey(pkey)?;
    verify_signature(algorithm, pkey, signed_data, signature)
}

fn verify_signature<T: HasPublic>(
    algorithm: CoseAlgorithm,
    pkey: &PKeyRef<T>,
    signed_data: &[u8],
    signature: &[u8],
) -> Result<bool, WebAuthnError> {
    let Some(digest) = algorithm.digest() else {
        // EdDSA signs the message directly
        let mut verifier =
            Verifier::new_without_digest(pkey).map_err(openssl_error("EdDSA verifier"))?;
        return Ok(verifier
            .verify_oneshot(signature, signed_data)
            .unwrap_or(false));
    };

    let mut verifier = Verifier::new(digest, pkey).map_err(openssl_error("verifier"))?;
    if algorithm.scheme() == SignatureScheme::RsaPss {
        verifier
            .set_rsa_padding(Padding::PKCS1_PSS)
            .map_err(openssl_error("PSS padding"))?;
        verifier
            .set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
            .map_err(openssl_error("PSS salt length"))?;
        verifier
            .set_rsa_mgf1_md(digest)
            .map_err(openssl_error("PSS MGF1 digest"))?;
    }
    verifier
        .update(signed_data)
        .map_err(openssl_error("verifier update"))?;

    // Malformed signature encodings surface as errors from OpenSSL
    match verifier.verify(signature) {
        Ok(valid) => Ok(valid),
        Err(e) => {
            debug!("🔑 {algorithm} signature rejected by OpenSSL: {e}");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::sign::Signer;

    fn ec_keypair(nid: Nid) -> PKey<Private> {
        let group = EcGroup::from_curve_name(nid).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    fn sign(pkey: &PKey<Private>, digest: MessageDigest, data: &[u8]) -> Vec<u8> {
        let mut signer = Signer::new(digest, pkey).unwrap();
        signer.update(data).unwrap();
        signer.sign_to_vec().unwrap()
    }

    #[test]
    fn test_registry_identifiers() {
        for alg in CoseAlgorithm::ALL {
            assert_eq!(CoseAlgorithm::from_id(alg.id()).unwrap(), alg);
        }
        assert!(matches!(
            CoseAlgorithm::from_id(-9999),
            Err(WebAuthnError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_es256_verification() {
        let pkey = ec_keypair(Nid::X9_62_PRIME256V1);
        let key = CoseKey::from_public_pkey(&pkey, Some(-7)).unwrap();
        let signature = sign(&pkey, MessageDigest::sha256(), b"signed data");

        assert!(verify(-7, &key, b"signed data", &signature).unwrap());
        assert!(!verify(-7, &key, b"other data", &signature).unwrap());
        assert!(!verify(-7, &key, b"signed data", b"not DER").unwrap());
    }

    #[test]
    fn test_es384_with_p256_key_is_a_mismatch() {
        let pkey = ec_keypair(Nid::X9_62_PRIME256V1);
        let key = CoseKey::from_public_pkey(&pkey, None).unwrap();
        let signature = sign(&pkey, MessageDigest::sha384(), b"data");

        assert!(matches!(
            verify(-35, &key, b"data", &signature),
            Err(WebAuthnError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_rsa_pkcs1_and_pss() {
        let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let key = CoseKey::from_public_pkey(&pkey, None).unwrap();

        let pkcs1 = sign(&pkey, MessageDigest::sha256(), b"data");
        assert!(verify(-257, &key, b"data", &pkcs1).unwrap());

        let mut signer = Signer::new(MessageDigest::sha256(), &pkey).unwrap();
        signer.set_rsa_padding(Padding::PKCS1_PSS).unwrap();
        signer
            .set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
            .unwrap();
        signer.set_rsa_mgf1_md(MessageDigest::sha256()).unwrap();
        signer.update(b"data").unwrap();
        let pss = signer.sign_to_vec().unwrap();
        assert!(verify(-37, &key, b"data", &pss).unwrap());
        assert!(!verify(-257, &key, b"data", &pss).unwrap());
    }

    #[test]
    fn test_eddsa_verification() {
        let pkey = PKey::generate_ed25519().unwrap();
        let key = CoseKey::from_public_pkey(&pkey, Some(-8)).unwrap();
        let mut signer = Signer::new_without_digest(&pkey).unwrap();
        let signature = signer.sign_oneshot_to_vec(b"message").unwrap();

        assert!(verify(-8, &key, b"message", &signature).unwrap());
        assert!(!verify(-8, &key, b"tampered", &signature).unwrap());
        assert!(matches!(
            verify(-7, &key, b"message", &signature),
            Err(WebAuthnError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_key_alg_restriction() {
        let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let key = CoseKey::from_public_pkey(&pkey, Some(-257)).unwrap();
        let signature = sign(&pkey, MessageDigest::sha384(), b"data");
        assert!(matches!(
            verify(-258, &key, b"data", &signature),
            Err(WebAuthnError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_verify_with_certificate_key() {
        let pkey = ec_keypair(Nid::SECP384R1);
        let signature = sign(&pkey, MessageDigest::sha384(), b"payload");
        assert!(verify_with_pkey(-35, &pkey, b"payload", &signature).unwrap());
        assert!(matches!(
            verify_with_pkey(-7, &pkey, b"payload", &signature),
            Err(WebAuthnError::UnsupportedAlgorithm(_))
        ));
    }
}
