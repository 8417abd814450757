//! Certificate chain validation
//!
//! A trust path is accepted when one of the trusted roots anchors it. Path
//! building, expiry, signatures and basic constraints are delegated to the
//! `OpenSSL` verifier; revocation is checked afterwards on the verified path.

use std::collections::HashSet;

use log::debug;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509StoreContext, X509};

use super::revocation::RevocationChecker;
use crate::webauthn::crypto::{openssl_error, pem_to_x509};
use crate::webauthn::WebAuthnError;

/// Longest accepted chain, trust anchor excluded
pub const MAX_CHAIN_DEPTH: usize = 5;

/// Validates an attestation trust path against trusted roots
pub trait CertificateChainValidator: Send + Sync {
    /// Check a leaf-first PEM chain against PEM trust anchors
    ///
    /// # Errors
    /// Returns `DuplicateCertificatesInChain`, `RevokedCertificate` or
    /// `CertificateChain` when no root validates the chain
    fn check(&self, chain: &[String], trusted_roots: &[String]) -> Result<(), WebAuthnError>;
}

/// `OpenSSL` backed chain validator with optional CRL checks
#[derive(Clone, Default)]
pub struct CertificateChainChecker {
    revocation: Option<RevocationChecker>,
}

impl CertificateChainChecker {
    /// Validator without revocation checks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every non-root certificate of a validated path against CRLs
    #[must_use]
    pub fn with_revocation(mut self, revocation: RevocationChecker) -> Self {
        self.revocation = Some(revocation);
        self
    }

    fn der(cert: &X509) -> Result<Vec<u8>, WebAuthnError> {
        cert.to_der().map_err(openssl_error("certificate DER"))
    }

    /// Run path validation against a single anchor, returning the verified
    /// path (leaf first, anchor last) or the verifier's reason
    fn verify_path(chain: &[X509], root: &X509) -> Result<Result<Vec<X509>, String>, WebAuthnError> {
        let mut store = X509StoreBuilder::new().map_err(openssl_error("X509 store"))?;
        store
            .add_cert(root.clone())
            .map_err(openssl_error("trust anchor"))?;
        // Anchors from metadata are often intermediates
        store
            .set_flags(X509VerifyFlags::PARTIAL_CHAIN)
            .map_err(openssl_error("verify flags"))?;
        let store = store.build();

        let mut intermediates = Stack::new().map_err(openssl_error("certificate stack"))?;
        for cert in &chain[1..] {
            intermediates
                .push(cert.clone())
                .map_err(openssl_error("certificate stack"))?;
        }

        let mut context = X509StoreContext::new().map_err(openssl_error("verify context"))?;
        context
            .init(&store, &chain[0], &intermediates, |ctx| {
                if ctx.verify_cert()? {
                    let path: Vec<X509> = ctx
                        .chain()
                        .map(|path| path.iter().map(ToOwned::to_owned).collect())
                        .unwrap_or_default();
                    Ok(Ok(path))
                } else {
                    Ok(Err(ctx.error().error_string().to_string()))
                }
            })
            .map_err(openssl_error("chain verification"))
    }

    fn check_revocation(&self, path: &[X509]) -> Result<(), WebAuthnError> {
        let Some(revocation) = &self.revocation else {
            return Ok(());
        };
        for pair in path.windows(2) {
            revocation.check(&pair[0], &pair[1])?;
        }
        Ok(())
    }
}

impl CertificateChainValidator for CertificateChainChecker {
    fn check(&self, chain: &[String], trusted_roots: &[String]) -> Result<(), WebAuthnError> {
        if chain.is_empty() {
            return Err(WebAuthnError::CertificateChain(
                "Empty certificate chain".to_string(),
            ));
        }
        if trusted_roots.is_empty() {
            return Err(WebAuthnError::CertificateChain(
                "No trusted root certificates available".to_string(),
            ));
        }

        let chain = chain
            .iter()
            .map(|pem| pem_to_x509(pem))
            .collect::<Result<Vec<_>, _>>()?;
        let chain_der = chain
            .iter()
            .map(Self::der)
            .collect::<Result<Vec<_>, _>>()?;

        let mut last_reason = String::from("no trusted root matched");
        for root_pem in trusted_roots {
            let root = pem_to_x509(root_pem)?;
            let root_der = Self::der(&root)?;

            // A self-signed attestation certificate that is itself trusted
            if chain_der.len() == 1 && chain_der[0] == root_der {
                debug!("✅ Attestation certificate is a trusted root");
                return Ok(());
            }

            let mut merged: Vec<&Vec<u8>> = chain_der.iter().collect();
            merged.push(&root_der);
            let distinct = merged.iter().collect::<HashSet<_>>().len();
            if distinct != merged.len() {
                return Err(WebAuthnError::DuplicateCertificatesInChain);
            }

            if chain.len() > MAX_CHAIN_DEPTH {
                last_reason = format!("chain longer than {MAX_CHAIN_DEPTH} certificates");
                continue;
            }

            match Self::verify_path(&chain, &root)? {
                Ok(path) => {
                    self.check_revocation(&path)?;
                    debug!("✅ Certificate chain validated ({} certificates)", path.len());
                    return Ok(());
                }
                Err(reason) => {
                    debug!("Chain does not validate against trusted root: {reason}");
                    last_reason = reason;
                }
            }
        }

        Err(WebAuthnError::CertificateChain(format!(
            "No trusted root validates the chain: {last_reason}"
        )))
    }
}
