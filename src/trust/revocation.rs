//! Certificate revocation checks
//!
//! Each non-root certificate of a validated path is looked up in the CRLs
//! named by its CRL distribution points. A CRL is only trusted after its
//! signature verifies with the issuer key and while it is not stale.
//!
//! Infrastructure failures (unreachable distribution point, unparsable or
//! stale CRL) are handled by an explicit [`RevocationPolicy`]. A revoked
//! serial is always fatal.

use std::cmp::Ordering;
use std::sync::Arc;

use log::{debug, warn};
use openssl::asn1::Asn1Time;
use openssl::x509::{CrlStatus, X509Crl, X509};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::{DistributionPointName, GeneralName, ParsedExtension};

use crate::attestation::certificate;
use crate::webauthn::crypto::openssl_error;
use crate::webauthn::WebAuthnError;

/// How revocation infrastructure failures are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationPolicy {
    /// Abort the chain check when a CRL cannot be obtained or trusted
    #[default]
    FailClosed,
    /// Treat an unavailable CRL as "not revoked"
    FailOpen,
}

/// Source of DER encoded CRLs
pub trait CrlFetcher: Send + Sync {
    /// Fetch the CRL published at `url`
    ///
    /// # Errors
    /// Returns an error when the CRL cannot be retrieved
    fn fetch(&self, url: &str) -> Result<Vec<u8>, WebAuthnError>;
}

/// Blocking HTTP CRL fetcher
#[cfg(feature = "http-crl")]
pub struct HttpCrlFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http-crl")]
impl HttpCrlFetcher {
    /// Create a fetcher whose requests time out after `timeout_seconds`
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the HTTP client cannot be built
    pub fn new(timeout_seconds: u64) -> Result<Self, WebAuthnError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| WebAuthnError::ConfigurationError(format!("CRL HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http-crl")]
impl CrlFetcher for HttpCrlFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, WebAuthnError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| WebAuthnError::CertificateChain(format!("Invalid CRL URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(WebAuthnError::CertificateChain(format!(
                "Unsupported CRL URL scheme: {}",
                parsed.scheme()
            )));
        }

        debug!("Fetching CRL from: {url}");
        let response = self
            .client
            .get(parsed)
            .send()
            .map_err(|e| WebAuthnError::CertificateChain(format!("Failed to fetch CRL: {e}")))?;

        if !response.status().is_success() {
            return Err(WebAuthnError::CertificateChain(format!(
                "CRL request failed with status: {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .map_err(|e| WebAuthnError::CertificateChain(format!("Failed to read CRL: {e}")))?;
        Ok(body.to_vec())
    }
}

/// CRL distribution point URIs of a certificate
///
/// # Errors
/// Returns `InvalidAttestationStatement` if the certificate cannot be parsed
pub fn distribution_points(der: &[u8]) -> Result<Vec<String>, WebAuthnError> {
    let cert = certificate::parse(der)?;
    let mut urls = Vec::new();
    for ext in cert.extensions() {
        let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() else {
            continue;
        };
        for point in &points.points {
            if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                urls.extend(names.iter().filter_map(|name| match name {
                    GeneralName::URI(uri) => Some((*uri).to_string()),
                    _ => None,
                }));
            }
        }
    }
    Ok(urls)
}

/// Checks certificates against the CRLs of their issuers
#[derive(Clone)]
pub struct RevocationChecker {
    policy: RevocationPolicy,
    fetcher: Arc<dyn CrlFetcher>,
}

impl RevocationChecker {
    #[must_use]
    pub fn new(policy: RevocationPolicy, fetcher: Arc<dyn CrlFetcher>) -> Self {
        Self { policy, fetcher }
    }

    #[must_use]
    pub fn policy(&self) -> RevocationPolicy {
        self.policy
    }

    /// Check `cert`, issued by `issuer`, against every distribution point
    ///
    /// # Errors
    /// Returns `RevokedCertificate` when a trusted CRL lists the serial, and
    /// `CertificateChain` for infrastructure failures under
    /// [`RevocationPolicy::FailClosed`]
    pub fn check(&self, cert: &X509, issuer: &X509) -> Result<(), WebAuthnError> {
        let der = cert.to_der().map_err(openssl_error("certificate DER"))?;
        for url in distribution_points(&der)? {
            match self.check_distribution_point(&url, cert, issuer) {
                Ok(()) => {}
                Err(e @ WebAuthnError::RevokedCertificate(_)) => return Err(e),
                Err(e) => match self.policy {
                    RevocationPolicy::FailClosed => return Err(e),
                    RevocationPolicy::FailOpen => {
                        warn!("⚠️ Revocation check skipped for {url}: {e}");
                    }
                },
            }
        }
        Ok(())
    }

    fn check_distribution_point(
        &self,
        url: &str,
        cert: &X509,
        issuer: &X509,
    ) -> Result<(), WebAuthnError> {
        let bytes = self.fetcher.fetch(url)?;
        let crl = X509Crl::from_der(&bytes)
            .map_err(|_| WebAuthnError::CertificateChain(format!("Invalid CRL from {url}")))?;

        let issuer_key = issuer
            .public_key()
            .map_err(openssl_error("issuer public key"))?;
        if !crl.verify(&issuer_key).unwrap_or(false) {
            return Err(WebAuthnError::CertificateChain(format!(
                "CRL from {url} is not signed by the certificate issuer"
            )));
        }

        if let Some(next_update) = crl.next_update() {
            let now = Asn1Time::days_from_now(0).map_err(openssl_error("current time"))?;
            if next_update.compare(&now).map_err(openssl_error("CRL nextUpdate"))? == Ordering::Less {
                return Err(WebAuthnError::CertificateChain(format!(
                    "CRL from {url} is stale"
                )));
            }
        }

        match crl.get_by_cert(cert) {
            CrlStatus::Revoked(_) | CrlStatus::RemoveFromCrl(_) => {
                let serial = cert
                    .serial_number()
                    .to_bn()
                    .and_then(|bn| bn.to_hex_str().map(|hex| hex.to_string()))
                    .map_err(openssl_error("certificate serial"))?;
                warn!("❌ Certificate {serial} is revoked according to {url}");
                Err(WebAuthnError::RevokedCertificate(serial))
            }
            CrlStatus::NotRevoked => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingFetcher;

    impl CrlFetcher for FailingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, WebAuthnError> {
            Err(WebAuthnError::CertificateChain(format!("unreachable: {url}")))
        }
    }

    #[test]
    fn test_policy_defaults_to_fail_closed() {
        assert_eq!(RevocationPolicy::default(), RevocationPolicy::FailClosed);
    }

    #[test]
    fn test_policy_serialization() {
        assert_eq!(
            serde_json::to_string(&RevocationPolicy::FailOpen).unwrap(),
            "\"fail_open\""
        );
        let policy: RevocationPolicy = serde_json::from_str("\"fail_closed\"").unwrap();
        assert_eq!(policy, RevocationPolicy::FailClosed);
    }

    #[test]
    fn test_checker_keeps_policy() {
        let checker = RevocationChecker::new(RevocationPolicy::FailOpen, Arc::new(FailingFetcher));
        assert_eq!(checker.policy(), RevocationPolicy::FailOpen);
    }
}
