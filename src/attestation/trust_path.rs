//! Attestation trust path model

use serde::{Deserialize, Serialize};

/// Evidence an attestation statement offers for the credential's provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TrustPath {
    /// No evidence (none and self attestation)
    Empty,
    /// PEM certificates, leaf first
    CertificateChain(Vec<String>),
    /// ECDAA issuer key identifier
    EcdaaKeyId(Vec<u8>),
}

impl TrustPath {
    /// Certificates of a chain trust path, if any
    #[must_use]
    pub fn certificates(&self) -> Option<&[String]> {
        match self {
            TrustPath::CertificateChain(chain) => Some(chain),
            TrustPath::Empty | TrustPath::EcdaaKeyId(_) => None,
        }
    }
}

/// Attestation type established by a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationType {
    None,
    Basic,
    #[serde(rename = "self")]
    SelfAttestation,
    #[serde(rename = "attca")]
    AttCa,
    #[serde(rename = "anonca")]
    AnonCa,
    Ecdaa,
}

impl AttestationType {
    /// Name as serialized
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AttestationType::None => "none",
            AttestationType::Basic => "basic",
            AttestationType::SelfAttestation => "self",
            AttestationType::AttCa => "attca",
            AttestationType::AnonCa => "anonca",
            AttestationType::Ecdaa => "ecdaa",
        }
    }

    /// Whether the trust path carries certificates to validate
    #[must_use]
    pub fn uses_certificates(self) -> bool {
        matches!(
            self,
            AttestationType::Basic | AttestationType::AttCa | AttestationType::AnonCa
        )
    }
}
