//! Authenticator metadata
//!
//! Metadata statements and status reports use the FIDO Metadata Service
//! (MDS3) vocabulary. They supply the trust anchors for an AAGUID and flag
//! authenticator models whose keys are known to be compromised.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::webauthn::crypto::der_to_pem;
use crate::webauthn::WebAuthnError;

/// MDS3 authenticator status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticatorStatus {
    NotFidoCertified,
    FidoCertified,
    UserVerificationBypass,
    AttestationKeyCompromise,
    UserKeyRemoteCompromise,
    UserKeyPhysicalCompromise,
    UpdateAvailable,
    Revoked,
    SelfAssertionSubmitted,
    FidoCertifiedL1,
    #[serde(rename = "FIDO_CERTIFIED_L1plus")]
    FidoCertifiedL1Plus,
    FidoCertifiedL2,
    #[serde(rename = "FIDO_CERTIFIED_L2plus")]
    FidoCertifiedL2Plus,
    FidoCertifiedL3,
    #[serde(rename = "FIDO_CERTIFIED_L3plus")]
    FidoCertifiedL3Plus,
    #[serde(other)]
    Unknown,
}

impl AuthenticatorStatus {
    /// Whether attestations from this authenticator must be rejected
    #[must_use]
    pub fn is_compromised(self) -> bool {
        matches!(
            self,
            AuthenticatorStatus::AttestationKeyCompromise
                | AuthenticatorStatus::UserVerificationBypass
                | AuthenticatorStatus::UserKeyRemoteCompromise
                | AuthenticatorStatus::UserKeyPhysicalCompromise
                | AuthenticatorStatus::Revoked
        )
    }
}

/// A dated status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: AuthenticatorStatus,
    /// `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl StatusReport {
    fn effective_date(&self) -> Option<NaiveDate> {
        self.effective_date
            .as_deref()
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
    }
}

/// Subset of an MDS3 metadata statement used for attestation trust
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataStatement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aaguid: Option<Uuid>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attestation_types: Vec<String>,
    /// Base64 (standard alphabet) DER certificates
    #[serde(default)]
    pub attestation_root_certificates: Vec<String>,
}

/// One entry of a metadata BLOB
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBlobEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aaguid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_statement: Option<MetadataStatement>,
    #[serde(default)]
    pub status_reports: Vec<StatusReport>,
}

impl MetadataBlobEntry {
    fn key(&self) -> Option<Uuid> {
        self.aaguid
            .or_else(|| self.metadata_statement.as_ref().and_then(|s| s.aaguid))
    }
}

/// Read-only metadata lookup by AAGUID
pub trait MetadataStatementRepository: Send + Sync {
    fn find_statement(&self, aaguid: &Uuid) -> Option<MetadataStatement>;

    fn find_status_reports(&self, aaguid: &Uuid) -> Vec<StatusReport>;
}

/// Metadata held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataRepository {
    entries: HashMap<Uuid, MetadataBlobEntry>,
}

impl InMemoryMetadataRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry; entries without an AAGUID are ignored
    pub fn insert(&mut self, entry: MetadataBlobEntry) {
        match entry.key() {
            Some(aaguid) => {
                self.entries.insert(aaguid, entry);
            }
            None => warn!("⚠️ Ignoring metadata entry without AAGUID"),
        }
    }

    /// Load a JSON array of metadata statements
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the JSON is not an array of statements
    pub fn from_json(json: &str) -> Result<Self, WebAuthnError> {
        let statements: Vec<MetadataStatement> = serde_json::from_str(json)
            .map_err(|e| WebAuthnError::ConfigurationError(format!("Invalid metadata: {e}")))?;
        let mut repository = Self::new();
        for statement in statements {
            repository.insert(MetadataBlobEntry {
                aaguid: statement.aaguid,
                metadata_statement: Some(statement),
                status_reports: Vec::new(),
            });
        }
        Ok(repository)
    }

    /// Load the `entries` array of a decoded metadata BLOB payload
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the JSON is not an array of entries
    pub fn from_blob_entries_json(json: &str) -> Result<Self, WebAuthnError> {
        let entries: Vec<MetadataBlobEntry> = serde_json::from_str(json).map_err(|e| {
            WebAuthnError::ConfigurationError(format!("Invalid metadata entries: {e}"))
        })?;
        let mut repository = Self::new();
        for entry in entries {
            repository.insert(entry);
        }
        Ok(repository)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetadataStatementRepository for InMemoryMetadataRepository {
    fn find_statement(&self, aaguid: &Uuid) -> Option<MetadataStatement> {
        self.entries
            .get(aaguid)
            .and_then(|entry| entry.metadata_statement.clone())
    }

    fn find_status_reports(&self, aaguid: &Uuid) -> Vec<StatusReport> {
        self.entries
            .get(aaguid)
            .map(|entry| entry.status_reports.clone())
            .unwrap_or_default()
    }
}

/// Resolves trust anchors and status for an AAGUID
#[derive(Clone)]
pub struct MetadataTrustResolver {
    repository: Arc<dyn MetadataStatementRepository>,
    require_statement: bool,
}

impl MetadataTrustResolver {
    /// `require_statement` rejects authenticators without a metadata statement
    #[must_use]
    pub fn new(repository: Arc<dyn MetadataStatementRepository>, require_statement: bool) -> Self {
        Self {
            repository,
            require_statement,
        }
    }

    /// Reject authenticators without a metadata statement
    #[must_use]
    pub fn requiring_statement(mut self) -> Self {
        self.require_statement = true;
        self
    }

    #[must_use]
    pub fn requires_statement(&self) -> bool {
        self.require_statement
    }

    /// PEM trust anchors from the metadata statement, if there is one
    ///
    /// # Errors
    /// Returns `ConfigurationError` if a root certificate is not base64 DER
    pub fn resolve_trust_anchors(&self, aaguid: &Uuid) -> Result<Option<Vec<String>>, WebAuthnError> {
        let Some(statement) = self.repository.find_statement(aaguid) else {
            return Ok(None);
        };
        statement
            .attestation_root_certificates
            .iter()
            .map(|encoded| {
                let der = STANDARD.decode(encoded).map_err(|_| {
                    WebAuthnError::ConfigurationError(format!(
                        "Invalid attestation root certificate in metadata for {aaguid}"
                    ))
                })?;
                der_to_pem(&der)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// The most recent status report
    #[must_use]
    pub fn status_of(&self, aaguid: &Uuid) -> Option<StatusReport> {
        self.repository
            .find_status_reports(aaguid)
            .into_iter()
            .max_by_key(StatusReport::effective_date)
    }

    /// Apply the metadata policy to an attested authenticator
    ///
    /// # Errors
    /// Returns `MissingMetadataStatement` when a statement is required but
    /// absent and `CompromisedAuthenticator` when the latest status report
    /// marks the authenticator as compromised
    pub fn check(&self, aaguid: &Uuid) -> Result<(), WebAuthnError> {
        if self.repository.find_statement(aaguid).is_none() {
            if self.require_statement {
                return Err(WebAuthnError::MissingMetadataStatement(*aaguid));
            }
            debug!("No metadata statement for {aaguid}, proceeding");
        }

        if let Some(report) = self.status_of(aaguid) {
            if report.status.is_compromised() {
                warn!("❌ Authenticator {aaguid} has status {:?}", report.status);
                return Err(WebAuthnError::CompromisedAuthenticator(*aaguid));
            }
        }
        Ok(())
    }
}
