//! `WebAuthn` extension handling
//!
//! Extension inputs are requested by the relying party in the ceremony
//! options; authenticator extension outputs come back inside authenticator
//! data. The checker decides whether the outputs are acceptable.

use std::collections::BTreeMap;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use super::errors::WebAuthnError;

/// Extension inputs requested by the relying party
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionInputs(pub BTreeMap<String, serde_json::Value>);

impl ExtensionInputs {
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.0.contains_key(identifier)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Authenticator extension outputs keyed by extension identifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionOutputs(pub BTreeMap<String, Value>);

impl ExtensionOutputs {
    /// Build outputs from the extensions map of authenticator data
    ///
    /// # Errors
    /// Returns `InvalidExtensions` if a key is not a text string
    pub fn from_authenticator_data(extensions: Option<&Value>) -> Result<Self, WebAuthnError> {
        let Some(value) = extensions else {
            return Ok(Self::default());
        };
        let map = value
            .as_map()
            .ok_or_else(|| WebAuthnError::InvalidExtensions("Outputs must be a map".to_string()))?;

        let mut outputs = BTreeMap::new();
        for (key, value) in map {
            let identifier = key.as_text().ok_or_else(|| {
                WebAuthnError::InvalidExtensions("Extension identifiers must be text".to_string())
            })?;
            outputs.insert(identifier.to_string(), value.clone());
        }
        Ok(Self(outputs))
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Validates authenticator extension outputs against requested inputs
pub trait ExtensionOutputChecker: Send + Sync {
    /// # Errors
    /// Returns `InvalidExtensions` when the outputs are unacceptable
    fn check(
        &self,
        inputs: &ExtensionInputs,
        outputs: &ExtensionOutputs,
    ) -> Result<(), WebAuthnError>;
}

/// Rejects outputs for extensions that were never requested
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestedExtensionsChecker;

impl ExtensionOutputChecker for RequestedExtensionsChecker {
    fn check(
        &self,
        inputs: &ExtensionInputs,
        outputs: &ExtensionOutputs,
    ) -> Result<(), WebAuthnError> {
        if let Some(unrequested) = outputs.identifiers().find(|id| !inputs.contains(id)) {
            return Err(WebAuthnError::InvalidExtensions(format!(
                "Unrequested extension output {unrequested}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(ids: &[&str]) -> ExtensionOutputs {
        let map = Value::Map(
            ids.iter()
                .map(|id| (Value::Text((*id).to_string()), Value::Bool(true)))
                .collect(),
        );
        ExtensionOutputs::from_authenticator_data(Some(&map)).unwrap()
    }

    #[test]
    fn test_requested_outputs_accepted() {
        let mut inputs = ExtensionInputs::default();
        inputs
            .0
            .insert("credProtect".to_string(), serde_json::json!(2));

        assert!(RequestedExtensionsChecker
            .check(&inputs, &outputs(&["credProtect"]))
            .is_ok());
        assert!(RequestedExtensionsChecker
            .check(&inputs, &ExtensionOutputs::default())
            .is_ok());
    }

    #[test]
    fn test_unrequested_output_rejected() {
        let result = RequestedExtensionsChecker.check(&ExtensionInputs::default(), &outputs(&["hmac-secret"]));
        assert!(matches!(result, Err(WebAuthnError::InvalidExtensions(_))));
    }

    #[test]
    fn test_non_text_identifier_rejected() {
        let map = Value::Map(vec![(Value::Integer(1.into()), Value::Bool(true))]);
        assert!(matches!(
            ExtensionOutputs::from_authenticator_data(Some(&map)),
            Err(WebAuthnError::InvalidExtensions(_))
        ));
    }
}
