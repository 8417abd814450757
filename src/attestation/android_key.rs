//! `android-key` attestation
//!
//! Android keystore attestation. The leaf certificate of `x5c` certifies the
//! credential key itself and carries a key description extension that binds
//! the client data hash and records where and how the key was generated.

use der_parser::ber::{BerObject, BerObjectContent};
use log::debug;

use super::certificate;
use super::{
    AttestationFormat, AttestationStatement, AttestationStatementVerifier, AttestationType,
};
use crate::cose::CoseKey;
use crate::webauthn::authenticator_data::AuthenticatorData;
use crate::webauthn::cbor::AttestationObject;
use crate::webauthn::crypto::constant_time_eq;
use crate::webauthn::WebAuthnError;

/// Android key attestation extension
pub const OID_ANDROID_KEY_DESCRIPTION: &str = "1.3.6.1.4.1.11129.2.1.17";

const TAG_PURPOSE: u32 = 1;
const TAG_ALL_APPLICATIONS: u32 = 600;
const TAG_ORIGIN: u32 = 702;

const KM_PURPOSE_SIGN: u64 = 2;
const KM_ORIGIN_GENERATED: u64 = 0;

/// Fields of an `AuthorizationList` relevant to `WebAuthn`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationList {
    pub purpose: Vec<u64>,
    pub all_applications: bool,
    pub origin: Option<u64>,
}

/// Parsed `KeyDescription` extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    pub attestation_challenge: Vec<u8>,
    pub software_enforced: AuthorizationList,
    pub tee_enforced: AuthorizationList,
}

fn invalid(message: &str) -> WebAuthnError {
    WebAuthnError::InvalidAttestationStatement(message.to_string())
}

impl KeyDescription {
    /// Parse the DER `KeyDescription` sequence
    ///
    /// # Errors
    /// Returns `InvalidAttestationStatement` if the structure is not a
    /// `KeyDescription`
    pub fn from_der(bytes: &[u8]) -> Result<Self, WebAuthnError> {
        let (_, object) =
            der_parser::parse_der(bytes).map_err(|_| invalid("Invalid key description DER"))?;
        let fields = object
            .as_sequence()
            .map_err(|_| invalid("Key description is not a sequence"))?;
        if fields.len() < 8 {
            return Err(invalid("Key description is truncated"));
        }

        let attestation_challenge = fields[4]
            .as_slice()
            .map_err(|_| invalid("attestationChallenge is not an OCTET STRING"))?
            .to_vec();

        Ok(Self {
            attestation_challenge,
            software_enforced: parse_authorization_list(&fields[6])?,
            tee_enforced: parse_authorization_list(&fields[7])?,
        })
    }
}

fn parse_authorization_list(object: &BerObject<'_>) -> Result<AuthorizationList, WebAuthnError> {
    let items = object
        .as_sequence()
        .map_err(|_| invalid("AuthorizationList is not a sequence"))?;

    let mut list = AuthorizationList::default();
    for item in items {
        // Every member is an explicitly tagged context-specific field
        let BerObjectContent::Unknown(any) = &item.content else {
            continue;
        };
        match item.header.tag().0 {
            TAG_PURPOSE => {
                let (_, inner) =
                    der_parser::parse_der(any.data).map_err(|_| invalid("Invalid purpose"))?;
                let BerObjectContent::Set(values) = &inner.content else {
                    return Err(invalid("purpose is not a SET"));
                };
                for value in values {
                    list.purpose
                        .push(value.as_u64().map_err(|_| invalid("Invalid purpose value"))?);
                }
            }
            TAG_ALL_APPLICATIONS => list.all_applications = true,
            TAG_ORIGIN => {
                let (_, inner) =
                    der_parser::parse_der(any.data).map_err(|_| invalid("Invalid origin"))?;
                list.origin = Some(inner.as_u64().map_err(|_| invalid("Invalid origin value"))?);
            }
            _ => {}
        }
    }
    Ok(list)
}

/// `android-key` verifier
#[derive(Debug, Clone, Copy)]
pub struct AndroidKeyAttestation {
    /// Require origin and purpose to be enforced by the trusted environment
    require_tee: bool,
}

impl AndroidKeyAttestation {
    #[must_use]
    pub fn new(require_tee: bool) -> Self {
        Self { require_tee }
    }

    fn key_properties_ok(&self, description: &KeyDescription) -> bool {
        let generated_for_signing = |list: &AuthorizationList| {
            list.origin == Some(KM_ORIGIN_GENERATED) && list.purpose.contains(&KM_PURPOSE_SIGN)
        };

        if self.require_tee {
            return generated_for_signing(&description.tee_enforced);
        }

        let origin = description
            .tee_enforced
            .origin
            .or(description.software_enforced.origin);
        let purpose_sign = description.tee_enforced.purpose.contains(&KM_PURPOSE_SIGN)
            || description
                .software_enforced
                .purpose
                .contains(&KM_PURPOSE_SIGN);
        origin == Some(KM_ORIGIN_GENERATED) && purpose_sign
    }
}

impl Default for AndroidKeyAttestation {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AttestationStatementVerifier for AndroidKeyAttestation {
    fn name(&self) -> &'static str {
        AttestationFormat::AndroidKey.as_str()
    }

    fn load(&self, attestation: &AttestationObject) -> Result<AttestationStatement, WebAuthnError> {
        let att_stmt = &attestation.att_stmt;
        certificate::algorithm(att_stmt)?;
        certificate::signature(att_stmt)?;
        let chain = certificate::x5c_certificates(att_stmt)?;

        Ok(AttestationStatement {
            format: AttestationFormat::AndroidKey,
            att_stmt: att_stmt.clone(),
            attestation_type: AttestationType::Basic,
            trust_path: certificate::trust_path(&chain)?,
        })
    }

    fn is_valid(
        &self,
        client_data_hash: &[u8],
        statement: &AttestationStatement,
        auth_data: &AuthenticatorData,
    ) -> Result<bool, WebAuthnError> {
        let attested = auth_data.attested_credential_data.as_ref().ok_or_else(|| {
            WebAuthnError::MalformedAuthenticatorData("Missing attested credential data".to_string())
        })?;

        let alg = certificate::algorithm(&statement.att_stmt)?;
        let sig = certificate::signature(&statement.att_stmt)?;
        let chain = certificate::x5c_certificates(&statement.att_stmt)?;
        let leaf_der = &chain[0];

        // 1. Signature over authenticatorData || clientDataHash
        let mut signed = auth_data.raw().to_vec();
        signed.extend_from_slice(client_data_hash);
        let cert_key = certificate::public_key(leaf_der)?;
        if !crate::cose::verify_with_pkey(alg, &cert_key, &signed, &sig)? {
            debug!("❌ android-key signature does not verify");
            return Ok(false);
        }

        // 2. The certificate certifies the credential key
        let leaf_key = CoseKey::from_public_pkey(&cert_key, None)?;
        if !leaf_key.same_public_key(&attested.credential_public_key) {
            debug!("❌ android-key certificate key differs from credential key");
            return Ok(false);
        }

        // 3. Key description binds the client data hash
        let leaf = certificate::parse(leaf_der)?;
        let extension = certificate::find_extension(&leaf, OID_ANDROID_KEY_DESCRIPTION)
            .ok_or_else(|| invalid("Missing Android key description extension"))?;
        let description = KeyDescription::from_der(extension.value)?;

        if !constant_time_eq(&description.attestation_challenge, client_data_hash) {
            debug!("❌ android-key attestationChallenge does not match client data hash");
            return Ok(false);
        }

        // 4. Key must be bound to this application
        if description.software_enforced.all_applications
            || description.tee_enforced.all_applications
        {
            debug!("❌ android-key key is usable by all applications");
            return Ok(false);
        }

        // 5. Key generated on the device for signing
        if !self.key_properties_ok(&description) {
            debug!(
                "❌ android-key origin/purpose requirements not met (require TEE: {})",
                self.require_tee
            );
            return Ok(false);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // KeyDescription with challenge "abc", software list {allApplications},
    // TEE list {purpose: {2}, origin: 0}
    fn key_description_der(all_applications: bool) -> Vec<u8> {
        let software: Vec<u8> = if all_applications {
            // [600] EXPLICIT NULL
            vec![0x30, 0x06, 0xbf, 0x84, 0x58, 0x02, 0x05, 0x00]
        } else {
            vec![0x30, 0x00]
        };
        let tee: Vec<u8> = vec![
            0x30, 0x0e, // SEQUENCE
            0xa1, 0x05, 0x31, 0x03, 0x02, 0x01, 0x02, // [1] SET { INTEGER 2 }
            0xbf, 0x85, 0x3e, 0x03, 0x02, 0x01, 0x00, // [702] INTEGER 0
        ];

        let mut body = vec![
            0x02, 0x01, 0x03, // attestationVersion
            0x0a, 0x01, 0x01, // attestationSecurityLevel
            0x02, 0x01, 0x04, // keymasterVersion
            0x0a, 0x01, 0x01, // keymasterSecurityLevel
            0x04, 0x03, b'a', b'b', b'c', // attestationChallenge
            0x04, 0x00, // uniqueId
        ];
        body.extend_from_slice(&software);
        body.extend_from_slice(&tee);

        let mut der = vec![0x30, u8::try_from(body.len()).unwrap()];
        der.extend_from_slice(&body);
        der
    }

    #[test]
    fn test_parse_key_description() {
        let description = KeyDescription::from_der(&key_description_der(false)).unwrap();
        assert_eq!(description.attestation_challenge, b"abc");
        assert_eq!(description.tee_enforced.purpose, vec![KM_PURPOSE_SIGN]);
        assert_eq!(description.tee_enforced.origin, Some(KM_ORIGIN_GENERATED));
        assert!(!description.software_enforced.all_applications);
        assert!(AndroidKeyAttestation::new(true).key_properties_ok(&description));
    }

    #[test]
    fn test_all_applications_flag_detected() {
        let description = KeyDescription::from_der(&key_description_der(true)).unwrap();
        assert!(description.software_enforced.all_applications);
    }

    #[test]
    fn test_software_only_properties_need_relaxed_policy() {
        let description = KeyDescription {
            attestation_challenge: vec![],
            software_enforced: AuthorizationList {
                purpose: vec![KM_PURPOSE_SIGN],
                all_applications: false,
                origin: Some(KM_ORIGIN_GENERATED),
            },
            tee_enforced: AuthorizationList::default(),
        };
        assert!(!AndroidKeyAttestation::new(true).key_properties_ok(&description));
        assert!(AndroidKeyAttestation::new(false).key_properties_ok(&description));
    }

    #[test]
    fn test_truncated_key_description() {
        assert!(matches!(
            KeyDescription::from_der(&[0x30, 0x03, 0x02, 0x01, 0x03]),
            Err(WebAuthnError::InvalidAttestationStatement(_))
        ));
    }
}
