//! Authenticator data parsing
//!
//! Authenticator data is the binary structure signed by the authenticator in
//! both ceremonies:
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, big-endian)
//!   [ aaguid (16) | credentialIdLength (2) | credentialId (L) | COSE key ]   if AT
//!   [ extensions (CBOR map) ]                                                if ED
//! ```
//!
//! Parsing is strict: every flagged section must be present in full and no
//! bytes may remain once all of them have been consumed.

use ciborium::value::Value;
use uuid::Uuid;

use super::cbor::decode_prefix;
use super::errors::WebAuthnError;
use crate::cose::CoseKey;

/// Length of the fixed header
pub const MIN_AUTHENTICATOR_DATA_LENGTH: usize = 37;

const AAGUID_LENGTH: usize = 16;
const MAX_CREDENTIAL_ID_LENGTH: usize = 1023;

/// Authenticator data flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorFlags(u8);

impl AuthenticatorFlags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const BACKUP_ELIGIBLE: u8 = 0x08;
    pub const BACKUP_STATE: u8 = 0x10;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;

    #[must_use]
    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn user_present(self) -> bool {
        self.0 & Self::USER_PRESENT != 0
    }

    #[must_use]
    pub fn user_verified(self) -> bool {
        self.0 & Self::USER_VERIFIED != 0
    }

    #[must_use]
    pub fn backup_eligible(self) -> bool {
        self.0 & Self::BACKUP_ELIGIBLE != 0
    }

    #[must_use]
    pub fn backup_state(self) -> bool {
        self.0 & Self::BACKUP_STATE != 0
    }

    #[must_use]
    pub fn has_attested_credential_data(self) -> bool {
        self.0 & Self::ATTESTED_CREDENTIAL_DATA != 0
    }

    #[must_use]
    pub fn has_extension_data(self) -> bool {
        self.0 & Self::EXTENSION_DATA != 0
    }
}

/// Credential data attached during registration
#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    /// Authenticator model identifier
    pub aaguid: Uuid,
    pub credential_id: Vec<u8>,
    /// COSE key bytes exactly as they appeared in the authenticator data
    pub credential_public_key_bytes: Vec<u8>,
    pub credential_public_key: CoseKey,
}

/// Parsed authenticator data
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    raw: Vec<u8>,
    pub rp_id_hash: [u8; 32],
    pub flags: AuthenticatorFlags,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
    /// Authenticator extension outputs (a CBOR map)
    pub extensions: Option<Value>,
}

/// Cursor over the remaining bytes
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], WebAuthnError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                WebAuthnError::MalformedAuthenticatorData(format!(
                    "Not enough bytes for {what}: need {len}, have {}",
                    self.bytes.len() - self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_cbor(&mut self, what: &str) -> Result<(Value, &'a [u8]), WebAuthnError> {
        let rest = &self.bytes[self.pos..];
        if rest.is_empty() {
            return Err(WebAuthnError::MalformedAuthenticatorData(format!(
                "Missing {what}"
            )));
        }
        let (value, consumed) = decode_prefix(rest)?;
        let slice = &rest[..consumed];
        self.pos += consumed;
        Ok((value, slice))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

impl AuthenticatorData {
    /// Parse authenticator data
    ///
    /// # Arguments
    /// * `bytes` - Raw authenticator data
    ///
    /// # Errors
    /// Returns `MalformedAuthenticatorData` if any flagged section is
    /// truncated, if bytes remain after the last section, or if the backup
    /// state flag is set without backup eligibility. Returns `InvalidKeyData`
    /// if the embedded credential public key is not a valid COSE key.
    pub fn parse(bytes: &[u8]) -> Result<Self, WebAuthnError> {
        if bytes.len() < MIN_AUTHENTICATOR_DATA_LENGTH {
            return Err(WebAuthnError::MalformedAuthenticatorData(format!(
                "Authenticator data must be at least {MIN_AUTHENTICATOR_DATA_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }

        let mut reader = Reader { bytes, pos: 0 };

        // 1. Fixed header
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(reader.take(32, "rpIdHash")?);
        let flags = AuthenticatorFlags::new(reader.take(1, "flags")?[0]);
        let counter_bytes = reader.take(4, "signCount")?;
        let sign_count = u32::from_be_bytes([
            counter_bytes[0],
            counter_bytes[1],
            counter_bytes[2],
            counter_bytes[3],
        ]);

        if flags.backup_state() && !flags.backup_eligible() {
            return Err(WebAuthnError::MalformedAuthenticatorData(
                "Backup state set on a credential that is not backup eligible".to_string(),
            ));
        }

        // 2. Attested credential data
        let attested_credential_data = if flags.has_attested_credential_data() {
            let aaguid_bytes = reader.take(AAGUID_LENGTH, "AAGUID")?;
            let aaguid = Uuid::from_slice(aaguid_bytes).map_err(|_| {
                WebAuthnError::MalformedAuthenticatorData("Invalid AAGUID".to_string())
            })?;

            let len_bytes = reader.take(2, "credential id length")?;
            let id_len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
            if id_len > MAX_CREDENTIAL_ID_LENGTH {
                return Err(WebAuthnError::MalformedAuthenticatorData(format!(
                    "Credential id length {id_len} exceeds {MAX_CREDENTIAL_ID_LENGTH}"
                )));
            }
            let credential_id = reader.take(id_len, "credential id")?.to_vec();

            let (key_value, key_bytes) = reader.take_cbor("credential public key")?;
            let credential_public_key = CoseKey::from_cbor(&key_value)?;

            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                credential_public_key_bytes: key_bytes.to_vec(),
                credential_public_key,
            })
        } else {
            None
        };

        // 3. Extensions
        let extensions = if flags.has_extension_data() {
            let (value, _) = reader.take_cbor("extensions")?;
            if value.as_map().is_none() {
                return Err(WebAuthnError::MalformedAuthenticatorData(
                    "Extensions must be a CBOR map".to_string(),
                ));
            }
            Some(value)
        } else {
            None
        };

        // 4. Strict length accounting
        if reader.remaining() != 0 {
            return Err(WebAuthnError::MalformedAuthenticatorData(format!(
                "{} unexpected trailing bytes",
                reader.remaining()
            )));
        }

        Ok(Self {
            raw: bytes.to_vec(),
            rp_id_hash,
            flags,
            sign_count,
            attested_credential_data,
            extensions,
        })
    }

    /// The bytes this structure was parsed from
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}
