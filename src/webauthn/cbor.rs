//! CBOR processing for `WebAuthn`
//!
//! This module handles the CBOR (Concise Binary Object Representation)
//! processing needed for `WebAuthn` attestation objects, attestation
//! statements and COSE keys. Decoding itself is delegated to `ciborium`;
//! the helpers here only look values up and check their types.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::de::from_reader;
use ciborium::value::Value;

use super::errors::WebAuthnError;

/// A CBOR map as decoded by `ciborium`
pub type CborMap = Vec<(Value, Value)>;

/// Decoded `attestationObject`
#[derive(Debug, Clone)]
pub struct AttestationObject {
    /// Attestation statement format identifier (`fmt`)
    pub fmt: String,
    /// Format specific attestation statement (`attStmt`)
    pub att_stmt: CborMap,
    /// Raw authenticator data (`authData`)
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    /// Decode an attestation object from its base64url form
    ///
    /// # Errors
    /// Returns `MalformedInput` if the encoding, the CBOR or any of the
    /// `fmt`, `attStmt` and `authData` entries is missing or ill-typed
    pub fn from_base64url(attestation_object_b64: &str) -> Result<Self, WebAuthnError> {
        // 1. Decode the base64 attestation object
        let attestation_bytes = URL_SAFE_NO_PAD
            .decode(attestation_object_b64.trim_end_matches('='))
            .map_err(|_| {
                WebAuthnError::MalformedInput("Invalid attestation object encoding".to_string())
            })?;

        Self::from_bytes(&attestation_bytes)
    }

    /// Decode an attestation object from raw CBOR bytes
    ///
    /// # Errors
    /// Returns `MalformedInput` if the CBOR is invalid or ill-typed
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WebAuthnError> {
        // 2. Parse CBOR
        let value = decode_value(bytes)?;
        let Value::Map(map) = value else {
            return Err(WebAuthnError::MalformedInput(
                "Attestation object is not a CBOR map".to_string(),
            ));
        };

        // 3. Extract the three members
        let fmt = map_get_text(&map, "fmt")
            .ok_or_else(|| WebAuthnError::MalformedInput("Missing fmt in attestation".to_string()))?
            .to_string();

        let att_stmt = match map_get(&map, "attStmt") {
            Some(Value::Map(stmt)) => stmt.clone(),
            Some(_) => {
                return Err(WebAuthnError::MalformedInput(
                    "attStmt must be a CBOR map".to_string(),
                ))
            }
            None => {
                return Err(WebAuthnError::MalformedInput(
                    "Missing attStmt in attestation".to_string(),
                ))
            }
        };

        let auth_data = map_get_bytes(&map, "authData")
            .ok_or_else(|| {
                WebAuthnError::MalformedInput("Missing authData in attestation".to_string())
            })?
            .to_vec();

        Ok(Self {
            fmt,
            att_stmt,
            auth_data,
        })
    }
}

/// Decode a single CBOR value that must span the whole input
///
/// # Errors
/// Returns `MalformedInput` if the bytes are not one well-formed CBOR item
pub fn decode_value(bytes: &[u8]) -> Result<Value, WebAuthnError> {
    let mut rest = bytes;
    let value: Value = from_reader(&mut rest)
        .map_err(|e| WebAuthnError::MalformedInput(format!("Invalid CBOR: {e}")))?;
    if !rest.is_empty() {
        return Err(WebAuthnError::MalformedInput(format!(
            "{} trailing bytes after CBOR item",
            rest.len()
        )));
    }
    Ok(value)
}

/// Decode one CBOR value from the front of `bytes`
///
/// Returns the value and the number of bytes it occupied.
///
/// # Errors
/// Returns `MalformedAuthenticatorData` if no complete item is available
pub fn decode_prefix(bytes: &[u8]) -> Result<(Value, usize), WebAuthnError> {
    let mut rest = bytes;
    let value: Value = from_reader(&mut rest).map_err(|e| {
        WebAuthnError::MalformedAuthenticatorData(format!("Invalid embedded CBOR: {e}"))
    })?;
    Ok((value, bytes.len() - rest.len()))
}

/// Encode a CBOR value into bytes
///
/// # Errors
/// Returns `InternalError` if serialization fails
pub fn encode_value(value: &Value) -> Result<Vec<u8>, WebAuthnError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| WebAuthnError::InternalError(format!("CBOR encoding failed: {e}")))?;
    Ok(out)
}

/// Look up a text-keyed entry
#[must_use]
pub fn map_get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Look up an integer-keyed entry (COSE labels)
#[must_use]
pub fn map_get_int(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| value_as_i64(k) == Some(key))
        .map(|(_, v)| v)
}

/// Look up a text-keyed byte string
#[must_use]
pub fn map_get_bytes<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a [u8]> {
    map_get(map, key).and_then(Value::as_bytes).map(Vec::as_slice)
}

/// Look up a text-keyed text string
#[must_use]
pub fn map_get_text<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a str> {
    map_get(map, key).and_then(Value::as_text)
}

/// Interpret a CBOR value as a signed 64-bit integer
#[must_use]
pub fn value_as_i64(value: &Value) -> Option<i64> {
    value
        .as_integer()
        .and_then(|integer| i64::try_from(integer).ok())
}

/// Build an integer CBOR value
#[must_use]
pub fn int(value: i64) -> Value {
    Value::Integer(value.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attestation_map(entries: Vec<(&str, Value)>) -> Vec<u8> {
        let map = Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k.to_string()), v))
                .collect(),
        );
        encode_value(&map).unwrap()
    }

    #[test]
    fn test_attestation_object_decoding() {
        let bytes = attestation_map(vec![
            ("fmt", Value::Text("none".to_string())),
            ("attStmt", Value::Map(vec![])),
            ("authData", Value::Bytes(vec![1, 2, 3])),
        ]);
        let b64 = URL_SAFE_NO_PAD.encode(&bytes);

        let object = AttestationObject::from_base64url(&b64).unwrap();
        assert_eq!(object.fmt, "none");
        assert!(object.att_stmt.is_empty());
        assert_eq!(object.auth_data, vec![1, 2, 3]);
    }

    #[test]
    fn test_attestation_object_missing_members() {
        let bytes = attestation_map(vec![
            ("fmt", Value::Text("none".to_string())),
            ("authData", Value::Bytes(vec![0; 37])),
        ]);
        let result = AttestationObject::from_bytes(&bytes);
        assert!(matches!(result, Err(WebAuthnError::MalformedInput(_))));

        let bytes = attestation_map(vec![
            ("fmt", Value::Integer(1.into())),
            ("attStmt", Value::Map(vec![])),
            ("authData", Value::Bytes(vec![0; 37])),
        ]);
        let result = AttestationObject::from_bytes(&bytes);
        assert!(matches!(result, Err(WebAuthnError::MalformedInput(_))));
    }

    #[test]
    fn test_decode_value_rejects_trailing_bytes() {
        let mut bytes = encode_value(&int(-7)).unwrap();
        bytes.push(0x00);
        assert!(matches!(
            decode_value(&bytes),
            Err(WebAuthnError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_decode_prefix_reports_consumed_length() {
        let mut bytes = encode_value(&Value::Map(vec![(int(1), int(2))])).unwrap();
        let item_len = bytes.len();
        bytes.extend_from_slice(&[0xde, 0xad]);

        let (value, consumed) = decode_prefix(&bytes).unwrap();
        assert_eq!(consumed, item_len);
        let map = value.as_map().unwrap();
        assert_eq!(map_get_int(map, 1).and_then(value_as_i64), Some(2));
    }
}
