//! COSE key representation
//!
//! Credential public keys arrive as COSE_Key maps (RFC 9052/9053). This
//! module turns the generic CBOR map into a typed key, validating that every
//! mandatory parameter is present with the length its curve requires, and
//! converts keys to and from `OpenSSL` public keys for verification.

use ciborium::value::Value;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, PKeyRef, Public};
use openssl::rsa::Rsa;

use crate::webauthn::cbor::{self, int, map_get_int, value_as_i64};
use crate::webauthn::crypto::openssl_error;
use crate::webauthn::WebAuthnError;

// Common parameters
const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
// EC2 / OKP parameters
const LABEL_CRV: i64 = -1;
const LABEL_X: i64 = -2;
const LABEL_Y: i64 = -3;
const LABEL_D: i64 = -4;
// RSA parameters
const LABEL_N: i64 = -1;
const LABEL_E: i64 = -2;
const LABEL_RSA_D: i64 = -3;
const LABEL_P: i64 = -4;
const LABEL_Q: i64 = -5;
const LABEL_DP: i64 = -6;
const LABEL_DQ: i64 = -7;
const LABEL_QINV: i64 = -8;
// Symmetric parameters
const LABEL_K: i64 = -1;

const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const KTY_RSA: i64 = 3;
const KTY_SYMMETRIC: i64 = 4;

/// Elliptic curves usable with EC2 keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    /// COSE curve identifier
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            EcCurve::P256 => 1,
            EcCurve::P384 => 2,
            EcCurve::P521 => 3,
        }
    }

    /// Byte length of each affine coordinate
    #[must_use]
    pub fn coordinate_len(self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }

    /// `OpenSSL` curve name
    #[must_use]
    pub fn nid(self) -> Nid {
        match self {
            EcCurve::P256 => Nid::X9_62_PRIME256V1,
            EcCurve::P384 => Nid::SECP384R1,
            EcCurve::P521 => Nid::SECP521R1,
        }
    }

    fn from_id(id: i64) -> Result<Self, WebAuthnError> {
        match id {
            1 => Ok(EcCurve::P256),
            2 => Ok(EcCurve::P384),
            3 => Ok(EcCurve::P521),
            other => Err(WebAuthnError::InvalidKeyData(format!(
                "Unsupported EC2 curve {other}"
            ))),
        }
    }

    fn from_nid(nid: Nid) -> Option<Self> {
        match nid {
            Nid::X9_62_PRIME256V1 => Some(EcCurve::P256),
            Nid::SECP384R1 => Some(EcCurve::P384),
            Nid::SECP521R1 => Some(EcCurve::P521),
            _ => None,
        }
    }
}

/// Edwards curves usable with OKP keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OkpCurve {
    Ed25519,
    Ed448,
}

impl OkpCurve {
    /// COSE curve identifier
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            OkpCurve::Ed25519 => 6,
            OkpCurve::Ed448 => 7,
        }
    }

    /// Byte length of the public key
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            OkpCurve::Ed25519 => 32,
            OkpCurve::Ed448 => 57,
        }
    }

    fn pkey_id(self) -> Id {
        match self {
            OkpCurve::Ed25519 => Id::ED25519,
            OkpCurve::Ed448 => Id::ED448,
        }
    }

    fn from_id(id: i64) -> Result<Self, WebAuthnError> {
        match id {
            6 => Ok(OkpCurve::Ed25519),
            7 => Ok(OkpCurve::Ed448),
            other => Err(WebAuthnError::InvalidKeyData(format!(
                "Unsupported OKP curve {other}"
            ))),
        }
    }
}

/// EC2 key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ec2Key {
    pub curve: EcCurve,
    pub x: Vec<u8>,
    pub y: Vec<u8>,
    pub d: Option<Vec<u8>>,
}

impl Ec2Key {
    /// SEC1 uncompressed point encoding (`0x04 || x || y`)
    #[must_use]
    pub fn uncompressed_point(&self) -> Vec<u8> {
        let mut point = Vec::with_capacity(1 + self.x.len() + self.y.len());
        point.push(0x04);
        point.extend_from_slice(&self.x);
        point.extend_from_slice(&self.y);
        point
    }
}

/// OKP key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkpKey {
    pub curve: OkpCurve,
    pub x: Vec<u8>,
    pub d: Option<Vec<u8>>,
}

/// RSA private parameters, kept only so a full key survives a round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPrivateParameters {
    pub d: Vec<u8>,
    pub p: Option<Vec<u8>>,
    pub q: Option<Vec<u8>>,
    pub dp: Option<Vec<u8>>,
    pub dq: Option<Vec<u8>>,
    pub qinv: Option<Vec<u8>>,
}

/// RSA key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKey {
    pub n: Vec<u8>,
    pub e: Vec<u8>,
    pub private: Option<RsaPrivateParameters>,
}

/// Symmetric key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    pub k: Vec<u8>,
}

/// Key material by COSE key type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoseKeyType {
    Ec2(Ec2Key),
    Okp(OkpKey),
    Rsa(RsaKey),
    Symmetric(SymmetricKey),
}

/// A COSE key with its optional algorithm restriction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    /// COSE algorithm identifier (`alg`, label 3)
    pub alg: Option<i64>,
    pub key: CoseKeyType,
}

impl CoseKey {
    /// Decode a COSE key from CBOR bytes
    ///
    /// # Errors
    /// Returns `InvalidKeyData` if the bytes are not a valid COSE key map
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WebAuthnError> {
        let value = cbor::decode_value(bytes)
            .map_err(|e| WebAuthnError::InvalidKeyData(e.to_string()))?;
        Self::from_cbor(&value)
    }

    /// Build a COSE key from a decoded CBOR value
    ///
    /// Dispatches on `kty` and checks that the mandatory parameters of the
    /// matching key type are present with the right lengths.
    ///
    /// # Errors
    /// Returns `InvalidKeyData` for unknown key types, missing parameters or
    /// coordinates whose length does not match the curve
    pub fn from_cbor(value: &Value) -> Result<Self, WebAuthnError> {
        let map = value
            .as_map()
            .ok_or_else(|| WebAuthnError::InvalidKeyData("COSE key is not a map".to_string()))?;

        let kty = map_get_int(map, LABEL_KTY)
            .and_then(value_as_i64)
            .ok_or_else(|| WebAuthnError::InvalidKeyData("Missing key type".to_string()))?;

        let alg = match map_get_int(map, LABEL_ALG) {
            Some(value) => Some(value_as_i64(value).ok_or_else(|| {
                WebAuthnError::InvalidKeyData("Algorithm must be an integer".to_string())
            })?),
            None => None,
        };

        let key = match kty {
            KTY_EC2 => CoseKeyType::Ec2(parse_ec2(map)?),
            KTY_OKP => CoseKeyType::Okp(parse_okp(map)?),
            KTY_RSA => CoseKeyType::Rsa(parse_rsa(map)?),
            KTY_SYMMETRIC => CoseKeyType::Symmetric(SymmetricKey {
                k: required_bytes(map, LABEL_K, "k")?,
            }),
            other => {
                return Err(WebAuthnError::InvalidKeyData(format!(
                    "Unsupported key type {other}"
                )))
            }
        };

        Ok(Self { alg, key })
    }

    /// Encode the key as a COSE_Key CBOR map
    #[must_use]
    pub fn to_cbor(&self) -> Value {
        let mut map = vec![(int(LABEL_KTY), int(self.kty()))];
        if let Some(alg) = self.alg {
            map.push((int(LABEL_ALG), int(alg)));
        }

        match &self.key {
            CoseKeyType::Ec2(ec) => {
                map.push((int(LABEL_CRV), int(ec.curve.id())));
                map.push((int(LABEL_X), Value::Bytes(ec.x.clone())));
                map.push((int(LABEL_Y), Value::Bytes(ec.y.clone())));
                if let Some(d) = &ec.d {
                    map.push((int(LABEL_D), Value::Bytes(d.clone())));
                }
            }
            CoseKeyType::Okp(okp) => {
                map.push((int(LABEL_CRV), int(okp.curve.id())));
                map.push((int(LABEL_X), Value::Bytes(okp.x.clone())));
                if let Some(d) = &okp.d {
                    map.push((int(LABEL_D), Value::Bytes(d.clone())));
                }
            }
            CoseKeyType::Rsa(rsa) => {
                map.push((int(LABEL_N), Value::Bytes(rsa.n.clone())));
                map.push((int(LABEL_E), Value::Bytes(rsa.e.clone())));
                if let Some(private) = &rsa.private {
                    map.push((int(LABEL_RSA_D), Value::Bytes(private.d.clone())));
                    let optional = [
                        (LABEL_P, &private.p),
                        (LABEL_Q, &private.q),
                        (LABEL_DP, &private.dp),
                        (LABEL_DQ, &private.dq),
                        (LABEL_QINV, &private.qinv),
                    ];
                    for (label, value) in optional {
                        if let Some(bytes) = value {
                            map.push((int(label), Value::Bytes(bytes.clone())));
                        }
                    }
                }
            }
            CoseKeyType::Symmetric(sym) => {
                map.push((int(LABEL_K), Value::Bytes(sym.k.clone())));
            }
        }

        Value::Map(map)
    }

    /// Encode the key as COSE_Key CBOR bytes
    ///
    /// # Errors
    /// Returns `InternalError` if CBOR serialization fails
    pub fn to_bytes(&self) -> Result<Vec<u8>, WebAuthnError> {
        cbor::encode_value(&self.to_cbor())
    }

    /// COSE key type identifier
    #[must_use]
    pub fn kty(&self) -> i64 {
        match self.key {
            CoseKeyType::Okp(_) => KTY_OKP,
            CoseKeyType::Ec2(_) => KTY_EC2,
            CoseKeyType::Rsa(_) => KTY_RSA,
            CoseKeyType::Symmetric(_) => KTY_SYMMETRIC,
        }
    }

    /// Convert the public part of the key into an `OpenSSL` key
    ///
    /// # Errors
    /// Returns `InvalidKeyData` if the coordinates do not describe a valid
    /// public key, and `UnsupportedAlgorithm` for symmetric keys
    pub fn to_public_pkey(&self) -> Result<PKey<Public>, WebAuthnError> {
        match &self.key {
            CoseKeyType::Ec2(ec) => {
                let group = EcGroup::from_curve_name(ec.curve.nid())
                    .map_err(openssl_error("EC group"))?;
                let x = BigNum::from_slice(&ec.x).map_err(openssl_error("EC x coordinate"))?;
                let y = BigNum::from_slice(&ec.y).map_err(openssl_error("EC y coordinate"))?;
                let ec_key = EcKey::from_public_key_affine_coordinates(&group, &x, &y)
                    .map_err(|_| {
                        WebAuthnError::InvalidKeyData("EC point is not on the curve".to_string())
                    })?;
                PKey::from_ec_key(ec_key).map_err(openssl_error("EC public key"))
            }
            CoseKeyType::Okp(okp) => PKey::public_key_from_raw_bytes(&okp.x, okp.curve.pkey_id())
                .map_err(|_| WebAuthnError::InvalidKeyData("Invalid OKP public key".to_string())),
            CoseKeyType::Rsa(rsa) => {
                let n = BigNum::from_slice(&rsa.n).map_err(openssl_error("RSA modulus"))?;
                let e = BigNum::from_slice(&rsa.e).map_err(openssl_error("RSA exponent"))?;
                let rsa_key = Rsa::from_public_components(n, e).map_err(|_| {
                    WebAuthnError::InvalidKeyData("Invalid RSA public key".to_string())
                })?;
                PKey::from_rsa(rsa_key).map_err(openssl_error("RSA public key"))
            }
            CoseKeyType::Symmetric(_) => Err(WebAuthnError::UnsupportedAlgorithm(
                "Symmetric keys cannot verify signatures".to_string(),
            )),
        }
    }

    /// Build a COSE key from an `OpenSSL` public key
    ///
    /// Used to compare certificate keys with credential keys and by the
    /// software authenticator.
    ///
    /// # Errors
    /// Returns `InvalidKeyData` for key types and curves COSE cannot express
    pub fn from_public_pkey<T>(pkey: &PKeyRef<T>, alg: Option<i64>) -> Result<Self, WebAuthnError>
    where
        T: openssl::pkey::HasPublic,
    {
        let key = match pkey.id() {
            Id::EC => {
                let ec_key = pkey.ec_key().map_err(openssl_error("EC key"))?;
                let curve = ec_key
                    .group()
                    .curve_name()
                    .and_then(EcCurve::from_nid)
                    .ok_or_else(|| WebAuthnError::InvalidKeyData("Unsupported curve".to_string()))?;
                let mut ctx = BigNumContext::new().map_err(openssl_error("BN context"))?;
                let mut x = BigNum::new().map_err(openssl_error("BN"))?;
                let mut y = BigNum::new().map_err(openssl_error("BN"))?;
                ec_key
                    .public_key()
                    .affine_coordinates(ec_key.group(), &mut x, &mut y, &mut ctx)
                    .map_err(openssl_error("EC coordinates"))?;
                let len = i32::try_from(curve.coordinate_len())
                    .map_err(|_| WebAuthnError::InternalError("Coordinate length".to_string()))?;
                CoseKeyType::Ec2(Ec2Key {
                    curve,
                    x: x.to_vec_padded(len).map_err(openssl_error("EC x"))?,
                    y: y.to_vec_padded(len).map_err(openssl_error("EC y"))?,
                    d: None,
                })
            }
            Id::ED25519 | Id::ED448 => {
                let curve = if pkey.id() == Id::ED25519 {
                    OkpCurve::Ed25519
                } else {
                    OkpCurve::Ed448
                };
                CoseKeyType::Okp(OkpKey {
                    curve,
                    x: pkey.raw_public_key().map_err(openssl_error("OKP raw key"))?,
                    d: None,
                })
            }
            Id::RSA => {
                let rsa = pkey.rsa().map_err(openssl_error("RSA key"))?;
                CoseKeyType::Rsa(RsaKey {
                    n: rsa.n().to_vec(),
                    e: rsa.e().to_vec(),
                    private: None,
                })
            }
            _ => {
                return Err(WebAuthnError::InvalidKeyData(
                    "Unsupported public key type".to_string(),
                ))
            }
        };

        Ok(Self { alg, key })
    }

    /// Whether the public parts of two keys are identical
    #[must_use]
    pub fn same_public_key(&self, other: &CoseKey) -> bool {
        match (&self.key, &other.key) {
            (CoseKeyType::Ec2(a), CoseKeyType::Ec2(b)) => {
                a.curve == b.curve && a.x == b.x && a.y == b.y
            }
            (CoseKeyType::Okp(a), CoseKeyType::Okp(b)) => a.curve == b.curve && a.x == b.x,
            (CoseKeyType::Rsa(a), CoseKeyType::Rsa(b)) => {
                strip_leading_zeros(&a.n) == strip_leading_zeros(&b.n)
                    && strip_leading_zeros(&a.e) == strip_leading_zeros(&b.e)
            }
            _ => false,
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn required_bytes(map: &[(Value, Value)], label: i64, name: &str) -> Result<Vec<u8>, WebAuthnError> {
    map_get_int(map, label)
        .and_then(Value::as_bytes)
        .cloned()
        .ok_or_else(|| WebAuthnError::InvalidKeyData(format!("Missing or invalid {name}")))
}

fn optional_bytes(
    map: &[(Value, Value)],
    label: i64,
    name: &str,
) -> Result<Option<Vec<u8>>, WebAuthnError> {
    match map_get_int(map, label) {
        None => Ok(None),
        Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
        Some(_) => Err(WebAuthnError::InvalidKeyData(format!(
            "{name} must be a byte string"
        ))),
    }
}

fn required_curve(map: &[(Value, Value)]) -> Result<i64, WebAuthnError> {
    map_get_int(map, LABEL_CRV)
        .and_then(value_as_i64)
        .ok_or_else(|| WebAuthnError::InvalidKeyData("Missing curve".to_string()))
}

fn parse_ec2(map: &[(Value, Value)]) -> Result<Ec2Key, WebAuthnError> {
    let curve = EcCurve::from_id(required_curve(map)?)?;
    let x = required_bytes(map, LABEL_X, "x coordinate")?;
    let y = required_bytes(map, LABEL_Y, "y coordinate")?;
    let d = optional_bytes(map, LABEL_D, "d")?;

    let expected = curve.coordinate_len();
    if x.len() != expected || y.len() != expected {
        return Err(WebAuthnError::InvalidKeyData(format!(
            "EC2 coordinates must be {expected} bytes for curve {}",
            curve.id()
        )));
    }
    if d.as_ref().is_some_and(|d| d.len() != expected) {
        return Err(WebAuthnError::InvalidKeyData(format!(
            "EC2 private key must be {expected} bytes"
        )));
    }

    Ok(Ec2Key { curve, x, y, d })
}

fn parse_okp(map: &[(Value, Value)]) -> Result<OkpKey, WebAuthnError> {
    let curve = OkpCurve::from_id(required_curve(map)?)?;
    let x = required_bytes(map, LABEL_X, "x coordinate")?;
    let d = optional_bytes(map, LABEL_D, "d")?;

    let expected = curve.key_len();
    if x.len() != expected || d.as_ref().is_some_and(|d| d.len() != expected) {
        return Err(WebAuthnError::InvalidKeyData(format!(
            "OKP key must be {expected} bytes for curve {}",
            curve.id()
        )));
    }

    Ok(OkpKey { curve, x, d })
}

fn parse_rsa(map: &[(Value, Value)]) -> Result<RsaKey, WebAuthnError> {
    let n = required_bytes(map, LABEL_N, "modulus")?;
    let e = required_bytes(map, LABEL_E, "exponent")?;
    if n.is_empty() || e.is_empty() {
        return Err(WebAuthnError::InvalidKeyData(
            "RSA modulus and exponent must not be empty".to_string(),
        ));
    }

    let private = match optional_bytes(map, LABEL_RSA_D, "d")? {
        Some(d) => Some(RsaPrivateParameters {
            d,
            p: optional_bytes(map, LABEL_P, "p")?,
            q: optional_bytes(map, LABEL_Q, "q")?,
            dp: optional_bytes(map, LABEL_DP, "dP")?,
            dq: optional_bytes(map, LABEL_DQ, "dQ")?,
            qinv: optional_bytes(map, LABEL_QINV, "qInv")?,
        }),
        None => None,
    };

    Ok(RsaKey { n, e, private })
}
