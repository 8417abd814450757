//! Mock objects and fake implementations for testing
//!
//! [`SoftwareAuthenticator`] produces registration and authentication
//! responses the way a browser would hand them to the relying party, and the
//! CRL fetchers stand in for distribution point servers.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use ciborium::value::Value;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use uuid::Uuid;

use super::builders::{
    android_key_description, apple_nonce_extension, p256_key, TestCertificate,
    TestCertificateBuilder,
};
use crate::attestation::android_key::OID_ANDROID_KEY_DESCRIPTION;
use crate::attestation::apple::OID_APPLE_NONCE;
use crate::cose::{CoseAlgorithm, CoseKey, CoseKeyType};
use crate::trust::CrlFetcher;
use crate::webauthn::cbor::{encode_value, int};
use crate::webauthn::crypto::sha256;
use crate::webauthn::{
    AuthenticationResponse, AuthenticatorAssertionResponse, AuthenticatorAttestationResponse,
    AuthenticatorFlags, CeremonyType, RegistrationResponse, WebAuthnError,
    PUBLIC_KEY_CREDENTIAL_TYPE,
};

/// Attestation statement the software authenticator attaches on registration
#[derive(Clone)]
pub enum TestAttestation {
    /// `none` format
    None,
    /// `packed` self attestation with the credential key
    PackedSelf,
    /// `packed` basic attestation; the chain is leaf first
    Packed(Vec<TestCertificate>),
    /// `fido-u2f` with a single attestation certificate
    FidoU2f(TestCertificate),
    /// `android-key` with a keystore certificate for the credential key
    AndroidKey(AndroidKeyStatement),
    /// `android-safetynet` with a signed SafetyNet response
    AndroidSafetyNet(SafetyNetStatement),
    /// `apple` anonymous attestation
    Apple(AppleStatement),
    /// `tpm` certify attestation signed by an AIK
    Tpm(TpmStatement),
}

impl TestAttestation {
    fn format(&self) -> &'static str {
        match self {
            TestAttestation::None => "none",
            TestAttestation::PackedSelf | TestAttestation::Packed(_) => "packed",
            TestAttestation::FidoU2f(_) => "fido-u2f",
            TestAttestation::AndroidKey(_) => "android-key",
            TestAttestation::AndroidSafetyNet(_) => "android-safetynet",
            TestAttestation::Apple(_) => "apple",
            TestAttestation::Tpm(_) => "tpm",
        }
    }
}

/// Android keystore attestation parameters
///
/// The keystore certificate is issued by `issuer` at registration, for the
/// credential key.
#[derive(Clone)]
pub struct AndroidKeyStatement {
    pub issuer: TestCertificate,
    /// `attestationChallenge`; the client data hash when `None`
    pub challenge: Option<Vec<u8>>,
    pub all_applications: bool,
    /// Key origin and purpose in the TEE list rather than the software list
    pub tee_enforced: bool,
}

impl AndroidKeyStatement {
    #[must_use]
    pub fn new(issuer: TestCertificate) -> Self {
        Self {
            issuer,
            challenge: None,
            all_applications: false,
            tee_enforced: true,
        }
    }
}

/// SafetyNet response parameters
#[derive(Clone)]
pub struct SafetyNetStatement {
    /// JWS `x5c`, signing certificate first
    pub chain: Vec<TestCertificate>,
    /// Payload nonce; base64 of `SHA-256(authData || clientDataHash)` when `None`
    pub nonce: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub cts_profile_match: bool,
}

impl SafetyNetStatement {
    /// A response issued now that passes the device integrity check
    #[must_use]
    pub fn new(chain: Vec<TestCertificate>) -> Self {
        Self {
            chain,
            nonce: None,
            timestamp: Utc::now(),
            cts_profile_match: true,
        }
    }
}

/// Apple anonymous attestation parameters
#[derive(Clone)]
pub struct AppleStatement {
    /// Issuer of the per-credential certificate
    pub issuer: TestCertificate,
    /// Nonce extension value; `SHA-256(authData || clientDataHash)` when `None`
    pub nonce: Option<Vec<u8>>,
}

impl AppleStatement {
    #[must_use]
    pub fn new(issuer: TestCertificate) -> Self {
        Self {
            issuer,
            nonce: None,
        }
    }
}

/// TPM attestation parameters
#[derive(Clone)]
pub struct TpmStatement {
    /// AIK certificate, see [`TestCertificateBuilder::tpm_aik`]
    pub aik: TestCertificate,
    /// Issuer of `aik`, sent as the second `x5c` entry
    pub issuer: TestCertificate,
    /// `extraData`; the SHA-256 of `authData || clientDataHash` when `None`
    pub extra_data: Option<Vec<u8>>,
    /// Key described by `pubArea`; the credential key when `None`
    pub certified_key: Option<CoseKey>,
}

impl TpmStatement {
    #[must_use]
    pub fn new(aik: TestCertificate, issuer: TestCertificate) -> Self {
        Self {
            aik,
            issuer,
            extra_data: None,
            certified_key: None,
        }
    }
}

const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
const TPM_ST_ATTEST_CERTIFY: u16 = 0x8017;
const TPM_ALG_SHA256: u16 = 0x000b;
const TPM_ALG_NULL: u16 = 0x0010;
const TPM_ALG_ECC: u16 = 0x0023;
const TPM_ECC_NIST_P256: u16 = 0x0003;
// fixedTPM | fixedParent | sensitiveDataOrigin | userWithAuth | sign
const TPM_SIGNING_KEY_ATTRIBUTES: u32 = 0x0004_0072;

fn push_sized(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&u16::try_from(data.len()).unwrap().to_be_bytes());
    out.extend_from_slice(data);
}

/// `TPMT_PUBLIC` of a P-256 signing key
fn tpm_pub_area(key: &CoseKey) -> Vec<u8> {
    let CoseKeyType::Ec2(ec) = &key.key else {
        unreachable!("software authenticator keys are P-256");
    };
    let mut out = Vec::new();
    out.extend_from_slice(&TPM_ALG_ECC.to_be_bytes());
    out.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
    out.extend_from_slice(&TPM_SIGNING_KEY_ATTRIBUTES.to_be_bytes());
    push_sized(&mut out, &[]);
    out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // symmetric
    out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // scheme
    out.extend_from_slice(&TPM_ECC_NIST_P256.to_be_bytes());
    out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // kdf
    push_sized(&mut out, &ec.x);
    push_sized(&mut out, &ec.y);
    out
}

/// `TPMS_ATTEST` certifying the object called `name`
fn tpm_cert_info(extra_data: &[u8], name: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&TPM_GENERATED_VALUE.to_be_bytes());
    out.extend_from_slice(&TPM_ST_ATTEST_CERTIFY.to_be_bytes());
    push_sized(&mut out, b"vouchrs-test-tpm");
    push_sized(&mut out, extra_data);
    out.extend_from_slice(&1u64.to_be_bytes()); // clock
    out.extend_from_slice(&0u32.to_be_bytes()); // resetCount
    out.extend_from_slice(&0u32.to_be_bytes()); // restartCount
    out.push(1); // safe
    out.extend_from_slice(&0u64.to_be_bytes()); // firmwareVersion
    push_sized(&mut out, name);
    push_sized(&mut out, &[]);
    out
}

/// A P-256 authenticator holding one credential
pub struct SoftwareAuthenticator {
    key: PKey<Private>,
    pub aaguid: Uuid,
    pub credential_id: Vec<u8>,
    pub rp_id: String,
    pub origin: String,
    pub counter: u32,
    /// Amount added to the counter before each assertion
    pub counter_step: u32,
    pub user_present: bool,
    pub user_verified: bool,
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn sign_with(key: &PKey<Private>, data: &[u8]) -> Vec<u8> {
    let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
    signer.update(data).unwrap();
    signer.sign_to_vec().unwrap()
}

/// ES256 JWS signature, `r || s`
fn jws_es256_signature(key: &PKey<Private>, signing_input: &[u8]) -> Vec<u8> {
    let signature = EcdsaSig::from_der(&sign_with(key, signing_input)).unwrap();
    let mut raw = signature.r().to_vec_padded(32).unwrap();
    raw.extend(signature.s().to_vec_padded(32).unwrap());
    raw
}

fn x5c(chain: &[&TestCertificate]) -> Value {
    Value::Array(chain.iter().map(|cert| Value::Bytes(cert.der())).collect())
}

impl SoftwareAuthenticator {
    /// Create an authenticator for `rp_id`, answering as `origin`
    ///
    /// # Panics
    ///
    /// Panics if `OpenSSL` fails to generate the key or the credential id.
    #[must_use]
    pub fn new(rp_id: &str, origin: &str) -> Self {
        let mut credential_id = vec![0u8; 32];
        openssl::rand::rand_bytes(&mut credential_id).unwrap();
        Self {
            key: p256_key(),
            aaguid: Uuid::nil(),
            credential_id,
            rp_id: rp_id.to_string(),
            origin: origin.to_string(),
            counter: 0,
            counter_step: 1,
            user_present: true,
            user_verified: true,
        }
    }

    #[must_use]
    pub fn with_aaguid(mut self, aaguid: Uuid) -> Self {
        self.aaguid = aaguid;
        self
    }

    /// Base64url credential id, as stored by the relying party
    #[must_use]
    pub fn credential_id_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.credential_id)
    }

    /// COSE form of the credential public key
    ///
    /// # Panics
    ///
    /// Panics if the key cannot be converted.
    #[must_use]
    pub fn cose_key(&self) -> CoseKey {
        CoseKey::from_public_pkey(&self.key, Some(CoseAlgorithm::Es256.id())).unwrap()
    }

    /// `clientDataJSON` for a ceremony
    #[must_use]
    pub fn client_data_json(&self, ceremony: CeremonyType, challenge: &str) -> Vec<u8> {
        serde_json::json!({
            "type": ceremony.as_str(),
            "challenge": challenge,
            "origin": self.origin,
            "crossOrigin": false,
        })
        .to_string()
        .into_bytes()
    }

    fn flags(&self, attested: bool) -> u8 {
        let mut flags = 0;
        if self.user_present {
            flags |= AuthenticatorFlags::USER_PRESENT;
        }
        if self.user_verified {
            flags |= AuthenticatorFlags::USER_VERIFIED;
        }
        if attested {
            flags |= AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA;
        }
        flags
    }

    /// Authenticator data, with attested credential data when `attested`
    ///
    /// # Panics
    ///
    /// Panics if the credential key cannot be encoded.
    #[must_use]
    pub fn authenticator_data(&self, attested: bool) -> Vec<u8> {
        let mut data = sha256(self.rp_id.as_bytes()).to_vec();
        data.push(self.flags(attested));
        data.extend_from_slice(&self.counter.to_be_bytes());
        if attested {
            data.extend_from_slice(self.aaguid.as_bytes());
            let id_len = u16::try_from(self.credential_id.len()).unwrap();
            data.extend_from_slice(&id_len.to_be_bytes());
            data.extend_from_slice(&self.credential_id);
            data.extend(self.cose_key().to_bytes().unwrap());
        }
        data
    }

    /// Registration response for `challenge`
    #[must_use]
    pub fn register(&self, challenge: &str, attestation: &TestAttestation) -> RegistrationResponse {
        let client_data_json = self.client_data_json(CeremonyType::Create, challenge);
        self.register_with_client_data(&client_data_json, attestation)
    }

    /// Registration response over caller supplied client data
    ///
    /// # Panics
    ///
    /// Panics if signing or CBOR encoding fails.
    #[must_use]
    pub fn register_with_client_data(
        &self,
        client_data_json: &[u8],
        attestation: &TestAttestation,
    ) -> RegistrationResponse {
        let auth_data = self.authenticator_data(true);
        let client_data_hash = sha256(client_data_json);
        let mut signed = auth_data.clone();
        signed.extend_from_slice(&client_data_hash);

        let att_stmt = match attestation {
            TestAttestation::None => Vec::new(),
            TestAttestation::PackedSelf => vec![
                (text("alg"), int(CoseAlgorithm::Es256.id())),
                (text("sig"), Value::Bytes(sign_with(&self.key, &signed))),
            ],
            TestAttestation::Packed(chain) => vec![
                (text("alg"), int(CoseAlgorithm::Es256.id())),
                (text("sig"), Value::Bytes(sign_with(&chain[0].key, &signed))),
                (text("x5c"), x5c(&chain.iter().collect::<Vec<_>>())),
            ],
            TestAttestation::FidoU2f(cert) => {
                let CoseKeyType::Ec2(ec) = self.cose_key().key else {
                    unreachable!("software authenticator keys are P-256");
                };
                let mut payload = vec![0x00];
                payload.extend_from_slice(&sha256(self.rp_id.as_bytes()));
                payload.extend_from_slice(&client_data_hash);
                payload.extend_from_slice(&self.credential_id);
                payload.extend(ec.uncompressed_point());
                vec![
                    (text("sig"), Value::Bytes(sign_with(&cert.key, &payload))),
                    (text("x5c"), Value::Array(vec![Value::Bytes(cert.der())])),
                ]
            }
            TestAttestation::AndroidKey(statement) => {
                let challenge = statement
                    .challenge
                    .clone()
                    .unwrap_or_else(|| client_data_hash.to_vec());
                let keystore_cert = TestCertificateBuilder::new("Android Keystore Key")
                    .with_key(self.key.clone())
                    .with_extension(
                        OID_ANDROID_KEY_DESCRIPTION,
                        false,
                        android_key_description(
                            &challenge,
                            statement.all_applications,
                            statement.tee_enforced,
                        ),
                    )
                    .issued_by(&statement.issuer);
                vec![
                    (text("alg"), int(CoseAlgorithm::Es256.id())),
                    (text("sig"), Value::Bytes(sign_with(&self.key, &signed))),
                    (text("x5c"), x5c(&[&keystore_cert, &statement.issuer])),
                ]
            }
            TestAttestation::AndroidSafetyNet(statement) => {
                let nonce = statement
                    .nonce
                    .clone()
                    .unwrap_or_else(|| STANDARD.encode(sha256(&signed)));
                let header = serde_json::json!({
                    "alg": "ES256",
                    "x5c": statement
                        .chain
                        .iter()
                        .map(|cert| STANDARD.encode(cert.der()))
                        .collect::<Vec<_>>(),
                });
                let payload = serde_json::json!({
                    "nonce": nonce,
                    "timestampMs": statement.timestamp.timestamp_millis(),
                    "apkPackageName": "com.google.android.gms",
                    "ctsProfileMatch": statement.cts_profile_match,
                    "basicIntegrity": true,
                });
                let signing_input = format!(
                    "{}.{}",
                    URL_SAFE_NO_PAD.encode(header.to_string()),
                    URL_SAFE_NO_PAD.encode(payload.to_string())
                );
                let signature =
                    jws_es256_signature(&statement.chain[0].key, signing_input.as_bytes());
                let jws = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature));
                vec![
                    (text("ver"), text("14366018")),
                    (text("response"), Value::Bytes(jws.into_bytes())),
                ]
            }
            TestAttestation::Apple(statement) => {
                let nonce = statement
                    .nonce
                    .clone()
                    .unwrap_or_else(|| sha256(&signed).to_vec());
                let credential_cert = TestCertificateBuilder::new("Apple Anonymous Credential")
                    .with_key(self.key.clone())
                    .with_extension(OID_APPLE_NONCE, false, apple_nonce_extension(&nonce))
                    .issued_by(&statement.issuer);
                vec![
                    (text("alg"), int(CoseAlgorithm::Es256.id())),
                    (text("x5c"), x5c(&[&credential_cert, &statement.issuer])),
                ]
            }
            TestAttestation::Tpm(statement) => {
                let certified_key = statement
                    .certified_key
                    .clone()
                    .unwrap_or_else(|| self.cose_key());
                let pub_area = tpm_pub_area(&certified_key);
                let mut name = TPM_ALG_SHA256.to_be_bytes().to_vec();
                name.extend_from_slice(&sha256(&pub_area));
                let extra_data = statement
                    .extra_data
                    .clone()
                    .unwrap_or_else(|| sha256(&signed).to_vec());
                let cert_info = tpm_cert_info(&extra_data, &name);
                vec![
                    (text("ver"), text("2.0")),
                    (text("alg"), int(CoseAlgorithm::Es256.id())),
                    (text("x5c"), x5c(&[&statement.aik, &statement.issuer])),
                    (
                        text("sig"),
                        Value::Bytes(sign_with(&statement.aik.key, &cert_info)),
                    ),
                    (text("certInfo"), Value::Bytes(cert_info)),
                    (text("pubArea"), Value::Bytes(pub_area)),
                ]
            }
        };

        let attestation_object = encode_value(&Value::Map(vec![
            (text("fmt"), text(attestation.format())),
            (text("attStmt"), Value::Map(att_stmt)),
            (text("authData"), Value::Bytes(auth_data)),
        ]))
        .unwrap();

        let id = self.credential_id_b64();
        RegistrationResponse {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAttestationResponse {
                client_data_json: URL_SAFE_NO_PAD.encode(client_data_json),
                attestation_object: URL_SAFE_NO_PAD.encode(attestation_object),
                transports: vec!["usb".to_string()],
            },
            client_extension_results: None,
            r#type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
        }
    }

    /// Assertion response for `challenge`; advances the counter first
    #[must_use]
    pub fn authenticate(
        &mut self,
        challenge: &str,
        user_handle: Option<&str>,
    ) -> AuthenticationResponse {
        self.counter = self.counter.wrapping_add(self.counter_step);
        let client_data_json = self.client_data_json(CeremonyType::Get, challenge);
        self.assert_with_client_data(&client_data_json, user_handle)
    }

    /// Assertion response over caller supplied client data, at the current counter
    #[must_use]
    pub fn assert_with_client_data(
        &self,
        client_data_json: &[u8],
        user_handle: Option<&str>,
    ) -> AuthenticationResponse {
        let auth_data = self.authenticator_data(false);
        let mut signed = auth_data.clone();
        signed.extend_from_slice(&sha256(client_data_json));
        let signature = sign_with(&self.key, &signed);

        let id = self.credential_id_b64();
        AuthenticationResponse {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAssertionResponse {
                client_data_json: URL_SAFE_NO_PAD.encode(client_data_json),
                authenticator_data: URL_SAFE_NO_PAD.encode(auth_data),
                signature: URL_SAFE_NO_PAD.encode(signature),
                user_handle: user_handle.map(str::to_string),
            },
            client_extension_results: None,
            r#type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
        }
    }
}

/// Serves CRLs from memory, failing for unknown URLs
#[derive(Default)]
pub struct StaticCrlFetcher {
    crls: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl StaticCrlFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_crl(mut self, url: &str, crl: Vec<u8>) -> Self {
        self.crls.insert(url.to_string(), crl);
        self
    }

    /// URLs requested so far
    ///
    /// # Panics
    ///
    /// Panics if the request log lock is poisoned.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl CrlFetcher for StaticCrlFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, WebAuthnError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        self.crls
            .get(url)
            .cloned()
            .ok_or_else(|| WebAuthnError::CertificateChain(format!("CRL unavailable: {url}")))
    }
}
