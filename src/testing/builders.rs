//! Builders for test certificate authorities and attestation certificates
//!
//! Certificates are issued with `OpenSSL`. CRLs have no builder in the
//! `openssl` crate, so they are DER encoded here and signed with the issuer
//! key.

use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509Extension, X509Name, X509NameBuilder, X509};
use uuid::Uuid;

use crate::attestation::certificate::OID_FIDO_GEN_CE_AAGUID;

/// `ecdsa-with-SHA256` algorithm identifier
const ECDSA_WITH_SHA256: [u8; 12] = [
    0x30, 0x0a, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02,
];
const OID_CRL_DISTRIBUTION_POINTS: &str = "2.5.29.31";
const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";
const OID_EXTENDED_KEY_USAGE: &str = "2.5.29.37";

/// `tcg-kp-AIKCertificate` (2.23.133.8.3) as DER content octets
const TCG_KP_AIK_CERTIFICATE: [u8; 5] = [0x67, 0x81, 0x05, 0x08, 0x03];

/// `KM_PURPOSE_SIGN` and `KM_ORIGIN_GENERATED`
const KM_PURPOSE_SIGN: u8 = 2;
const KM_ORIGIN_GENERATED: u8 = 0;

/// Generate a P-256 key pair
///
/// # Panics
///
/// Panics if `OpenSSL` fails to generate the key.
#[must_use]
pub fn p256_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// A certificate with its private key
#[derive(Clone)]
pub struct TestCertificate {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl TestCertificate {
    /// DER encoding of the certificate
    ///
    /// # Panics
    ///
    /// Panics if the certificate cannot be encoded.
    #[must_use]
    pub fn der(&self) -> Vec<u8> {
        self.cert.to_der().unwrap()
    }

    /// PEM encoding of the certificate
    ///
    /// # Panics
    ///
    /// Panics if the certificate cannot be encoded.
    #[must_use]
    pub fn pem(&self) -> String {
        String::from_utf8(self.cert.to_pem().unwrap()).unwrap()
    }
}

/// Builder for a single test certificate
pub struct TestCertificateBuilder {
    subject: Vec<(&'static str, String)>,
    ca: bool,
    aaguid: Option<Uuid>,
    crl_url: Option<String>,
    key: Option<PKey<Private>>,
    extensions: Vec<(String, bool, Vec<u8>)>,
    valid_days: u32,
}

impl TestCertificateBuilder {
    /// Start a certificate with the given common name
    #[must_use]
    pub fn new(common_name: &str) -> Self {
        Self {
            subject: vec![("CN", common_name.to_string())],
            ca: false,
            aaguid: None,
            crl_url: None,
            key: None,
            extensions: Vec::new(),
            valid_days: 365,
        }
    }

    /// Subject suitable for packed attestation certificates
    #[must_use]
    pub fn attestation(common_name: &str) -> Self {
        Self {
            subject: vec![
                ("C", "US".to_string()),
                ("O", "Vouchrs Test Authenticators".to_string()),
                ("OU", "Authenticator Attestation".to_string()),
                ("CN", common_name.to_string()),
            ],
            ..Self::new(common_name)
        }
    }

    /// TPM attestation identity key certificate: empty subject, critical
    /// subject alternative name and the AIK extended key usage
    #[must_use]
    pub fn tpm_aik() -> Self {
        Self {
            subject: Vec::new(),
            ..Self::new("")
        }
        .with_extension(
            OID_SUBJECT_ALT_NAME,
            true,
            dns_subject_alt_name("tpm.vouchrs.test"),
        )
        .with_extension(
            OID_EXTENDED_KEY_USAGE,
            false,
            der_tlv(0x30, &der_tlv(0x06, &TCG_KP_AIK_CERTIFICATE)),
        )
    }

    #[must_use]
    pub fn ca(mut self) -> Self {
        self.ca = true;
        self
    }

    #[must_use]
    pub fn with_aaguid(mut self, aaguid: Uuid) -> Self {
        self.aaguid = Some(aaguid);
        self
    }

    #[must_use]
    pub fn with_crl_distribution_point(mut self, url: &str) -> Self {
        self.crl_url = Some(url.to_string());
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: PKey<Private>) -> Self {
        self.key = Some(key);
        self
    }

    /// Add an extension given its DER encoded value
    #[must_use]
    pub fn with_extension(mut self, oid: &str, critical: bool, value: Vec<u8>) -> Self {
        self.extensions.push((oid.to_string(), critical, value));
        self
    }

    fn name(&self) -> X509Name {
        let mut name = X509NameBuilder::new().unwrap();
        for (field, value) in &self.subject {
            name.append_entry_by_text(field, value).unwrap();
        }
        name.build()
    }

    /// Build a self-signed certificate
    ///
    /// # Panics
    ///
    /// Panics if `OpenSSL` fails to build or sign the certificate.
    #[must_use]
    pub fn self_signed(self) -> TestCertificate {
        let key = self.key.clone().unwrap_or_else(p256_key);
        let name = self.name();
        self.build(&name, &key, key.clone())
    }

    /// Build a certificate signed by `issuer`
    ///
    /// # Panics
    ///
    /// Panics if `OpenSSL` fails to build or sign the certificate.
    #[must_use]
    pub fn issued_by(self, issuer: &TestCertificate) -> TestCertificate {
        let key = self.key.clone().unwrap_or_else(p256_key);
        self.build(issuer.cert.subject_name(), &issuer.key, key)
    }

    fn build(
        self,
        issuer_name: &openssl::x509::X509NameRef,
        signing_key: &PKey<Private>,
        key: PKey<Private>,
    ) -> TestCertificate {
        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();

        let mut serial = BigNum::new().unwrap();
        serial.rand(63, MsbOption::MAYBE_ZERO, false).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();

        builder.set_subject_name(&self.name()).unwrap();
        builder.set_issuer_name(issuer_name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(self.valid_days).unwrap())
            .unwrap();

        if self.ca {
            builder
                .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
                .unwrap();
            builder
                .append_extension(
                    KeyUsage::new()
                        .critical()
                        .key_cert_sign()
                        .crl_sign()
                        .build()
                        .unwrap(),
                )
                .unwrap();
        } else {
            builder
                .append_extension(BasicConstraints::new().build().unwrap())
                .unwrap();
            builder
                .append_extension(KeyUsage::new().digital_signature().build().unwrap())
                .unwrap();
        }

        if let Some(aaguid) = self.aaguid {
            let value = der_tlv(0x04, aaguid.as_bytes());
            builder
                .append_extension(custom_extension(OID_FIDO_GEN_CE_AAGUID, false, &value))
                .unwrap();
        }
        if let Some(url) = &self.crl_url {
            builder
                .append_extension(custom_extension(
                    OID_CRL_DISTRIBUTION_POINTS,
                    false,
                    &crl_distribution_points(url),
                ))
                .unwrap();
        }
        for (oid, critical, value) in &self.extensions {
            builder
                .append_extension(custom_extension(oid, *critical, value))
                .unwrap();
        }

        builder.sign(signing_key, MessageDigest::sha256()).unwrap();
        TestCertificate {
            cert: builder.build(),
            key,
        }
    }
}

fn custom_extension(oid: &str, critical: bool, value: &[u8]) -> X509Extension {
    let oid = Asn1Object::from_str(oid).unwrap();
    let contents = Asn1OctetString::new_from_bytes(value).unwrap();
    X509Extension::new_from_der(&oid, critical, &contents).unwrap()
}

/// Encode a DER tag-length-value
#[must_use]
pub fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(u8::try_from(len).unwrap_or_default());
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | u8::try_from(bytes.len()).unwrap_or_default());
        out.extend_from_slice(&bytes);
    }
    out.extend_from_slice(content);
    out
}

/// Encode a DER value whose tag takes more than one octet
fn der_high_tag(tag: &[u8], content: &[u8]) -> Vec<u8> {
    let tlv = der_tlv(0x00, content);
    let mut out = tag.to_vec();
    out.extend_from_slice(&tlv[1..]);
    out
}

/// `GeneralNames` holding a single `dNSName`
#[must_use]
pub fn dns_subject_alt_name(host: &str) -> Vec<u8> {
    der_tlv(0x30, &der_tlv(0x82, host.as_bytes()))
}

/// Android keystore `KeyDescription` extension value
///
/// The key is recorded as generated on the device for signing, in the TEE
/// authorization list when `tee_enforced` and in the software list
/// otherwise. `all_applications` marks the key usable by every application.
#[must_use]
pub fn android_key_description(
    challenge: &[u8],
    all_applications: bool,
    tee_enforced: bool,
) -> Vec<u8> {
    // [1] EXPLICIT SET OF INTEGER, [702] EXPLICIT INTEGER
    let mut generated_for_signing =
        der_tlv(0xa1, &der_tlv(0x31, &der_tlv(0x02, &[KM_PURPOSE_SIGN])));
    generated_for_signing.extend(der_high_tag(
        &[0xbf, 0x85, 0x3e],
        &der_tlv(0x02, &[KM_ORIGIN_GENERATED]),
    ));

    let (mut software, tee) = if tee_enforced {
        (Vec::new(), generated_for_signing)
    } else {
        (generated_for_signing, Vec::new())
    };
    if all_applications {
        // [600] EXPLICIT NULL
        software.extend(der_high_tag(&[0xbf, 0x84, 0x58], &[0x05, 0x00]));
    }

    let mut body = Vec::new();
    body.extend(der_tlv(0x02, &[0x03])); // attestationVersion
    body.extend(der_tlv(0x0a, &[0x01])); // attestationSecurityLevel
    body.extend(der_tlv(0x02, &[0x04])); // keymasterVersion
    body.extend(der_tlv(0x0a, &[0x01])); // keymasterSecurityLevel
    body.extend(der_tlv(0x04, challenge));
    body.extend(der_tlv(0x04, &[])); // uniqueId
    body.extend(der_tlv(0x30, &software));
    body.extend(der_tlv(0x30, &tee));
    der_tlv(0x30, &body)
}

/// Apple anonymous attestation nonce extension value
#[must_use]
pub fn apple_nonce_extension(nonce: &[u8]) -> Vec<u8> {
    der_tlv(0x30, &der_tlv(0xa1, &der_tlv(0x04, nonce)))
}

/// `CRLDistributionPoints` with a single URI full name
fn crl_distribution_points(url: &str) -> Vec<u8> {
    let uri = der_tlv(0x86, url.as_bytes());
    let full_name = der_tlv(0xa0, &uri);
    let point_name = der_tlv(0xa0, &full_name);
    let point = der_tlv(0x30, &point_name);
    der_tlv(0x30, &point)
}

fn der_integer(bytes: &[u8]) -> Vec<u8> {
    let mut content: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if content.first().map_or(true, |b| b & 0x80 != 0) {
        content.insert(0, 0);
    }
    der_tlv(0x02, &content)
}

fn der_utc_time(time: DateTime<Utc>) -> Vec<u8> {
    der_tlv(0x17, time.format("%y%m%d%H%M%SZ").to_string().as_bytes())
}

/// Root, intermediate and attestation certificates for chain tests
pub struct TestCa {
    pub root: TestCertificate,
    pub intermediate: TestCertificate,
}

impl TestCa {
    /// URL named in the CRL distribution point of issued attestation certificates
    pub const INTERMEDIATE_CRL_URL: &'static str = "http://crl.vouchrs.test/intermediate.crl";

    /// Create a root and an intermediate CA
    #[must_use]
    pub fn new() -> Self {
        let root = TestCertificateBuilder::new("Vouchrs Test Root CA")
            .ca()
            .self_signed();
        let intermediate = TestCertificateBuilder::new("Vouchrs Test Intermediate CA")
            .ca()
            .issued_by(&root);
        Self { root, intermediate }
    }

    /// Issue a packed attestation certificate from the intermediate
    #[must_use]
    pub fn attestation_certificate(&self, aaguid: Option<Uuid>) -> TestCertificate {
        let mut builder = TestCertificateBuilder::attestation("Vouchrs Test Authenticator")
            .with_crl_distribution_point(Self::INTERMEDIATE_CRL_URL);
        if let Some(aaguid) = aaguid {
            builder = builder.with_aaguid(aaguid);
        }
        builder.issued_by(&self.intermediate)
    }

    /// CRL of the intermediate listing `revoked`, valid for a day
    #[must_use]
    pub fn intermediate_crl(&self, revoked: &[&TestCertificate]) -> Vec<u8> {
        Self::crl(&self.intermediate, revoked, Utc::now() + Duration::days(1))
    }

    /// CRL of the intermediate whose next update has already passed
    #[must_use]
    pub fn stale_intermediate_crl(&self) -> Vec<u8> {
        Self::crl(&self.intermediate, &[], Utc::now() - Duration::hours(1))
    }

    /// Build a CRL signed by `issuer`
    ///
    /// # Panics
    ///
    /// Panics if `OpenSSL` fails to encode or sign.
    #[must_use]
    pub fn crl(
        issuer: &TestCertificate,
        revoked: &[&TestCertificate],
        next_update: DateTime<Utc>,
    ) -> Vec<u8> {
        let now = Utc::now();
        let mut tbs = Vec::new();
        tbs.extend(der_tlv(0x02, &[0x01])); // v2
        tbs.extend_from_slice(&ECDSA_WITH_SHA256);
        tbs.extend(issuer.cert.subject_name().to_der().unwrap());
        tbs.extend(der_utc_time(now - Duration::hours(2)));
        tbs.extend(der_utc_time(next_update));
        if !revoked.is_empty() {
            let mut entries = Vec::new();
            for cert in revoked {
                let serial = cert.cert.serial_number().to_bn().unwrap().to_vec();
                let mut entry = der_integer(&serial);
                entry.extend(der_utc_time(now - Duration::hours(1)));
                entries.extend(der_tlv(0x30, &entry));
            }
            tbs.extend(der_tlv(0x30, &entries));
        }
        let tbs = der_tlv(0x30, &tbs);

        let mut signer = Signer::new(MessageDigest::sha256(), &issuer.key).unwrap();
        signer.update(&tbs).unwrap();
        let signature = signer.sign_to_vec().unwrap();
        let mut bit_string = vec![0x00];
        bit_string.extend(signature);

        let mut crl = tbs;
        crl.extend_from_slice(&ECDSA_WITH_SHA256);
        crl.extend(der_tlv(0x03, &bit_string));
        der_tlv(0x30, &crl)
    }
}

impl Default for TestCa {
    fn default() -> Self {
        Self::new()
    }
}
