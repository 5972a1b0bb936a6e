use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use sha2::{Digest, Sha256};
use sslmon_common::types::{
    CertificateRecord, CertificateStatus, CheckErrorKind, Domain, ExpiryThresholds,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::oid_registry::{self, Oid};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use super::verifier::{ObservingVerifier, TrustObserver};
use super::{elapsed_ms, CertificateProbe};
use crate::config::InspectorConfig;
use crate::error::CheckError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Connects to a domain, completes a TLS handshake and turns the presented
/// leaf certificate into a [`CertificateRecord`].
///
/// Holds no per-check state; one instance is shared by every worker.
pub struct CertificateInspector {
    connector: TlsConnector,
    trust: Option<TrustObserver>,
    thresholds: ExpiryThresholds,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl CertificateInspector {
    pub fn new(config: &InspectorConfig, thresholds: ExpiryThresholds) -> anyhow::Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let client_config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow::anyhow!("Failed to select TLS protocol versions: {e}"))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ObservingVerifier::new(provider.clone())))
            .with_no_client_auth();

        let trust = if config.flag_untrusted {
            Some(TrustObserver::new(provider)?)
        } else {
            None
        };

        Ok(Self {
            connector: TlsConnector::from(Arc::new(client_config)),
            trust,
            thresholds,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    /// Checks one domain. Never fails: every error becomes an `ERROR` record.
    pub async fn inspect(&self, domain: &Domain) -> CertificateRecord {
        let started = Instant::now();
        let outcome = self.observe(domain).await;
        let response_time_ms = elapsed_ms(started);

        match outcome {
            Ok(observation) => self.success_record(domain, observation, response_time_ms),
            Err(e) => {
                tracing::warn!(
                    domain = %domain.name,
                    port = domain.port,
                    error = %e,
                    "Certificate check failed"
                );
                CertificateRecord::failure(domain, e.kind(), e.to_string(), response_time_ms)
            }
        }
    }

    async fn observe(&self, domain: &Domain) -> Result<Observation, CheckError> {
        let server_name = ServerName::try_from(domain.name.clone()).map_err(|e| {
            CheckError::Unexpected(format!("Invalid server name '{}': {e}", domain.name))
        })?;

        let tcp = timeout(
            self.connect_timeout,
            TcpStream::connect((domain.name.as_str(), domain.port)),
        )
        .await
        .map_err(|_| CheckError::ConnectTimeout(self.connect_timeout))?
        .map_err(|e| CheckError::Connection(e.to_string()))?;

        let tls_stream = timeout(
            self.read_timeout,
            self.connector.connect(server_name.clone(), tcp),
        )
        .await
        .map_err(|_| CheckError::HandshakeTimeout(self.read_timeout))?
        .map_err(|e| CheckError::Handshake(e.to_string()))?;

        let (_, connection) = tls_stream.get_ref();
        let chain: Vec<CertificateDer<'static>> = connection
            .peer_certificates()
            .filter(|certs| !certs.is_empty())
            .ok_or_else(|| CheckError::Unexpected("No peer certificate presented".into()))?
            .to_vec();

        let leaf = LeafCertificate::from_der(chain[0].as_ref())?;
        let trust_error = self
            .trust
            .as_ref()
            .and_then(|observer| observer.check(&chain, &server_name).err())
            .map(|e| e.to_string());

        Ok(Observation { leaf, trust_error })
    }

    fn success_record(
        &self,
        domain: &Domain,
        observation: Observation,
        response_time_ms: u64,
    ) -> CertificateRecord {
        let Observation { leaf, trust_error } = observation;
        let check_date = Utc::now();
        let days = days_until(leaf.expiry_date, check_date);
        let mut status = self.thresholds.status_for(days);
        let mut error_kind = None;
        let mut error_message = None;

        if let Some(reason) = trust_error {
            if status != CertificateStatus::Expired {
                status = CertificateStatus::Untrusted;
                error_kind = Some(CheckErrorKind::Untrusted);
                error_message = Some(format!("Certificate not trusted: {reason}"));
            }
        }

        tracing::info!(
            domain = %domain.name,
            port = domain.port,
            status = %status,
            days_left = days,
            elapsed_ms = response_time_ms,
            "Certificate checked"
        );

        CertificateRecord {
            id: sslmon_common::id::next_id(),
            domain_id: domain.id.clone(),
            domain: domain.name.clone(),
            port: domain.port,
            subject: Some(leaf.subject),
            issuer: Some(leaf.issuer),
            serial_number: Some(leaf.serial_number),
            valid_from: Some(leaf.valid_from),
            expiry_date: Some(leaf.expiry_date),
            days_until_expiry: Some(days),
            status,
            error_kind,
            error_message,
            check_date,
            response_time_ms,
            fingerprint_sha256: Some(leaf.fingerprint_sha256),
            signature_algorithm: Some(leaf.signature_algorithm),
            key_size: Some(leaf.key_size),
            subject_alternative_names: Some(leaf.subject_alternative_names),
        }
    }
}

#[async_trait]
impl CertificateProbe for CertificateInspector {
    async fn inspect(&self, domain: &Domain) -> CertificateRecord {
        CertificateInspector::inspect(self, domain).await
    }
}

struct Observation {
    leaf: LeafCertificate,
    trust_error: Option<String>,
}

/// Attributes of a leaf certificate, independent of when it was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCertificate {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub fingerprint_sha256: String,
    pub signature_algorithm: String,
    pub key_size: u32,
    pub subject_alternative_names: String,
}

impl LeafCertificate {
    pub fn from_der(der: &[u8]) -> Result<Self, CheckError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CheckError::Unexpected(format!("Failed to parse X.509 certificate: {e}")))?;

        let validity = cert.validity();
        let valid_from = asn1_time_to_utc(&validity.not_before)?;
        let expiry_date = asn1_time_to_utc(&validity.not_after)?;

        let subject_alternative_names = cert
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_string()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial_number: cert.serial.to_string(),
            valid_from,
            expiry_date,
            fingerprint_sha256: fingerprint_sha256(der),
            signature_algorithm: signature_algorithm_name(&cert.signature_algorithm.algorithm),
            key_size: key_size_bits(&cert),
            subject_alternative_names,
        })
    }
}

/// Lowercase hex SHA-256 of the DER bytes.
pub fn fingerprint_sha256(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Whole days from `now` until `expiry`, rounded towards negative infinity.
pub fn days_until(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expiry - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

fn asn1_time_to_utc(time: &ASN1Time) -> Result<DateTime<Utc>, CheckError> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| CheckError::Unexpected(format!("Certificate time out of range: {time}")))
}

fn signature_algorithm_name(oid: &Oid) -> String {
    let known = [
        (oid_registry::OID_PKCS1_SHA256WITHRSA, "SHA256withRSA"),
        (oid_registry::OID_PKCS1_SHA384WITHRSA, "SHA384withRSA"),
        (oid_registry::OID_PKCS1_SHA512WITHRSA, "SHA512withRSA"),
        (oid_registry::OID_PKCS1_SHA1WITHRSA, "SHA1withRSA"),
        (oid_registry::OID_SIG_ECDSA_WITH_SHA256, "ECDSAwithSHA256"),
        (oid_registry::OID_SIG_ECDSA_WITH_SHA384, "ECDSAwithSHA384"),
        (oid_registry::OID_SIG_ECDSA_WITH_SHA512, "ECDSAwithSHA512"),
        (oid_registry::OID_SIG_ED25519, "Ed25519"),
    ];
    known
        .iter()
        .find(|(known_oid, _)| oid == known_oid)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| oid.to_id_string())
}

/// RSA modulus bits, EC curve size, 256 for Ed25519. Other key types fall
/// back to the encoded SubjectPublicKeyInfo length in bits.
fn key_size_bits(cert: &X509Certificate) -> u32 {
    let spki = cert.public_key();
    let alg = &spki.algorithm.algorithm;

    let known = if *alg == oid_registry::OID_PKCS1_RSAENCRYPTION {
        match spki.parsed() {
            Ok(PublicKey::RSA(rsa)) => u32::try_from(rsa.key_size()).ok(),
            _ => None,
        }
    } else if *alg == oid_registry::OID_KEY_TYPE_EC_PUBLIC_KEY {
        spki.algorithm
            .parameters
            .as_ref()
            .and_then(|params| params.as_oid().ok())
            .and_then(|curve| {
                if curve == oid_registry::OID_EC_P256 {
                    Some(256)
                } else if curve == oid_registry::OID_NIST_EC_P384 {
                    Some(384)
                } else if curve == oid_registry::OID_NIST_EC_P521 {
                    Some(521)
                } else {
                    None
                }
            })
    } else if *alg == oid_registry::OID_SIG_ED25519 {
        Some(256)
    } else {
        None
    };

    known.unwrap_or_else(|| u32::try_from(spki.raw.len() * 8).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rcgen::{CertificateParams, DnType, KeyPair, SerialNumber};

    fn self_signed_der(sans: &[&str]) -> Vec<u8> {
        let key_pair = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "sslmon test");
        params.serial_number = Some(SerialNumber::from_slice(&[0x01, 0x02]));
        params.not_before = rcgen::date_time_ymd(2025, 1, 1);
        params.not_after = rcgen::date_time_ymd(2030, 1, 1);
        params.self_signed(&key_pair).unwrap().der().to_vec()
    }

    #[test]
    fn test_days_until_floors_towards_negative_infinity() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(days_until(now + ChronoDuration::days(100), now), 100);
        assert_eq!(days_until(now + ChronoDuration::days(5) + ChronoDuration::hours(1), now), 5);
        assert_eq!(days_until(now + ChronoDuration::hours(23), now), 0);
        assert_eq!(days_until(now - ChronoDuration::hours(1), now), -1);
        assert_eq!(days_until(now - ChronoDuration::days(3) + ChronoDuration::hours(1), now), -3);
        assert_eq!(days_until(now - ChronoDuration::days(3), now), -3);
    }

    #[test]
    fn test_leaf_fields_are_extracted() {
        let der = self_signed_der(&["localhost", "example.test"]);
        let leaf = LeafCertificate::from_der(&der).unwrap();

        assert!(leaf.subject.contains("sslmon test"), "{}", leaf.subject);
        // self-signed
        assert_eq!(leaf.subject, leaf.issuer);
        assert_eq!(leaf.serial_number, "258");
        assert_eq!(leaf.subject_alternative_names, "localhost,example.test");
        assert_eq!(leaf.signature_algorithm, "ECDSAwithSHA256");
        assert_eq!(leaf.key_size, 256);
        assert_eq!(
            leaf.valid_from,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            leaf.expiry_date,
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_certificate_without_sans_yields_empty_list() {
        let der = self_signed_der(&[]);
        let leaf = LeafCertificate::from_der(&der).unwrap();
        assert_eq!(leaf.subject_alternative_names, "");
    }

    #[test]
    fn test_fingerprint_is_deterministic_lowercase_hex() {
        let der = self_signed_der(&["localhost"]);
        let first = LeafCertificate::from_der(&der).unwrap().fingerprint_sha256;
        let second = LeafCertificate::from_der(&der).unwrap().fingerprint_sha256;

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

        let other = self_signed_der(&["localhost"]);
        assert_ne!(first, fingerprint_sha256(&other));
    }

    #[test]
    fn test_garbage_der_is_unexpected_error() {
        let err = LeafCertificate::from_der(b"not a certificate").unwrap_err();
        assert_eq!(err.kind(), CheckErrorKind::Unexpected);
        assert!(err.to_string().contains("X.509"));
    }

    #[test]
    fn test_unknown_signature_oid_renders_dotted() {
        let oid = oid_registry::OID_PKCS1_RSAENCRYPTION;
        assert_eq!(signature_algorithm_name(&oid), "1.2.840.113549.1.1.1");
    }

    #[tokio::test]
    async fn test_invalid_server_name_is_unexpected_error() {
        sslmon_common::id::init(1, 1);
        let inspector =
            CertificateInspector::new(&InspectorConfig::default(), ExpiryThresholds::default())
                .unwrap();
        let now = Utc::now();
        let domain = Domain {
            id: "1".into(),
            name: "bad name!".into(),
            port: 443,
            active: true,
            check_interval_minutes: 1440,
            last_check_at: None,
            next_check_at: None,
            created_at: now,
            updated_at: now,
        };

        let record = inspector.inspect(&domain).await;
        assert_eq!(record.status, CertificateStatus::Error);
        assert_eq!(record.error_kind, Some(CheckErrorKind::Unexpected));
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .contains("Invalid server name"));
        assert!(!record.has_certificate());
    }
}
