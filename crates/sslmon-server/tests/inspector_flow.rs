mod common;

use anyhow::Result;
use sslmon_common::types::{CertificateStatus, CheckErrorKind, ExpiryThresholds};
use sslmon_server::cert::inspector::{fingerprint_sha256, CertificateInspector};
use sslmon_server::config::InspectorConfig;

fn inspector(config: InspectorConfig) -> Result<CertificateInspector> {
    common::init();
    CertificateInspector::new(&config, ExpiryThresholds::default())
}

#[tokio::test]
async fn inspect_should_report_valid_certificate_with_details() -> Result<()> {
    let inspector = inspector(common::fast_inspector_config())?;
    let server = common::spawn_tls_server(100).await?;

    let record = inspector
        .inspect(&common::domain("localhost", server.port))
        .await;

    assert_eq!(record.status, CertificateStatus::Valid);
    assert_eq!(record.days_until_expiry, Some(100));
    assert!(record.error_kind.is_none());
    assert!(record.error_message.is_none());
    assert_eq!(record.port, server.port);
    assert!(record
        .subject
        .as_deref()
        .unwrap_or_default()
        .contains("sslmon local test"));
    assert_eq!(record.subject, record.issuer);
    assert!(record.serial_number.is_some());
    assert!(record.valid_from < record.expiry_date);
    assert_eq!(record.subject_alternative_names.as_deref(), Some("localhost"));
    assert_eq!(record.signature_algorithm.as_deref(), Some("ECDSAwithSHA256"));
    assert_eq!(record.key_size, Some(256));

    let cert_der = server.cert_der.as_deref().unwrap_or_default();
    assert_eq!(
        record.fingerprint_sha256.as_deref(),
        Some(fingerprint_sha256(cert_der).as_str())
    );
    Ok(())
}

#[tokio::test]
async fn inspect_should_flag_certificate_inside_critical_window() -> Result<()> {
    let inspector = inspector(common::fast_inspector_config())?;
    let server = common::spawn_tls_server(5).await?;

    let record = inspector
        .inspect(&common::domain("localhost", server.port))
        .await;

    assert_eq!(record.status, CertificateStatus::ExpiringSoon);
    assert_eq!(record.days_until_expiry, Some(5));
    assert!(record.error_message.is_none());
    Ok(())
}

#[tokio::test]
async fn inspect_should_report_expired_certificate() -> Result<()> {
    let inspector = inspector(common::fast_inspector_config())?;
    let server = common::spawn_tls_server(-3).await?;

    let record = inspector
        .inspect(&common::domain("localhost", server.port))
        .await;

    assert_eq!(record.status, CertificateStatus::Expired);
    assert_eq!(record.days_until_expiry, Some(-3));
    assert!(record.has_certificate());
    Ok(())
}

#[tokio::test]
async fn inspect_should_turn_refused_connection_into_error_record() -> Result<()> {
    let inspector = inspector(common::fast_inspector_config())?;
    let port = common::closed_port().await?;

    let record = inspector.inspect(&common::domain("127.0.0.1", port)).await;

    assert_eq!(record.status, CertificateStatus::Error);
    assert_eq!(record.error_kind, Some(CheckErrorKind::Connection));
    assert!(record
        .error_message
        .as_deref()
        .unwrap_or_default()
        .starts_with("Connection failed"));
    assert!(!record.has_certificate());
    assert!(record.subject.is_none());
    assert!(record.days_until_expiry.is_none());
    assert!(record.response_time_ms > 0);
    Ok(())
}

#[tokio::test]
async fn inspect_should_turn_unresolvable_host_into_error_record() -> Result<()> {
    let inspector = inspector(common::fast_inspector_config())?;

    let record = inspector
        .inspect(&common::domain("nosuchhost.invalid", 443))
        .await;

    assert_eq!(record.status, CertificateStatus::Error);
    assert_eq!(record.error_kind, Some(CheckErrorKind::Connection));
    assert!(record.error_message.is_some());
    assert!(record.response_time_ms > 0);
    Ok(())
}

#[tokio::test]
async fn inspect_should_bound_a_stalled_handshake() -> Result<()> {
    let inspector = inspector(InspectorConfig {
        read_timeout_ms: 300,
        ..common::fast_inspector_config()
    })?;
    let server = common::spawn_silent_server().await?;

    let record = inspector
        .inspect(&common::domain("localhost", server.port))
        .await;

    assert_eq!(record.status, CertificateStatus::Error);
    assert_eq!(record.error_kind, Some(CheckErrorKind::Handshake));
    assert!(record
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("timed out"));
    assert!(record.response_time_ms >= 300);
    Ok(())
}

#[tokio::test]
async fn repeated_inspection_should_yield_same_fingerprint() -> Result<()> {
    let inspector = inspector(common::fast_inspector_config())?;
    let server = common::spawn_tls_server(60).await?;
    let domain = common::domain("localhost", server.port);

    let first = inspector.inspect(&domain).await;
    let second = inspector.inspect(&domain).await;

    assert!(first.fingerprint_sha256.is_some());
    assert_eq!(first.fingerprint_sha256, second.fingerprint_sha256);
    assert_ne!(first.id, second.id);
    assert!(first.check_date <= second.check_date);
    Ok(())
}

#[tokio::test]
async fn untrusted_chain_should_be_flagged_when_enabled() -> Result<()> {
    let inspector = inspector(InspectorConfig {
        flag_untrusted: true,
        ..common::fast_inspector_config()
    })?;
    let server = common::spawn_tls_server(100).await?;

    let record = inspector
        .inspect(&common::domain("localhost", server.port))
        .await;

    assert_eq!(record.status, CertificateStatus::Untrusted);
    assert_eq!(record.error_kind, Some(CheckErrorKind::Untrusted));
    assert!(record
        .error_message
        .as_deref()
        .unwrap_or_default()
        .starts_with("Certificate not trusted"));
    // certificate details survive the trust failure
    assert!(record.has_certificate());
    assert_eq!(record.days_until_expiry, Some(100));
    Ok(())
}

#[tokio::test]
async fn expired_untrusted_chain_should_stay_expired() -> Result<()> {
    let inspector = inspector(InspectorConfig {
        flag_untrusted: true,
        ..common::fast_inspector_config()
    })?;
    let server = common::spawn_tls_server(-3).await?;

    let record = inspector
        .inspect(&common::domain("localhost", server.port))
        .await;

    assert_eq!(record.status, CertificateStatus::Expired);
    assert!(record.error_message.is_none());
    Ok(())
}
