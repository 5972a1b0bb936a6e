#![allow(dead_code)]

use anyhow::Result;
use chrono::Utc;
use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use sslmon_common::types::{CreateDomainRequest, Domain};
use sslmon_server::config::{InspectorConfig, MonitorConfig};
use sslmon_storage::MemoryStore;
use std::sync::{Arc, OnceLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

fn ensure_rustls_provider() {
    static RUSTLS_PROVIDER_INIT: OnceLock<()> = OnceLock::new();
    RUSTLS_PROVIDER_INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub fn init() {
    sslmon_common::id::init(1, 1);
    ensure_rustls_provider();
}

/// Local endpoint that is torn down when dropped.
pub struct TestServer {
    pub port: u16,
    /// DER of the certificate the server presents, if it speaks TLS
    pub cert_der: Option<Vec<u8>>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Self-signed `localhost` certificate expiring `days` days plus one hour
/// from now, so whole-day arithmetic lands exactly on `days`.
pub fn localhost_cert(days: i64) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let now = time::OffsetDateTime::now_utc();
    let key_pair = KeyPair::generate()?;
    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    params
        .distinguished_name
        .push(DnType::CommonName, "sslmon local test");
    params.not_before = now - time::Duration::days(400);
    params.not_after = now + time::Duration::days(days) + time::Duration::hours(1);

    let cert = params.self_signed(&key_pair)?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((cert.der().clone(), key))
}

/// TLS server on 127.0.0.1 presenting a certificate that expires in `days`.
pub async fn spawn_tls_server(days: i64) -> Result<TestServer> {
    let (cert, key) = localhost_cert(days)?;
    let cert_der = cert.as_ref().to_vec();

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let _ = acceptor.accept(stream).await;
            });
        }
    });

    Ok(TestServer {
        port,
        cert_der: Some(cert_der),
        handle,
    })
}

/// Accepts TCP connections and never answers, stalling any TLS handshake.
pub async fn spawn_silent_server() -> Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let handle = tokio::spawn(async move {
        let mut held: Vec<TcpStream> = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    Ok(TestServer {
        port,
        cert_der: None,
        handle,
    })
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub fn fast_inspector_config() -> InspectorConfig {
    InspectorConfig {
        connect_timeout_ms: 2_000,
        read_timeout_ms: 2_000,
        flag_untrusted: false,
    }
}

pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        inspector: fast_inspector_config(),
        ..MonitorConfig::default()
    }
}

pub async fn register(store: &MemoryStore, name: &str, port: u16) -> Result<Domain> {
    Ok(store
        .insert_domain(&CreateDomainRequest::new(name).with_port(port))
        .await?)
}

/// Unregistered domain value for driving the inspector directly.
pub fn domain(name: &str, port: u16) -> Domain {
    let now = Utc::now();
    Domain {
        id: sslmon_common::id::next_id(),
        name: name.to_string(),
        port,
        active: true,
        check_interval_minutes: 1440,
        last_check_at: None,
        next_check_at: None,
        created_at: now,
        updated_at: now,
    }
}
