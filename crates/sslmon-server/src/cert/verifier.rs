use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;

/// Accepts whatever chain the server presents.
///
/// The inspector observes the certificate a server actually serves; it does
/// not enforce a trust policy. Handshake signatures are still checked with the
/// provider's algorithms, so the peer must hold the key for the leaf it sent.
#[derive(Debug)]
pub struct ObservingVerifier {
    provider: Arc<CryptoProvider>,
}

impl ObservingVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for ObservingVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Verifies a presented chain against the bundled webpki roots, after the
/// fact. Used only when untrusted certificates are to be flagged.
pub struct TrustObserver {
    verifier: Arc<WebPkiServerVerifier>,
}

impl TrustObserver {
    pub fn new(provider: Arc<CryptoProvider>) -> anyhow::Result<Self> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let verifier =
            WebPkiServerVerifier::builder_with_provider(Arc::new(root_store), provider)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build webpki verifier: {e}"))?;
        Ok(Self { verifier })
    }

    /// `Err` carries the reason the chain is not trusted for `server_name`.
    pub fn check(
        &self,
        chain: &[CertificateDer<'static>],
        server_name: &ServerName<'static>,
    ) -> Result<(), rustls::Error> {
        let Some((leaf, intermediates)) = chain.split_first() else {
            return Err(rustls::Error::NoCertificatesPresented);
        };
        self.verifier
            .verify_server_cert(leaf, intermediates, server_name, &[], UnixTime::now())
            .map(|_| ())
    }
}
