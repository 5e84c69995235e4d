//! TLS material and QUIC endpoint configuration
//!
//! The broker presents either a certificate chain loaded from PEM files or a
//! self-signed certificate generated at startup. Clients either trust specific
//! certificates or, for local testing, skip verification entirely.
//!
//! Both sides speak TLS 1.3 only, negotiate the `sports-pubsub` ALPN and use the
//! ring crypto provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{IdleTimeout, TransportConfig};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::version;

use crate::error::{Error, Result};

/// Where the broker's certificate comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// Generate a fresh self-signed certificate for these names
    SelfSigned { subject_alt_names: Vec<String> },

    /// Load a PEM certificate chain and private key
    PemFiles {
        cert_chain: PathBuf,
        private_key: PathBuf,
    },
}

impl Default for CertificateSource {
    fn default() -> Self {
        CertificateSource::SelfSigned {
            subject_alt_names: vec!["localhost".to_string()],
        }
    }
}

impl CertificateSource {
    pub fn pem_files(cert_chain: impl Into<PathBuf>, private_key: impl Into<PathBuf>) -> Self {
        CertificateSource::PemFiles {
            cert_chain: cert_chain.into(),
            private_key: private_key.into(),
        }
    }

    /// Produce the certificate chain and key the broker will present
    pub fn load(&self) -> Result<ServerIdentity> {
        match self {
            CertificateSource::SelfSigned { subject_alt_names } => {
                ServerIdentity::self_signed(subject_alt_names.clone())
            }
            CertificateSource::PemFiles {
                cert_chain,
                private_key,
            } => ServerIdentity::from_pem_files(cert_chain, private_key),
        }
    }
}

/// Certificate chain plus private key
#[derive(Debug)]
pub struct ServerIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    /// Generate a self-signed certificate
    pub fn self_signed(subject_alt_names: Vec<String>) -> Result<Self> {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(subject_alt_names)
                .map_err(|e| Error::Tls(format!("certificate generation failed: {}", e)))?;

        Ok(Self {
            cert_chain: vec![cert.der().clone()],
            private_key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into(),
        })
    }

    /// Load a chain and key from PEM files
    pub fn from_pem_files(cert_chain: &Path, private_key: &Path) -> Result<Self> {
        let chain = load_certificates(cert_chain)?;
        if chain.is_empty() {
            return Err(Error::Tls(format!(
                "no certificates in {}",
                cert_chain.display()
            )));
        }

        let key = PrivateKeyDer::from_pem_file(private_key).map_err(|e| {
            Error::Tls(format!("read private key {}: {}", private_key.display(), e))
        })?;

        Ok(Self {
            cert_chain: chain,
            private_key: key,
        })
    }

    /// End-entity certificate, for clients that want to pin it
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.cert_chain.first()
    }
}

/// How a client checks the broker's certificate
#[derive(Debug, Clone, Default)]
pub enum ServerVerification {
    /// Accept any certificate
    #[default]
    Insecure,

    /// Trust the CA certificates in this PEM file
    CaFile(PathBuf),

    /// Trust exactly these certificates
    Certificates(Vec<CertificateDer<'static>>),
}

/// Read every certificate in a PEM file
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_file_iter(path)
        .map_err(|e| Error::Tls(format!("open {}: {}", path.display(), e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("read certificates {}: {}", path.display(), e)))
}

/// Build the quinn transport parameters shared by both sides
pub fn transport_config(idle_timeout: Duration, keep_alive: Option<Duration>) -> Result<TransportConfig> {
    let mut transport = TransportConfig::default();
    let idle = IdleTimeout::try_from(idle_timeout)
        .map_err(|_| Error::Tls(format!("idle timeout out of range: {:?}", idle_timeout)))?;
    transport.max_idle_timeout(Some(idle));
    transport.keep_alive_interval(keep_alive);
    Ok(transport)
}

/// Build the broker's QUIC server configuration
pub fn server_config(
    identity: ServerIdentity,
    alpn: &[u8],
    transport: TransportConfig,
) -> Result<quinn::ServerConfig> {
    let mut tls = rustls::ServerConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_protocol_versions(&[&version::TLS13])
    .map_err(|e| Error::Tls(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(identity.cert_chain, identity.private_key)
    .map_err(|e| Error::Tls(e.to_string()))?;
    tls.alpn_protocols = vec![alpn.to_vec()];

    let crypto = QuicServerConfig::try_from(Arc::new(tls))
        .map_err(|e| Error::Tls(format!("invalid QUIC server config: {:?}", e)))?;

    let mut config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    config.transport_config(Arc::new(transport));
    Ok(config)
}

/// Build a client QUIC configuration
pub fn client_config(
    verification: &ServerVerification,
    alpn: &[u8],
    transport: TransportConfig,
) -> Result<quinn::ClientConfig> {
    let builder = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_protocol_versions(&[&version::TLS13])
    .map_err(|e| Error::Tls(e.to_string()))?;

    let mut tls = match verification {
        ServerVerification::Insecure => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification::new()))
            .with_no_client_auth(),
        ServerVerification::CaFile(path) => {
            let roots = root_store(load_certificates(path)?)?;
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        ServerVerification::Certificates(certs) => {
            let roots = root_store(certs.clone())?;
            builder.with_root_certificates(roots).with_no_client_auth()
        }
    };
    tls.alpn_protocols = vec![alpn.to_vec()];

    let crypto = QuicClientConfig::try_from(Arc::new(tls))
        .map_err(|e| Error::Tls(format!("invalid QUIC client config: {:?}", e)))?;

    let mut config = quinn::ClientConfig::new(Arc::new(crypto));
    config.transport_config(Arc::new(transport));
    Ok(config)
}

fn root_store(certs: Vec<CertificateDer<'static>>) -> Result<rustls::RootCertStore> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| Error::Tls(format!("add trusted certificate: {}", e)))?;
    }
    Ok(roots)
}

/// Accepts any server certificate; signatures are still checked
#[derive(Debug)]
struct SkipServerVerification(Arc<rustls::crypto::CryptoProvider>);

impl SkipServerVerification {
    fn new() -> Self {
        Self(Arc::new(rustls::crypto::ring::default_provider()))
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
