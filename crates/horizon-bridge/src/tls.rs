//! Trust anchors and transport credentials.
//!
//! A [`TrustAnchor`] is the fixed set of certificate authorities a channel will
//! accept. It is parsed once at startup from in-memory PEM data and never
//! changes; rotating trust means building a new anchor and a new channel.
//!
//! Verification uses the anchor exclusively. There is no fallback to the
//! system or bundled web roots, so a channel's behaviour depends on nothing
//! but its configuration.
//!
//! A server may present one of the anchor's own certificates as its leaf,
//! even one marked as a CA. Such a pinned certificate is accepted once its
//! validity period and server name check out.
//!
//! ```ignore
//! use horizon_bridge::tls::{TransportCredentials, TrustAnchor};
//!
//! let anchor = TrustAnchor::from_pem(include_bytes!("ca.pem"))?;
//! let credentials = TransportCredentials::from_trust_anchor(&anchor)?;
//! ```

use std::io::{BufReader, Cursor};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{WebPkiServerVerifier, verify_server_name};
use rustls::crypto::CryptoProvider;
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::error::{BridgeError, Result};
use crate::targets;

/// ALPN identifier for HTTP/2, required by gRPC.
const ALPN_H2: &[u8] = b"h2";

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2 (default minimum).
    #[default]
    Tls1_2,
    /// TLS 1.3 only.
    Tls1_3,
}

impl TlsVersion {
    fn to_rustls_versions(self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        match self {
            TlsVersion::Tls1_2 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::Tls1_3 => vec![&rustls::version::TLS13],
        }
    }
}

/// An immutable set of trusted certificate authorities.
#[derive(Clone)]
pub struct TrustAnchor {
    roots: Arc<RootCertStore>,
    certificates: Arc<[CertificateDer<'static>]>,
    skipped: usize,
}

impl std::fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("cert_count", &self.certificates.len())
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl TrustAnchor {
    /// Build an anchor from a PEM bundle holding one or more certificate blocks.
    ///
    /// Blocks that are not valid PEM, or whose contents are not a parseable
    /// X.509 certificate, are skipped. At least one certificate must survive.
    pub fn from_pem(pem_data: impl AsRef<[u8]>) -> Result<Self> {
        Self::from_pem_blocks(std::iter::once(pem_data))
    }

    /// Build an anchor from separately supplied PEM blocks.
    ///
    /// Each element may itself contain several blocks.
    pub fn from_pem_blocks<I, B>(blocks: I) -> Result<Self>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut roots = RootCertStore::empty();
        let mut certificates = Vec::new();
        let mut skipped = 0;

        for block in blocks {
            let mut reader = BufReader::new(Cursor::new(block.as_ref()));
            for parsed in rustls_pemfile::certs(&mut reader) {
                let der = match parsed {
                    Ok(der) => der,
                    Err(e) => {
                        tracing::warn!(target: targets::TLS, "Skipping malformed PEM block: {}", e);
                        skipped += 1;
                        continue;
                    }
                };
                match roots.add(der.clone()) {
                    Ok(()) => certificates.push(der),
                    Err(e) => {
                        tracing::warn!(target: targets::TLS, "Skipping unparseable certificate: {}", e);
                        skipped += 1;
                    }
                }
            }
        }

        if certificates.is_empty() {
            return Err(BridgeError::Configuration(format!(
                "no usable certificates in trust bundle ({} skipped)",
                skipped
            )));
        }

        tracing::debug!(
            target: targets::TLS,
            "Trust anchor built with {} certificate(s), {} skipped",
            certificates.len(),
            skipped
        );

        Ok(Self {
            roots: Arc::new(roots),
            certificates: certificates.into(),
            skipped,
        })
    }

    /// Number of trusted certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Always false; an anchor cannot be empty.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Number of input blocks that were rejected while building.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// DER encodings of the trusted certificates, in input order.
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }
}

/// TLS client credentials derived from a [`TrustAnchor`].
#[derive(Clone)]
pub struct TransportCredentials {
    config: Arc<ClientConfig>,
    min_version: TlsVersion,
}

impl std::fmt::Debug for TransportCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCredentials")
            .field("min_version", &self.min_version)
            .field("alpn", &self.config.alpn_protocols.len())
            .finish()
    }
}

impl TransportCredentials {
    /// Credentials that trust exactly `anchor`, TLS 1.2 or newer.
    pub fn from_trust_anchor(anchor: &TrustAnchor) -> Result<Self> {
        Self::with_min_version(anchor, TlsVersion::default())
    }

    /// Credentials that trust exactly `anchor` with a chosen minimum version.
    pub fn with_min_version(anchor: &TrustAnchor, min_version: TlsVersion) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = min_version.to_rustls_versions();

        let mut config = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)
            .map_err(|e| BridgeError::Configuration(format!("Unsupported TLS versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AnchorVerifier::new(anchor, provider)?))
            .with_no_client_auth();
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        Ok(Self {
            config: Arc::new(config),
            min_version,
        })
    }

    /// The minimum negotiated protocol version.
    pub fn min_version(&self) -> TlsVersion {
        self.min_version
    }

    /// The underlying rustls client configuration.
    pub(crate) fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }
}

/// Chain verification against the anchor, plus acceptance of a leaf that is
/// byte-for-byte one of the anchor's certificates.
#[derive(Debug)]
struct AnchorVerifier {
    pinned: Arc<[CertificateDer<'static>]>,
    webpki: Arc<WebPkiServerVerifier>,
}

impl AnchorVerifier {
    fn new(anchor: &TrustAnchor, provider: Arc<CryptoProvider>) -> Result<Self> {
        let webpki = WebPkiServerVerifier::builder_with_provider(anchor.roots.clone(), provider)
            .build()
            .map_err(|e| BridgeError::Configuration(format!("Invalid trust anchor: {}", e)))?;
        Ok(Self {
            pinned: anchor.certificates.clone(),
            webpki,
        })
    }

    fn is_pinned(&self, end_entity: &CertificateDer<'_>) -> bool {
        self.pinned
            .iter()
            .any(|cert| cert.as_ref() == end_entity.as_ref())
    }
}

impl ServerCertVerifier for AnchorVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let err = match self.webpki.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => return Ok(verified),
            Err(err) => err,
        };

        // Validity and encoding failures map to specific variants and stay
        // fatal. `Other` carries constraint errors such as a CA certificate
        // presented as the leaf.
        let pinned = self.is_pinned(end_entity);
        if !pinned || !matches!(err, rustls::Error::InvalidCertificate(CertificateError::Other(_)))
        {
            return Err(err);
        }

        let parsed = ParsedCertificate::try_from(end_entity)?;
        verify_server_name(&parsed, server_name)?;
        tracing::debug!(
            target: targets::TLS,
            "Accepted pinned anchor certificate for {:?} ({})",
            server_name,
            err
        );
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}
