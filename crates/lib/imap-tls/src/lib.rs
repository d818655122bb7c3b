//! TLS plumbing for IMAP connections.

/// TLS stream type used for IMAP connections.
pub type TlsStream = tokio_rustls::client::TlsStream<tokio::net::TcpStream>;

/// How to secure the IMAP connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TlsMode {
    /// Implicit TLS (usually port 993).
    Implicit,

    /// Start with plaintext and upgrade using STARTTLS (usually port 143).
    StartTls,
}

/// Errors returned while preparing or establishing a TLS connection.
#[derive(Debug, thiserror::Error)]
pub enum TlsConnectError {
    /// Failed to load system root certificates.
    #[error("failed to load system root certificates: {0}")]
    RootCerts(#[from] rustls_native_certs::Error),

    /// Invalid DNS name for TLS verification.
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(String),

    /// TLS handshake or I/O error.
    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// IMAP protocol error during STARTTLS.
    #[error("IMAP error: {0}")]
    Imap(#[from] async_imap::error::Error),

    /// The server did not send the expected greeting.
    #[error("IMAP server sent no greeting")]
    MissingGreeting,
}

/// Build a rustls connector.
///
/// The verifying connector uses system root certificates; `insecure`
/// accepts any server certificate and is only for servers with broken
/// certificate chains.
pub fn connector(insecure: bool) -> Result<tokio_rustls::TlsConnector, TlsConnectError> {
    let config = match insecure {
        true => rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(std::sync::Arc::new(AcceptAnyCert))
            .with_no_client_auth(),
        false => rustls::ClientConfig::builder()
            .with_root_certificates(system_roots()?)
            .with_no_client_auth(),
    };

    Ok(std::sync::Arc::new(config).into())
}

/// Collect the platform's trusted roots into a rustls store.
///
/// Certificates the store cannot take are dropped; only a failure to read
/// the platform stores themselves is an error.
fn system_roots() -> Result<rustls::RootCertStore, TlsConnectError> {
    let loaded = rustls_native_certs::load_native_certs();
    if let Some(err) = loaded.errors.into_iter().next() {
        return Err(TlsConnectError::RootCerts(err));
    }

    let mut roots = rustls::RootCertStore::empty();
    for cert in loaded.certs {
        let _ = roots.add(cert);
    }

    Ok(roots)
}

/// Connect to the IMAP server and produce an IMAP client over TLS.
pub async fn connect(
    tcp_stream: tokio::net::TcpStream,
    tls_server_name: &str,
    tls_mode: TlsMode,
    connector: tokio_rustls::TlsConnector,
) -> Result<async_imap::Client<TlsStream>, TlsConnectError> {
    let server_name = rustls::pki_types::ServerName::try_from(tls_server_name.to_string())
        .map_err(|_| TlsConnectError::InvalidDnsName(tls_server_name.to_string()))?;

    match tls_mode {
        TlsMode::Implicit => {
            let tls_stream = connector.connect(server_name, tcp_stream).await?;
            greet(async_imap::Client::new(tls_stream)).await
        }
        TlsMode::StartTls => {
            let mut plain = greet(async_imap::Client::new(tcp_stream)).await?;
            plain.run_command_and_check_ok("STARTTLS", None).await?;

            let tls_stream = connector.connect(server_name, plain.into_inner()).await?;
            Ok(async_imap::Client::new(tls_stream))
        }
    }
}

/// Wait for the server greeting before handing the client out.
async fn greet<S>(mut client: async_imap::Client<S>) -> Result<async_imap::Client<S>, TlsConnectError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + std::fmt::Debug,
{
    match client.read_response().await {
        Some(Ok(_)) => Ok(client),
        Some(Err(e)) => Err(e.into()),
        None => Err(TlsConnectError::MissingGreeting),
    }
}

/// Certificate verifier that accepts anything the server presents.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
