//! High-level IMAP session establishment.

/// The effective session type we use.
pub type Session = async_imap::Session<imap_tls::TlsStream>;

/// IMAP session params.
#[derive(Debug, Clone, PartialEq)]
pub struct Params<'a> {
    /// Hostname or IP address of the IMAP server.
    pub host: &'a str,

    /// IMAP port.
    pub port: u16,

    /// TLS mode.
    pub tls_mode: imap_tls::TlsMode,

    /// TLS server name (SNI).
    pub tls_server_name: &'a str,

    /// Skip server certificate verification.
    pub tls_insecure: bool,

    /// Username for IMAP authentication.
    pub username: &'a str,

    /// Password for IMAP authentication.
    pub password: &'a str,
}

/// Errors returned while establishing a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP connection error.
    #[error("TCP connection error: {0}")]
    TcpConnect(#[source] std::io::Error),

    /// TLS connection error.
    #[error("TLS connection error: {0}")]
    TlsConnect(#[source] imap_tls::TlsConnectError),

    /// IMAP login error.
    #[error("login: {0}")]
    Login(#[source] async_imap::error::Error),
}

/// Connect and login to establish an IMAP session.
pub async fn establish(params: Params<'_>) -> Result<Session, Error> {
    let Params {
        host,
        port,
        tls_mode,
        tls_server_name,
        tls_insecure,
        username,
        password,
    } = params;

    tracing::debug!(
        imap_host = %host,
        imap_port = port,
        imap_tls_mode = ?tls_mode,
        tls_server_name = %tls_server_name,
        "connecting to an IMAP server"
    );

    let tcp_stream = tokio::net::TcpStream::connect((host, port))
        .await
        .map_err(Error::TcpConnect)?;
    let tls_connector = imap_tls::connector(tls_insecure).map_err(Error::TlsConnect)?;
    let client = imap_tls::connect(tcp_stream, tls_server_name, tls_mode, tls_connector)
        .await
        .map_err(Error::TlsConnect)?;

    let session = client
        .login(username, password)
        .await
        .map_err(|(err, _client)| err)
        .map_err(Error::Login)?;

    Ok(session)
}

/// Default IMAP port for the given TLS mode.
pub const fn default_port(tls_mode: imap_tls::TlsMode) -> u16 {
    match tls_mode {
        imap_tls::TlsMode::Implicit => 993,
        imap_tls::TlsMode::StartTls => 143,
    }
}
