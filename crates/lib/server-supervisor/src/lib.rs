//! Per-server connection supervision and the multi-server orchestrator.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fixed cadence for reconnect attempts while disconnected.
const RECONNECT_PERIOD: Duration = Duration::from_secs(10);

/// How often the orchestrator re-checks connection states during stop.
const STOP_SETTLE_PERIOD: Duration = Duration::from_millis(500);

/// Lifecycle state of one supervised connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    /// No session.
    Disconnected = 0,

    /// Session establishment in progress.
    Connecting = 1,

    /// Session established; polling on schedule.
    Authenticated = 2,
}

/// Shared, observable status of one supervised connection.
#[derive(Debug)]
pub struct ConnectionStatus {
    /// Current lifecycle state.
    state: AtomicU8,

    /// True exactly while a poll cycle is in flight.
    is_running: AtomicBool,
}

impl ConnectionStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            is_running: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Authenticated,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Whether a poll cycle is in flight.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Whether the connection is fully quiesced.
    pub fn is_settled(&self) -> bool {
        self.state() == ConnectionState::Disconnected && !self.is_running()
    }
}

/// Why the serve loop returned.
enum ServeEnd {
    /// Graceful shutdown was requested.
    Shutdown,

    /// The session failed; the supervisor should reconnect.
    ConnectionLost(async_imap::error::Error),
}

/// Supervise one server connection until shutdown.
///
/// Connect failures and lost sessions are retried on a fixed cadence; the
/// supervisor itself never returns an error.
pub async fn run_server<G>(
    server: config_core::ServerConfig,
    pipeline: message_dispatch::Pipeline<G>,
    status: Arc<ConnectionStatus>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) where
    G: message_dispatch::TicketGateway,
{
    let mut reported_connect_failure = false;

    loop {
        if *shutdown.borrow() {
            break;
        }

        status.set_state(ConnectionState::Connecting);

        let tls_mode = map_tls_mode(server.tls.mode);
        let port = server.port.unwrap_or_else(|| imap_session::default_port(tls_mode));
        let tls_server_name = server.tls.server_name.as_deref().unwrap_or(&server.host);

        let established = imap_session::establish(imap_session::Params {
            host: &server.host,
            port,
            tls_mode,
            tls_server_name,
            tls_insecure: server.tls.insecure,
            username: &server.credentials.username,
            password: &server.credentials.password,
        })
        .await;

        let mut session = match established {
            Ok(session) => session,
            Err(err) => {
                status.set_state(ConnectionState::Disconnected);
                if reported_connect_failure {
                    tracing::debug!(
                        server_name = %server.name,
                        imap_host = %server.host,
                        error = %err,
                        "IMAP connect retry failed"
                    );
                } else {
                    reported_connect_failure = true;
                    tracing::error!(
                        server_name = %server.name,
                        imap_host = %server.host,
                        error = %err,
                        "IMAP connect failed, retrying on a 10s cadence"
                    );
                }

                if !wait_for_retry(&mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        reported_connect_failure = false;
        status.set_state(ConnectionState::Authenticated);
        tracing::info!(
            server_name = %server.name,
            imap_host = %server.host,
            imap_port = port,
            "IMAP session established"
        );

        let end = serve(&mut session, &server, &pipeline, &status, &mut shutdown).await;
        match end {
            ServeEnd::Shutdown => {
                let _ = session.logout().await;
                status.set_state(ConnectionState::Disconnected);
                tracing::info!(
                    server_name = %server.name,
                    imap_host = %server.host,
                    "IMAP session closed"
                );
                break;
            }
            ServeEnd::ConnectionLost(err) => {
                status.set_state(ConnectionState::Disconnected);
                if is_connection_reset(&err) {
                    tracing::error!(
                        server_name = %server.name,
                        imap_host = %server.host,
                        "IMAP connection reset"
                    );
                } else {
                    tracing::error!(
                        server_name = %server.name,
                        imap_host = %server.host,
                        error = %err,
                        "IMAP session lost, reconnecting on a 10s cadence"
                    );
                }

                if !wait_for_retry(&mut shutdown).await {
                    break;
                }
            }
        }
    }

    status.set_state(ConnectionState::Disconnected);
}

/// Poll on schedule until shutdown or a connection-level failure.
async fn serve<G>(
    session: &mut imap_session::Session,
    server: &config_core::ServerConfig,
    pipeline: &message_dispatch::Pipeline<G>,
    status: &ConnectionStatus,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> ServeEnd
where
    G: message_dispatch::TicketGateway,
{
    let period = Duration::from_millis(pipeline.runtime().query_interval_ms);
    let mut ticks = tokio::time::interval(period);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                return ServeEnd::Shutdown;
            }
            _ = ticks.tick() => {
                // Coalesce ticks: a poll still in flight drops this one.
                if status.is_running.swap(true, Ordering::SeqCst) {
                    continue;
                }

                let result = mailbox_process::poll_cycle(
                    session,
                    &server.mailboxes,
                    pipeline,
                    &server.host,
                )
                .await;
                status.is_running.store(false, Ordering::SeqCst);

                if let Err(err) = result {
                    return ServeEnd::ConnectionLost(err);
                }
            }
        }
    }
}

/// Sleep out the reconnect cadence; false means shutdown arrived first.
async fn wait_for_retry(shutdown: &mut tokio::sync::watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RECONNECT_PERIOD) => true,
        _ = shutdown.changed() => false,
    }
}

/// Convert config TLS mode to IMAP TLS mode.
fn map_tls_mode(mode: config_core::TlsMode) -> imap_tls::TlsMode {
    match mode {
        config_core::TlsMode::Implicit => imap_tls::TlsMode::Implicit,
        config_core::TlsMode::StartTls => imap_tls::TlsMode::StartTls,
    }
}

/// Whether the error is a TCP connection reset.
fn is_connection_reset(error: &async_imap::error::Error) -> bool {
    matches!(
        error,
        async_imap::error::Error::Io(io)
            if io.kind() == std::io::ErrorKind::ConnectionReset
    )
}

/// Errors returned while stopping the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum StopError {
    /// One or more supervisor tasks terminated abnormally.
    #[error("{failures} supervisor task(s) terminated abnormally")]
    Supervisors {
        /// Number of failed tasks.
        failures: usize,
    },
}

/// Owns the supervisors of all configured servers.
pub struct Orchestrator {
    /// Per-server observable status, by server name.
    statuses: Vec<(String, Arc<ConnectionStatus>)>,

    /// Shutdown signal shared by all supervisors.
    shutdown: tokio::sync::watch::Sender<bool>,

    /// The supervisor tasks.
    tasks: tokio::task::JoinSet<()>,
}

/// Spawn one supervisor per configured server.
pub fn spawn<G>(
    servers: Vec<config_core::ServerConfig>,
    pipeline: message_dispatch::Pipeline<G>,
) -> Orchestrator
where
    G: message_dispatch::TicketGateway + Clone + 'static,
{
    let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut tasks = tokio::task::JoinSet::new();
    let mut statuses = Vec::new();

    for server in servers {
        let status = Arc::new(ConnectionStatus::new());
        statuses.push((server.name.clone(), status.clone()));

        let pipeline = pipeline.clone();
        let shutdown_rx = shutdown_rx.clone();
        tasks.spawn(run_server(server, pipeline, status, shutdown_rx));
    }

    Orchestrator {
        statuses,
        shutdown,
        tasks,
    }
}

impl Orchestrator {
    /// Request graceful shutdown and wait until every connection settles.
    ///
    /// Re-checks connection states every 500ms; there is no hard deadline.
    pub async fn stop(mut self) -> Result<(), StopError> {
        let _ = self.shutdown.send(true);

        loop {
            let settled = self
                .statuses
                .iter()
                .all(|(_, status)| status.is_settled());
            if settled {
                break;
            }
            tokio::time::sleep(STOP_SETTLE_PERIOD).await;
        }

        let mut failures = 0usize;
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "supervisor task terminated abnormally");
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(StopError::Supervisors { failures });
        }
        Ok(())
    }
}
