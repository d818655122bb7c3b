//! Docker-backed IMAP integration test harness.

use std::time::Duration;

use testcontainers::{
    GenericImage, ImageExt as _, core::IntoContainerPort as _, runners::AsyncRunner as _,
};

/// IMAP port GreenMail exposes inside the container.
pub const IMAP_PORT: u16 = 3143;

/// Whether Docker-backed integration tests are enabled.
///
/// Tests call this first and return early when the environment does not
/// opt in via `MAIL2TICKET_INTEGRATION_TESTS=1`.
pub fn integration_tests_enabled() -> bool {
    match std::env::var("MAIL2TICKET_INTEGRATION_TESTS") {
        Ok(value) => value == "1" || value.eq_ignore_ascii_case("true"),
        Err(_) => false,
    }
}

/// Start a GreenMail container with one provisioned user.
pub async fn start_greenmail(
    user: &str,
    password: &str,
) -> Result<testcontainers::ContainerAsync<GenericImage>, testcontainers::TestcontainersError> {
    GenericImage::new("greenmail/standalone", "latest")
        .with_exposed_port(IMAP_PORT.tcp())
        .with_wait_for(testcontainers::core::WaitFor::message_on_stdout(
            "Starting GreenMail API server at",
        ))
        .with_env_var("GREENMAIL_USERS", format!("{user}:{password}"))
        .start()
        .await
}

/// Connect and login over plain TCP, retrying until the server is ready.
pub async fn connect_with_retry(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
) -> Result<async_imap::Session<tokio::net::TcpStream>, std::io::Error> {
    let try_connect = || async move {
        let stream = tokio::net::TcpStream::connect((host, port)).await?;

        let mut client = async_imap::Client::new(stream);
        let Some(_) = client.read_response().await.transpose()? else {
            return Err(std::io::Error::other("missing IMAP greeting"));
        };

        client
            .login(user, password)
            .await
            .map_err(|(err, _)| std::io::Error::other(err))
    };

    let mut attempts = 60u8;
    loop {
        let err = match try_connect().await {
            Ok(session) => return Ok(session),
            Err(err) => err,
        };

        let Some(attempts_left) = attempts.checked_sub(1) else {
            return Err(err);
        };

        attempts = attempts_left;
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
