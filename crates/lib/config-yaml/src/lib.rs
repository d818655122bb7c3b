//! YAML configuration loading and validation for mail2ticket.

use std::path::Path;

use config_core::Config;

/// Errors returned while loading the configuration file.
///
/// Loading reads, parses, and validates in one pass; the path is carried in
/// display form for error messages.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Reading the file failed.
    #[error("read config {path}: {source}")]
    Read {
        /// Displayed path of the configuration file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not UTF-8 text.
    #[error("config {path} is not UTF-8 text")]
    NotUtf8 {
        /// Displayed path of the configuration file.
        path: String,
    },

    /// The contents do not match the configuration schema.
    #[error("parse config {path}: {source}")]
    Parse {
        /// Displayed path of the configuration file.
        path: String,
        /// Underlying YAML parse error.
        source: serde_yaml_bw::Error,
    },

    /// The parsed configuration violates a semantic constraint.
    #[error("config {path}: {source}")]
    Invalid {
        /// Displayed path of the configuration file.
        path: String,
        /// The violated constraint.
        source: ValidateError,
    },
}

/// Load and validate configuration from a YAML file on disk.
///
/// The returned configuration has already passed [`validate`].
pub async fn load<P>(path: P) -> Result<Config, LoadError>
where
    P: AsRef<Path>,
{
    let shown = path.as_ref().display().to_string();

    let bytes = tokio::fs::read(path.as_ref())
        .await
        .map_err(|source| LoadError::Read {
            path: shown.clone(),
            source,
        })?;

    let Ok(text) = std::str::from_utf8(&bytes) else {
        return Err(LoadError::NotUtf8 { path: shown });
    };

    let config = from_yaml_str(text).map_err(|source| LoadError::Parse {
        path: shown.clone(),
        source,
    })?;

    validate(&config).map_err(|source| LoadError::Invalid {
        path: shown,
        source,
    })?;

    Ok(config)
}

/// Parse configuration from a YAML string, without validating.
pub fn from_yaml_str(contents: &str) -> Result<Config, serde_yaml_bw::Error> {
    serde_yaml_bw::from_str(contents)
}

/// Errors returned while validating a parsed configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    /// No servers configured.
    #[error("no servers configured")]
    NoServers,

    /// A server has no watched mailboxes.
    #[error("server {server} has no mailboxes configured")]
    NoMailboxes {
        /// Server name.
        server: String,
    },

    /// A mailbox route is missing a name or child name.
    #[error("server {server} has a mailbox route with an empty name or child")]
    EmptyMailboxRoute {
        /// Server name.
        server: String,
    },

    /// The per-poll message cap is zero.
    #[error("max-query-messages must be at least 1")]
    ZeroQueryCap,

    /// The poll interval is zero.
    #[error("query-interval-ms must be non-zero")]
    ZeroInterval,

    /// The spam look-back window is zero.
    #[error("spam time-span-mins must be non-zero")]
    ZeroSpamWindow,
}

/// Validate the semantic constraints the deserializer cannot express.
pub fn validate(config: &Config) -> Result<(), ValidateError> {
    if config.servers.is_empty() {
        return Err(ValidateError::NoServers);
    }

    for server in &config.servers {
        if server.mailboxes.is_empty() {
            return Err(ValidateError::NoMailboxes {
                server: server.name.clone(),
            });
        }

        for route in &server.mailboxes {
            if route.name.is_empty() || route.success.is_empty() || route.failure.is_empty() {
                return Err(ValidateError::EmptyMailboxRoute {
                    server: server.name.clone(),
                });
            }
        }
    }

    if config.runtime.max_query_messages == 0 {
        return Err(ValidateError::ZeroQueryCap);
    }

    if config.runtime.query_interval_ms == 0 {
        return Err(ValidateError::ZeroInterval);
    }

    if config.runtime.spam.time_span_mins == 0 {
        return Err(ValidateError::ZeroSpamWindow);
    }

    Ok(())
}
