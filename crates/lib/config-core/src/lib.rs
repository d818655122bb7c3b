//! Shared configuration types for mail2ticket.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// IMAP servers to ingest from.
    pub servers: Vec<ServerConfig>,

    /// Message pipeline settings shared by all servers.
    pub runtime: RuntimeConfig,

    /// Ticketing REST endpoint settings.
    pub rest: RestConfig,

    /// Log sink settings.
    #[serde(default)]
    pub log: LogConfig,
}

/// An ingested IMAP server.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Human-friendly name for logging and identification.
    pub name: String,

    /// Hostname or IP address of the IMAP server.
    pub host: String,

    /// Optional port override.
    pub port: Option<u16>,

    /// TLS settings.
    pub tls: TlsConfig,

    /// Credentials for authentication.
    pub credentials: Credentials,

    /// Watched mailboxes on this server, in processing order.
    pub mailboxes: Vec<MailboxRoute>,
}

/// TLS configuration for a server.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsConfig {
    /// TLS mode.
    pub mode: TlsMode,

    /// Optional override for the TLS server name (SNI).
    pub server_name: Option<String>,

    /// Skip server certificate verification.
    ///
    /// Off by default; only for servers with broken certificate chains.
    #[serde(default)]
    pub insecure: bool,
}

/// Supported TLS modes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    /// Implicit TLS (usually port 993).
    Implicit,

    /// STARTTLS upgrade (usually port 143).
    #[serde(alias = "starttls", alias = "start_tls", alias = "start-tls")]
    StartTls,
}

/// Credentials for IMAP authentication.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Credentials {
    /// Username for IMAP authentication.
    pub username: String,

    /// Password for IMAP authentication.
    pub password: String,
}

/// A watched mailbox and the children processed messages move into.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MailboxRoute {
    /// Mailbox name at the hierarchy root (e.g. INBOX).
    pub name: String,

    /// Direct child receiving successfully processed messages.
    pub success: String,

    /// Direct child receiving failed messages.
    pub failure: String,
}

/// Message pipeline settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Per-poll cap on messages processed per mailbox.
    pub max_query_messages: usize,

    /// Poll interval (milliseconds).
    pub query_interval_ms: u64,

    /// Attach the raw RFC822 source to new issues.
    pub join_original_as_eml: bool,

    /// Upload message attachments to the created issue or comment.
    pub join_attachments: bool,

    /// Cut quoted trailing content at the first matching delimiter.
    pub truncate_comments_after_delimiter: bool,

    /// Delimiters tried in order against the message body.
    #[serde(default)]
    pub comment_delimiters: Vec<Delimiter>,

    /// Body attributes lifted into issue fields, keyed by field name.
    #[serde(default)]
    pub permitted_body_attributes: BTreeMap<String, AttrType>,

    /// Fallback ids used when building issues.
    pub default_issue_attrs: DefaultIssueAttrs,

    /// What to do when the sender is unknown to the ticketing system.
    pub on_person_not_found: PersonNotFound,

    /// Spam gate settings.
    pub spam: SpamConfig,
}

/// A body delimiter: either a literal substring or a regex.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum Delimiter {
    /// Literal substring match.
    Literal(String),

    /// Regular expression match.
    Pattern {
        /// The regex source.
        pattern: String,
    },
}

/// Type tag of a permitted body attribute.
#[derive(Debug, Clone, Copy, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttrType {
    /// `DD[-/]MM[-/]YYYY[ HH:MM]`, canonicalized to ISO local time.
    Date,

    /// Three uppercase letters followed by twelve digits.
    Id,

    /// A run of non-whitespace characters.
    String,
}

/// Fallback ids applied to issues built by the pipeline.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DefaultIssueAttrs {
    /// Author id used for system-created issues.
    pub author_id: String,

    /// Default status id.
    pub status_id: String,

    /// Default category id.
    pub category_id: String,

    /// Default priority id.
    pub priority_id: String,

    /// Default source id.
    pub source_id: String,
}

/// Policy for messages whose sender has no person record.
#[derive(Debug, Clone, Copy, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonNotFound {
    /// Create a system issue authored by the default author id.
    CreateSystemIssue,

    /// Move the message straight to the failure child.
    MoveToFailureMailbox,
}

/// Spam gate settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SpamConfig {
    /// Look-back window (minutes) for the recent-issue count.
    pub time_span_mins: u64,

    /// Maximum recent issues per author before rejection.
    pub max_issues: u64,

    /// Header names whose presence rejects the message outright.
    #[serde(default)]
    pub headers: Vec<String>,

    /// Author ids never checked against the spam gate.
    #[serde(default)]
    pub exempt_authors: Vec<String>,
}

/// Ticketing REST endpoint settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RestConfig {
    /// URL scheme (http or https).
    pub protocol: String,

    /// Hostname of the ticketing system.
    pub host: String,

    /// Port of the ticketing system.
    pub port: u16,

    /// Base path prefix for all resource routes.
    pub base_path: String,

    /// Basic auth username.
    pub username: String,

    /// Basic auth password.
    pub password: String,

    /// Path of the raw-SQL query endpoint, relative to the base path.
    pub db_query_path: String,
}

/// Log sink settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogConfig {
    /// Directory the log files are written into.
    pub dir: PathBuf,

    /// File receiving info-level lines.
    pub info_file: String,

    /// File receiving error-level lines.
    pub error_file: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            info_file: "mail2ticket.info.log".to_string(),
            error_file: "mail2ticket.error.log".to_string(),
        }
    }
}
