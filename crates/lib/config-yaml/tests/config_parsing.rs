//! Tests for config YAML parsing.

use config_core::*;

fn must_parse(yaml: &str) -> Config {
    config_yaml::from_yaml_str(yaml).expect("Failed to parse YAML")
}

fn base_server() -> ServerConfig {
    ServerConfig {
        name: "helpdesk".to_string(),
        host: "imap.example.com".to_string(),
        port: None,
        tls: TlsConfig {
            mode: TlsMode::Implicit,
            server_name: None,
            insecure: false,
        },
        credentials: Credentials {
            username: "tickets@example.com".to_string(),
            password: "secret".to_string(),
        },
        mailboxes: vec![MailboxRoute {
            name: "INBOX".to_string(),
            success: "Processed".to_string(),
            failure: "Errors".to_string(),
        }],
    }
}

fn base_runtime() -> RuntimeConfig {
    RuntimeConfig {
        max_query_messages: 10,
        query_interval_ms: 60_000,
        join_original_as_eml: true,
        join_attachments: true,
        truncate_comments_after_delimiter: true,
        comment_delimiters: vec![Delimiter::Literal("Best regards".to_string())],
        permitted_body_attributes: Default::default(),
        default_issue_attrs: DefaultIssueAttrs {
            author_id: "PRS000000000001".to_string(),
            status_id: "STA000000000001".to_string(),
            category_id: "CAT000000000001".to_string(),
            priority_id: "PRI000000000002".to_string(),
            source_id: "SRC000000000003".to_string(),
        },
        on_person_not_found: PersonNotFound::CreateSystemIssue,
        spam: SpamConfig {
            time_span_mins: 60,
            max_issues: 5,
            headers: vec!["Auto-Submitted".to_string()],
            exempt_authors: vec!["PRS000000000001".to_string()],
        },
    }
}

fn base_rest() -> RestConfig {
    RestConfig {
        protocol: "https".to_string(),
        host: "tickets.example.com".to_string(),
        port: 8443,
        base_path: "api/v1".to_string(),
        username: "mail2ticket".to_string(),
        password: "hunter2".to_string(),
        db_query_path: "Query".to_string(),
    }
}

#[test]
fn test_basic_config_parsing() {
    let yaml = include_str!("fixtures/basic.yml");
    let config = must_parse(yaml);

    let expected = Config {
        servers: vec![base_server()],
        runtime: RuntimeConfig {
            permitted_body_attributes: [
                ("due date".to_string(), AttrType::Date),
                ("request id".to_string(), AttrType::Id),
                ("department".to_string(), AttrType::String),
            ]
            .into_iter()
            .collect(),
            ..base_runtime()
        },
        rest: base_rest(),
        log: Default::default(),
    };

    assert_eq!(config, expected);
}

#[test]
fn test_regex_delimiter_config_parsing() {
    let yaml = include_str!("fixtures/regex_delimiter.yml");
    let config = must_parse(yaml);

    let expected = Config {
        servers: vec![base_server()],
        runtime: RuntimeConfig {
            comment_delimiters: vec![
                Delimiter::Pattern {
                    pattern: "//-+".to_string(),
                },
                Delimiter::Literal("Best regards".to_string()),
            ],
            ..base_runtime()
        },
        rest: base_rest(),
        log: Default::default(),
    };

    assert_eq!(config, expected);
}

#[test]
fn test_starttls_insecure_config_parsing() {
    let yaml = include_str!("fixtures/starttls_insecure.yml");
    let config = must_parse(yaml);

    let expected = Config {
        servers: vec![ServerConfig {
            port: Some(143),
            tls: TlsConfig {
                mode: TlsMode::StartTls,
                server_name: Some("mail.example.com".to_string()),
                insecure: true,
            },
            ..base_server()
        }],
        runtime: RuntimeConfig {
            on_person_not_found: PersonNotFound::MoveToFailureMailbox,
            ..base_runtime()
        },
        rest: base_rest(),
        log: Default::default(),
    };

    assert_eq!(config, expected);
}

#[test]
fn test_validate_accepts_basic_config() {
    let config = must_parse(include_str!("fixtures/basic.yml"));
    config_yaml::validate(&config).expect("basic config should validate");
}

#[test]
fn test_validate_rejects_empty_servers() {
    let mut config = must_parse(include_str!("fixtures/basic.yml"));
    config.servers.clear();

    assert!(matches!(
        config_yaml::validate(&config),
        Err(config_yaml::ValidateError::NoServers)
    ));
}

#[test]
fn test_validate_rejects_zero_interval() {
    let mut config = must_parse(include_str!("fixtures/basic.yml"));
    config.runtime.query_interval_ms = 0;

    assert!(matches!(
        config_yaml::validate(&config),
        Err(config_yaml::ValidateError::ZeroInterval)
    ));
}

#[test]
fn test_validate_rejects_empty_route_child() {
    let mut config = must_parse(include_str!("fixtures/basic.yml"));
    config.servers[0].mailboxes[0].failure = String::new();

    assert!(matches!(
        config_yaml::validate(&config),
        Err(config_yaml::ValidateError::EmptyMailboxRoute { .. })
    ));
}
