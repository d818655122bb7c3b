//! Docker-backed end-to-end ingestion test.

use std::error::Error;
use std::sync::Mutex;

/// Error the stub gateway never actually returns.
#[derive(Debug, thiserror::Error)]
#[error("stub gateway failure")]
struct StubFailure;

/// Ticketing stub: knows one person, accepts everything, records creates.
#[derive(Default)]
struct StubGateway {
    created_issues: Mutex<Vec<ticket_api::NewIssue>>,
    uploads: Mutex<Vec<String>>,
}

impl message_dispatch::TicketGateway for StubGateway {
    type Error = StubFailure;

    async fn find_person_id(&self, _email: &str) -> Result<Option<String>, Self::Error> {
        Ok(Some("PRS000000000042".to_string()))
    }

    async fn issue_exists(&self, _issue_id: &str) -> Result<bool, Self::Error> {
        Ok(false)
    }

    async fn create_issue(&self, issue: &ticket_api::NewIssue) -> Result<String, Self::Error> {
        self.created_issues
            .lock()
            .expect("stub lock")
            .push(issue.clone());
        Ok("SRQ000000000777".to_string())
    }

    async fn create_comment(
        &self,
        _comment: &ticket_api::NewComment,
    ) -> Result<String, Self::Error> {
        Ok("CMT000000000001".to_string())
    }

    async fn upload_attachment(
        &self,
        _parent: &ticket_api::AttachmentParent,
        upload: ticket_api::AttachmentUpload<'_>,
    ) -> Result<(), Self::Error> {
        self.uploads
            .lock()
            .expect("stub lock")
            .push(upload.file_name.to_string());
        Ok(())
    }

    async fn count_recent_issues(
        &self,
        _person_id: &str,
        _window_mins: u64,
    ) -> Result<u64, Self::Error> {
        Ok(0)
    }

    async fn person_utc_offset(&self, _person_id: &str) -> Result<Option<String>, Self::Error> {
        Ok(Some("+03:00".to_string()))
    }
}

fn runtime() -> config_core::RuntimeConfig {
    config_core::RuntimeConfig {
        max_query_messages: 10,
        query_interval_ms: 60_000,
        join_original_as_eml: true,
        join_attachments: true,
        truncate_comments_after_delimiter: true,
        comment_delimiters: vec![config_core::Delimiter::Literal(
            "Best regards".to_string(),
        )],
        permitted_body_attributes: Default::default(),
        default_issue_attrs: config_core::DefaultIssueAttrs {
            author_id: "PRS000000000001".to_string(),
            status_id: "STA000000000001".to_string(),
            category_id: "CAT000000000001".to_string(),
            priority_id: "PRI000000000002".to_string(),
            source_id: "SRC000000000003".to_string(),
        },
        on_person_not_found: config_core::PersonNotFound::CreateSystemIssue,
        spam: config_core::SpamConfig {
            time_span_mins: 60,
            max_issues: 5,
            headers: vec!["Auto-Submitted".to_string()],
            exempt_authors: Vec::new(),
        },
    }
}

const IMAP_USER: &str = "test";
const IMAP_PASSWORD: &str = "secret";

const MESSAGE: &[u8] = b"From: Alice <alice@example.com>\r\n\
Subject: Printer broken\r\n\
Content-Type: text/plain\r\n\
\r\n\
Printer dead\r\n\
Best regards\r\n\
Alice\r\n";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unseen_message_becomes_issue_and_moves() -> Result<(), Box<dyn Error + Send + Sync>> {
    if !imap_integration::integration_tests_enabled() {
        eprintln!("integration tests disabled; set MAIL2TICKET_INTEGRATION_TESTS=1");
        return Ok(());
    }

    let container = imap_integration::start_greenmail(IMAP_USER, IMAP_PASSWORD).await?;
    let host = container.get_host().await?.to_string();
    let port = container
        .get_host_port_ipv4(imap_integration::IMAP_PORT)
        .await?;

    let mut session =
        imap_integration::connect_with_retry(&host, port, IMAP_USER, IMAP_PASSWORD).await?;

    session.create("INBOX.Processed").await?;
    session.create("INBOX.Errors").await?;
    session.append("INBOX", None, None, MESSAGE).await?;
    session.noop().await?;

    let routes = vec![config_core::MailboxRoute {
        name: "INBOX".to_string(),
        success: "Processed".to_string(),
        failure: "Errors".to_string(),
    }];
    let pipeline =
        message_dispatch::Pipeline::new(StubGateway::default(), std::sync::Arc::new(runtime()))?;

    mailbox_process::poll_cycle(&mut session, &routes, &pipeline, &host).await?;

    // The issue was created from the truncated body.
    {
        let created = pipeline_issues(&pipeline);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].subject, "Printer broken");
        assert_eq!(created[0].description, "Printer dead<br>");
        assert_eq!(
            created[0].author_id.as_deref(),
            Some("PRS000000000042")
        );
    }

    // The message left the inbox and landed in the success child.
    let inbox = session.select("INBOX").await?;
    assert_eq!(inbox.exists, 0);
    let processed = session.select("INBOX.Processed").await?;
    assert_eq!(processed.exists, 1);

    session.logout().await?;

    Ok(())
}

/// Snapshot the issues the stub recorded.
fn pipeline_issues(
    pipeline: &message_dispatch::Pipeline<StubGateway>,
) -> Vec<ticket_api::NewIssue> {
    pipeline
        .gateway()
        .created_issues
        .lock()
        .expect("stub lock")
        .clone()
}
