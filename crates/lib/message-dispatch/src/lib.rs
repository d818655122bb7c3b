//! Per-message dispatch: classify, gate, create, upload.

use std::collections::BTreeMap;
use std::future::Future;

/// Operations the pipeline needs from the ticketing system.
///
/// Implemented by [`ticket_api::Client`]; tests substitute their own.
pub trait TicketGateway: Send + Sync {
    /// Gateway error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Look up a person id by email address.
    fn find_person_id(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Whether an issue with the given id exists.
    fn issue_exists(
        &self,
        issue_id: &str,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Create an issue and return its id.
    fn create_issue(
        &self,
        issue: &ticket_api::NewIssue,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Create a comment and return its id.
    fn create_comment(
        &self,
        comment: &ticket_api::NewComment,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Upload one attachment to its parent entity.
    fn upload_attachment(
        &self,
        parent: &ticket_api::AttachmentParent,
        upload: ticket_api::AttachmentUpload<'_>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Count issues created by the author within the last `window_mins`.
    fn count_recent_issues(
        &self,
        person_id: &str,
        window_mins: u64,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Fetch the UTC offset of a person, when known.
    fn person_utc_offset(
        &self,
        person_id: &str,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;
}

impl TicketGateway for ticket_api::Client {
    type Error = ticket_api::Error;

    async fn find_person_id(&self, email: &str) -> Result<Option<String>, Self::Error> {
        ticket_api::Client::find_person_id(self, email).await
    }

    async fn issue_exists(&self, issue_id: &str) -> Result<bool, Self::Error> {
        ticket_api::Client::issue_exists(self, issue_id).await
    }

    async fn create_issue(&self, issue: &ticket_api::NewIssue) -> Result<String, Self::Error> {
        ticket_api::Client::create_issue(self, issue).await
    }

    async fn create_comment(
        &self,
        comment: &ticket_api::NewComment,
    ) -> Result<String, Self::Error> {
        ticket_api::Client::create_comment(self, comment).await
    }

    async fn upload_attachment(
        &self,
        parent: &ticket_api::AttachmentParent,
        upload: ticket_api::AttachmentUpload<'_>,
    ) -> Result<(), Self::Error> {
        ticket_api::Client::upload_attachment(self, parent, upload).await
    }

    async fn count_recent_issues(
        &self,
        person_id: &str,
        window_mins: u64,
    ) -> Result<u64, Self::Error> {
        ticket_api::Client::count_recent_issues(self, person_id, window_mins).await
    }

    async fn person_utc_offset(&self, person_id: &str) -> Result<Option<String>, Self::Error> {
        ticket_api::Client::person_utc_offset(self, person_id).await
    }
}

/// Where a dispatched message settles.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// Processed; the message moves to the success child.
    Accepted,

    /// Rejected; the message moves to the failure child.
    Rejected(Rejection),
}

/// Why a message was rejected.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Rejection {
    /// The spam gate rejected the author or the message headers.
    Spam,

    /// The sender is unknown and policy routes such messages to failure.
    PersonNotFound,

    /// The ticketing system rejected or failed the create call.
    Gateway,

    /// The raw message could not be parsed.
    UnreadableMessage,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "success"),
            Self::Rejected(rejection) => write!(f, "failure ({rejection})"),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spam => write!(f, "spam"),
            Self::PersonNotFound => write!(f, "person not found"),
            Self::Gateway => write!(f, "ticketing request failed"),
            Self::UnreadableMessage => write!(f, "unreadable message"),
        }
    }
}

/// The per-message pipeline, built once per server from the runtime config.
#[derive(Debug, Clone)]
pub struct Pipeline<G> {
    /// Ticketing gateway.
    gateway: G,

    /// Shared runtime configuration.
    runtime: std::sync::Arc<config_core::RuntimeConfig>,

    /// Compiled body delimiters, in configuration order.
    delimiters: Vec<body_process::Delimiter>,

    /// Compiled permitted attribute matchers.
    extractor: body_process::FieldExtractor,

    /// Issue id pattern recognized in subjects.
    subject_issue_id: regex::Regex,
}

impl<G> Pipeline<G>
where
    G: TicketGateway,
{
    /// Compile the pipeline from the runtime configuration.
    pub fn new(
        gateway: G,
        runtime: std::sync::Arc<config_core::RuntimeConfig>,
    ) -> Result<Self, regex::Error> {
        let delimiters = body_process::compile_delimiters(&runtime.comment_delimiters)?;
        let extractor = body_process::FieldExtractor::new(&runtime.permitted_body_attributes)?;
        let subject_issue_id = regex::Regex::new(r"SRQ\d{12}")?;

        Ok(Self {
            gateway,
            runtime,
            delimiters,
            extractor,
            subject_issue_id,
        })
    }

    /// The runtime configuration the pipeline was built from.
    pub fn runtime(&self) -> &config_core::RuntimeConfig {
        &self.runtime
    }

    /// The ticketing gateway the pipeline dispatches through.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Dispatch one parsed message and report where it settles.
    ///
    /// Every path ends in an [`Outcome`]; nothing here escalates past the
    /// message.
    pub async fn dispatch(&self, message: &message_parse::MailMessage) -> Outcome {
        let (body, kind) =
            body_process::effective_body(message.html.as_deref(), message.text.as_deref());
        let fields = self.extractor.extract(&body_process::matchable_text(body));
        let rendered = self.render_body(body, kind);

        let referenced_issue = self
            .subject_issue_id
            .find(&message.subject)
            .map(|found| found.as_str().to_string());

        if let Some(issue_id) = referenced_issue {
            match self.gateway.issue_exists(&issue_id).await {
                Ok(true) => return self.comment_flow(message, &issue_id, rendered).await,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        uid = message.uid,
                        issue_id = %issue_id,
                        error = %err,
                        "referenced issue lookup failed, treating as new issue"
                    );
                }
            }
        }

        self.issue_flow(message, rendered, fields).await
    }

    /// Apply delimiter truncation when configured.
    fn render_body(&self, body: &str, kind: body_process::BodyKind) -> String {
        if !self.runtime.truncate_comments_after_delimiter || self.delimiters.is_empty() {
            return body.to_string();
        }

        match kind {
            body_process::BodyKind::Html => body_process::truncate_html(body, &self.delimiters),
            body_process::BodyKind::Text => body_process::truncate_text(body, &self.delimiters),
        }
    }

    /// Attach the message as a comment on an existing issue.
    async fn comment_flow(
        &self,
        message: &message_parse::MailMessage,
        issue_id: &str,
        comment_body: String,
    ) -> Outcome {
        let person = self.lookup_person(message).await;

        if let Some(person_id) = &person {
            if let spam_gate::Verdict::Reject(reason) = self.spam_check(person_id, message).await {
                tracing::error!(
                    uid = message.uid,
                    person_id = %person_id,
                    reason = %reason,
                    "spam alert: comment rejected"
                );
                return Outcome::Rejected(Rejection::Spam);
            }
        }

        let comment = ticket_api::NewComment {
            issue_id: issue_id.to_string(),
            comment: comment_body,
            author_id: person,
        };

        match self.gateway.create_comment(&comment).await {
            Ok(comment_id) => {
                let parent = ticket_api::AttachmentParent::Comment(comment_id);
                self.upload_attachments(&parent, message).await;
                Outcome::Accepted
            }
            Err(err) => {
                tracing::error!(
                    uid = message.uid,
                    issue_id = %issue_id,
                    error = %err,
                    "comment creation failed"
                );
                Outcome::Rejected(Rejection::Gateway)
            }
        }
    }

    /// Open a new issue for the message.
    async fn issue_flow(
        &self,
        message: &message_parse::MailMessage,
        description: String,
        fields: BTreeMap<String, String>,
    ) -> Outcome {
        let Some(person_id) = self.lookup_person(message).await else {
            return match self.runtime.on_person_not_found {
                config_core::PersonNotFound::CreateSystemIssue => {
                    let author = self.runtime.default_issue_attrs.author_id.clone();
                    self.create_issue(message, description, fields, author).await
                }
                config_core::PersonNotFound::MoveToFailureMailbox => {
                    tracing::error!(
                        uid = message.uid,
                        sender = message.from_address.as_deref().unwrap_or("<none>"),
                        "sender unknown to the ticketing system"
                    );
                    Outcome::Rejected(Rejection::PersonNotFound)
                }
            };
        };

        if let spam_gate::Verdict::Reject(reason) = self.spam_check(&person_id, message).await {
            tracing::error!(
                uid = message.uid,
                person_id = %person_id,
                reason = %reason,
                "spam alert: issue rejected"
            );
            return Outcome::Rejected(Rejection::Spam);
        }

        let offset = match self.gateway.person_utc_offset(&person_id).await {
            Ok(Some(offset)) => offset,
            Ok(None) => "+00:00".to_string(),
            Err(err) => {
                tracing::warn!(
                    uid = message.uid,
                    person_id = %person_id,
                    error = %err,
                    "timezone lookup failed, using +00:00"
                );
                "+00:00".to_string()
            }
        };
        let fields = append_offset_to_dates(fields, &offset);

        self.create_issue(message, description, fields, person_id)
            .await
    }

    /// Create the issue and run the post-create uploads.
    async fn create_issue(
        &self,
        message: &message_parse::MailMessage,
        description: String,
        fields: BTreeMap<String, String>,
        author_id: String,
    ) -> Outcome {
        let defaults = &self.runtime.default_issue_attrs;
        let issue = ticket_api::NewIssue {
            subject: message.subject.clone(),
            description,
            author_id: Some(author_id),
            status_id: defaults.status_id.clone(),
            category_id: defaults.category_id.clone(),
            priority_id: defaults.priority_id.clone(),
            source_id: defaults.source_id.clone(),
            fields,
        };

        match self.gateway.create_issue(&issue).await {
            Ok(issue_id) => {
                let parent = ticket_api::AttachmentParent::Issue(issue_id);
                if self.runtime.join_original_as_eml {
                    self.upload_eml(&parent, message).await;
                }
                self.upload_attachments(&parent, message).await;
                Outcome::Accepted
            }
            Err(err) => {
                tracing::error!(uid = message.uid, error = %err, "issue creation failed");
                Outcome::Rejected(Rejection::Gateway)
            }
        }
    }

    /// Resolve the sender to a person id; lookup failures count as unknown.
    async fn lookup_person(&self, message: &message_parse::MailMessage) -> Option<String> {
        let address = message.from_address.as_deref()?;

        match self.gateway.find_person_id(address).await {
            Ok(person) => person,
            Err(err) => {
                tracing::warn!(
                    uid = message.uid,
                    sender = %address,
                    error = %err,
                    "person lookup failed"
                );
                None
            }
        }
    }

    /// Run the spam gate against the message author.
    async fn spam_check(
        &self,
        person_id: &str,
        message: &message_parse::MailMessage,
    ) -> spam_gate::Verdict {
        spam_gate::check(&self.runtime.spam, person_id, &message.headers, || {
            self.gateway
                .count_recent_issues(person_id, self.runtime.spam.time_span_mins)
        })
        .await
    }

    /// Upload the decoded attachments of one message concurrently.
    ///
    /// Upload failures are logged and never affect the message outcome.
    async fn upload_attachments(
        &self,
        parent: &ticket_api::AttachmentParent,
        message: &message_parse::MailMessage,
    ) {
        if !self.runtime.join_attachments {
            return;
        }

        let uploads = message.attachments.iter().map(|attachment| {
            let upload = ticket_api::AttachmentUpload {
                file_name: &attachment.file_name,
                content_type: &attachment.content_type,
                content: &attachment.content,
            };
            async move {
                if let Err(err) = self.gateway.upload_attachment(parent, upload).await {
                    tracing::error!(
                        uid = message.uid,
                        file_name = %attachment.file_name,
                        error = %err,
                        "attachment upload failed"
                    );
                }
            }
        });

        futures::future::join_all(uploads).await;
    }

    /// Upload the raw RFC822 source of the message.
    async fn upload_eml(
        &self,
        parent: &ticket_api::AttachmentParent,
        message: &message_parse::MailMessage,
    ) {
        let file_name = message.eml_file_name();
        let upload = ticket_api::AttachmentUpload {
            file_name: &file_name,
            content_type: "message/rfc822",
            content: &message.raw,
        };

        if let Err(err) = self.gateway.upload_attachment(parent, upload).await {
            tracing::error!(
                uid = message.uid,
                file_name = %file_name,
                error = %err,
                "EML upload failed"
            );
        }
    }
}

/// Append the UTC offset to every field value that parses as a date.
fn append_offset_to_dates(
    mut fields: BTreeMap<String, String>,
    offset: &str,
) -> BTreeMap<String, String> {
    for value in fields.values_mut() {
        if chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").is_ok() {
            value.push_str(offset);
        }
    }
    fields
}
