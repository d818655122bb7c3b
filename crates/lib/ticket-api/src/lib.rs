//! REST client for the external ticketing system.

use std::collections::BTreeMap;

/// Percent-encoding set for RFC 5987 `filename*` values: everything but
/// unreserved characters.
const FILENAME_ESCAPE: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A new issue to create.
#[derive(Debug, Clone)]
pub struct NewIssue {
    /// Issue subject, taken from the message subject.
    pub subject: String,

    /// Issue description, the processed message body.
    pub description: String,

    /// Author person id; `None` builds an authorless issue.
    pub author_id: Option<String>,

    /// Status id.
    pub status_id: String,

    /// Category id.
    pub category_id: String,

    /// Priority id.
    pub priority_id: String,

    /// Source id.
    pub source_id: String,

    /// Extra fields extracted from the message body.
    pub fields: BTreeMap<String, String>,
}

/// A new comment to attach to an existing issue.
#[derive(Debug, Clone)]
pub struct NewComment {
    /// Id of the issue the comment belongs to.
    pub issue_id: String,

    /// Comment text, the processed message body.
    pub comment: String,

    /// Author person id; `None` creates an anonymous comment.
    pub author_id: Option<String>,
}

/// The entity an attachment belongs to.
#[derive(Debug, Clone)]
pub enum AttachmentParent {
    /// An issue, by id.
    Issue(String),

    /// A comment, by id.
    Comment(String),
}

impl AttachmentParent {
    /// Upload path for this parent.
    fn attachments_path(&self) -> String {
        match self {
            Self::Issue(id) => format!("Issues/{id}/attachments"),
            Self::Comment(id) => format!("Comments/{id}/attachments"),
        }
    }
}

/// An attachment payload to upload.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentUpload<'a> {
    /// File name sent in the content disposition.
    pub file_name: &'a str,

    /// MIME type of the content.
    pub content_type: &'a str,

    /// Content bytes.
    pub content: &'a [u8],
}

/// Standard response envelope of the ticketing system.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Envelope {
    /// Zero means success.
    #[serde(rename = "ReturnCode")]
    pub return_code: i64,

    /// Name of the resource carried in `content`.
    #[serde(rename = "ResourceName", default)]
    pub resource_name: Option<String>,

    /// Result objects, keyed by resource name.
    #[serde(default)]
    pub content: Vec<serde_json::Map<String, serde_json::Value>>,

    /// Human-readable messages accompanying the result.
    #[serde(rename = "Messages", default)]
    pub messages: Vec<String>,
}

impl Envelope {
    /// The first content entry under the envelope's resource name.
    pub fn resource(&self) -> Option<&serde_json::Value> {
        let name = self.resource_name.as_deref()?;
        self.content.first()?.get(name)
    }

    /// A field of the resource object.
    pub fn resource_field(&self, field: &str) -> Option<&serde_json::Value> {
        self.resource()?.get(field)
    }

    /// First scalar in the first content entry, for raw query results.
    pub fn first_scalar(&self) -> Option<&serde_json::Value> {
        let value = self.content.first()?.values().next()?;
        match value {
            serde_json::Value::Object(inner) => inner.values().next(),
            other => Some(other),
        }
    }
}

/// Errors returned by the ticketing client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configured base URL does not parse.
    #[error("invalid ticketing base URL: {url}")]
    BaseUrl {
        /// The offending URL.
        url: String,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected HTTP status.
    #[error("HTTP status {status} from {path}")]
    Status {
        /// Response status.
        status: reqwest::StatusCode,
        /// Request path.
        path: String,
    },

    /// The ticketing system rejected the request.
    #[error("request to {path} rejected (code {code}): {messages:?}")]
    Rejected {
        /// Request path.
        path: String,
        /// Envelope return code.
        code: i64,
        /// Envelope messages.
        messages: Vec<String>,
    },

    /// A required field is missing from the response.
    #[error("missing {field} in {path} response")]
    MissingField {
        /// Field name.
        field: &'static str,
        /// Request path.
        path: String,
    },
}

/// Ticketing REST client.
#[derive(Debug, Clone)]
pub struct Client {
    /// Shared HTTP client.
    http: reqwest::Client,

    /// Base URL, with a trailing slash.
    base: reqwest::Url,

    /// Path of the raw-SQL query endpoint.
    db_query_path: String,

    /// Basic auth username.
    username: String,

    /// Basic auth password.
    password: String,
}

impl Client {
    /// Build a client from the REST configuration.
    pub fn new(config: &config_core::RestConfig) -> Result<Self, Error> {
        let base = format!(
            "{}://{}:{}/{}/",
            config.protocol,
            config.host,
            config.port,
            config.base_path.trim_matches('/'),
        );
        let base = reqwest::Url::parse(&base).map_err(|_| Error::BaseUrl { url: base })?;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base,
            db_query_path: config.db_query_path.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Resolve a resource path against the base URL.
    fn url(&self, path: &str) -> Result<reqwest::Url, Error> {
        self.base.join(path).map_err(|_| Error::BaseUrl {
            url: format!("{}{path}", self.base),
        })
    }

    /// Send a request with Basic auth and decode the standard envelope.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<Envelope, Error> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(path = %path, status = %status, "ticketing request");
        if !status.is_success() {
            return Err(Error::Status {
                status,
                path: path.to_string(),
            });
        }

        Ok(response.json().await?)
    }

    /// Decode an envelope, turning non-zero return codes into errors.
    fn accepted(envelope: Envelope, path: &str) -> Result<Envelope, Error> {
        if envelope.return_code != 0 {
            return Err(Error::Rejected {
                path: path.to_string(),
                code: envelope.return_code,
                messages: envelope.messages,
            });
        }
        Ok(envelope)
    }

    /// Look up a person id by email address.
    ///
    /// A non-zero return code or an empty result means the person is
    /// unknown, not an error.
    pub async fn find_person_id(&self, email: &str) -> Result<Option<String>, Error> {
        let mut url = self.url("Persons")?;
        url.query_pairs_mut().append_pair("email", email);

        let envelope = self.send(self.http.get(url), "Persons").await?;
        if envelope.return_code != 0 {
            return Ok(None);
        }

        Ok(envelope
            .resource_field("Id")
            .and_then(|value| value.as_str())
            .map(|id| id.to_string()))
    }

    /// Whether an issue with the given id exists.
    pub async fn issue_exists(&self, issue_id: &str) -> Result<bool, Error> {
        let path = format!("Issues/{issue_id}");
        let envelope = self.send(self.http.get(self.url(&path)?), &path).await?;
        Ok(envelope.return_code == 0 && envelope.resource().is_some())
    }

    /// Create an issue and return its id.
    pub async fn create_issue(&self, issue: &NewIssue) -> Result<String, Error> {
        let mut body = serde_json::Map::new();
        body.insert("Subject".to_string(), issue.subject.clone().into());
        body.insert("Description".to_string(), issue.description.clone().into());
        body.insert(
            "AuthorId".to_string(),
            match &issue.author_id {
                Some(id) => id.clone().into(),
                None => serde_json::Value::Null,
            },
        );
        body.insert("StatusId".to_string(), issue.status_id.clone().into());
        body.insert("CategoryId".to_string(), issue.category_id.clone().into());
        body.insert("PriorityId".to_string(), issue.priority_id.clone().into());
        body.insert("SourceId".to_string(), issue.source_id.clone().into());
        for (name, value) in &issue.fields {
            body.insert(name.clone(), value.clone().into());
        }

        let payload = serde_json::json!({ "ZIssue": body });
        let envelope = self
            .send(self.http.post(self.url("Issues")?).json(&payload), "Issues")
            .await?;
        let envelope = Self::accepted(envelope, "Issues")?;

        envelope
            .resource_field("Id")
            .and_then(|value| value.as_str())
            .map(|id| id.to_string())
            .ok_or(Error::MissingField {
                field: "Id",
                path: "Issues".to_string(),
            })
    }

    /// Create a comment on an existing issue and return its id.
    pub async fn create_comment(&self, comment: &NewComment) -> Result<String, Error> {
        let payload = serde_json::json!({
            "ZComment": {
                "ForeignKey": comment.issue_id,
                "Comment": comment.comment,
                "AuthorId": comment.author_id,
            }
        });

        let envelope = self
            .send(
                self.http.post(self.url("Comments")?).json(&payload),
                "Comments",
            )
            .await?;
        let envelope = Self::accepted(envelope, "Comments")?;

        envelope
            .resource_field("Id")
            .and_then(|value| value.as_str())
            .map(|id| id.to_string())
            .ok_or(Error::MissingField {
                field: "Id",
                path: "Comments".to_string(),
            })
    }

    /// Upload one attachment to its parent entity.
    pub async fn upload_attachment(
        &self,
        parent: &AttachmentParent,
        upload: AttachmentUpload<'_>,
    ) -> Result<(), Error> {
        let path = parent.attachments_path();
        let request = self
            .http
            .post(self.url(&path)?)
            .header(
                reqwest::header::CONTENT_DISPOSITION,
                content_disposition(upload.file_name),
            )
            .header(reqwest::header::CONTENT_TYPE, upload.content_type)
            .body(upload.content.to_vec());

        let envelope = self.send(request, &path).await?;
        Self::accepted(envelope, &path)?;
        Ok(())
    }

    /// Run a raw SQL query through the database endpoint.
    async fn db_query(&self, sql: String) -> Result<Envelope, Error> {
        let path = self.db_query_path.clone();
        let request = self
            .http
            .post(self.url(&path)?)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(sql);

        let envelope = self.send(request, &path).await?;
        Self::accepted(envelope, &path)
    }

    /// Count issues created by the author within the last `window_mins`.
    pub async fn count_recent_issues(
        &self,
        person_id: &str,
        window_mins: u64,
    ) -> Result<u64, Error> {
        let since = chrono::Utc::now() - chrono::Duration::minutes(window_mins as i64);
        let sql = format!(
            "SELECT COUNT(*) FROM Issues WHERE AuthorId = '{}' AND CreatedAt >= '{}'",
            person_id,
            since.format("%Y-%m-%d %H:%M:%S"),
        );

        let envelope = self.db_query(sql).await?;
        let count = envelope
            .first_scalar()
            .and_then(scalar_as_u64)
            .ok_or(Error::MissingField {
                field: "count",
                path: self.db_query_path.clone(),
            })?;

        Ok(count)
    }

    /// Fetch the UTC offset (e.g. `+03:00`) of a person, when known.
    pub async fn person_utc_offset(&self, person_id: &str) -> Result<Option<String>, Error> {
        let sql = format!("SELECT UtcOffset FROM Persons WHERE Id = '{person_id}'");
        let envelope = self.db_query(sql).await?;

        Ok(envelope
            .first_scalar()
            .and_then(|value| value.as_str())
            .map(|offset| offset.to_string()))
    }
}

/// Read a scalar query result as an unsigned count.
fn scalar_as_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(number) => number.as_u64(),
        serde_json::Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// `Content-Disposition` value with an RFC 5987 encoded file name.
fn content_disposition(file_name: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        percent_encoding::utf8_percent_encode(file_name, FILENAME_ESCAPE),
    )
}
