//! RFC822 message parsing into the shapes the pipeline works with.

use mail_parser::MimeHeaders as _;

/// A fully parsed mail message, detached from the raw buffer.
#[derive(Debug, Clone)]
pub struct MailMessage {
    /// IMAP UID of the message in its mailbox.
    pub uid: u32,

    /// Decoded subject line.
    pub subject: String,

    /// Address of the first sender, when present.
    pub from_address: Option<String>,

    /// All headers, names lower-cased, in original order.
    pub headers: Vec<(String, String)>,

    /// Plain text body alternative.
    pub text: Option<String>,

    /// HTML body alternative.
    pub html: Option<String>,

    /// Decoded attachment parts.
    pub attachments: Vec<Attachment>,

    /// Raw RFC822 source bytes.
    pub raw: Vec<u8>,
}

/// A decoded attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// File name, falling back to a generic one when the part has none.
    pub file_name: String,

    /// MIME type of the part.
    pub content_type: String,

    /// Decoded content bytes.
    pub content: Vec<u8>,
}

/// Errors returned while parsing a message.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The byte stream is not a parsable RFC822 message.
    #[error("unparsable RFC822 message")]
    Unparsable,
}

/// Parse a raw RFC822 byte stream fetched for the given UID.
pub fn parse(uid: u32, raw: &[u8]) -> Result<MailMessage, ParseError> {
    let message = mail_parser::MessageParser::default()
        .parse(raw)
        .ok_or(ParseError::Unparsable)?;

    let subject = message.subject().unwrap_or_default().to_string();

    let from_address = message
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string());

    let headers = message
        .headers()
        .iter()
        .map(|header| {
            let value = header
                .value()
                .as_text()
                .map(|s| s.to_string())
                .unwrap_or_default();
            (header.name().to_lowercase(), value)
        })
        .collect();

    let text = message.body_text(0).map(|s| s.to_string());
    let html = message.body_html(0).map(|s| s.to_string());

    let attachments = message
        .attachments()
        .map(|part| Attachment {
            file_name: part
                .attachment_name()
                .unwrap_or("attachment.bin")
                .to_string(),
            content_type: part
                .content_type()
                .map(content_type_string)
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            content: part.contents().to_vec(),
        })
        .collect();

    Ok(MailMessage {
        uid,
        subject,
        from_address,
        headers,
        text,
        html,
        attachments,
        raw: raw.to_vec(),
    })
}

impl MailMessage {
    /// Whether a header with the given name is present (case-insensitive).
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
    }

    /// File name the raw source uploads under.
    pub fn eml_file_name(&self) -> String {
        format!("{}-message.eml", self.uid)
    }
}

/// Render a parsed content type as `type/subtype`.
fn content_type_string(content_type: &mail_parser::ContentType) -> String {
    match content_type.subtype() {
        Some(subtype) => format!("{}/{}", content_type.ctype(), subtype),
        None => content_type.ctype().to_string(),
    }
}
