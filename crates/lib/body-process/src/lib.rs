//! Body processing: delimiter truncation and typed attribute extraction.

use std::collections::BTreeMap;

/// Which body alternative the pipeline is working on.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BodyKind {
    /// HTML alternative.
    Html,

    /// Plain text alternative.
    Text,
}

/// Pick the effective body: HTML when present, else plain text.
pub fn effective_body<'a>(
    html: Option<&'a str>,
    text: Option<&'a str>,
) -> (&'a str, BodyKind) {
    match html {
        Some(html) => (html, BodyKind::Html),
        None => (text.unwrap_or_default(), BodyKind::Text),
    }
}

/// A compiled body delimiter.
#[derive(Debug, Clone)]
pub enum Delimiter {
    /// Literal substring match.
    Literal(String),

    /// Regular expression match.
    Pattern(regex::Regex),
}

impl Delimiter {
    /// Byte offset of the first match in `text`, if any.
    fn find(&self, text: &str) -> Option<usize> {
        match self {
            Self::Literal(literal) => text.find(literal.as_str()),
            Self::Pattern(pattern) => pattern.find(text).map(|found| found.start()),
        }
    }

    /// Whether `text` contains a match.
    fn matches(&self, text: &str) -> bool {
        self.find(text).is_some()
    }
}

/// Compile configured delimiters, preserving order.
pub fn compile_delimiters(
    configured: &[config_core::Delimiter],
) -> Result<Vec<Delimiter>, regex::Error> {
    configured
        .iter()
        .map(|delimiter| match delimiter {
            config_core::Delimiter::Literal(literal) => {
                Ok(Delimiter::Literal(literal.clone()))
            }
            config_core::Delimiter::Pattern { pattern } => {
                Ok(Delimiter::Pattern(regex::Regex::new(pattern)?))
            }
        })
        .collect()
}

/// Truncate a plain text body at the first match of each delimiter in order,
/// then make the result HTML-safe by turning line breaks into `<br>`.
pub fn truncate_text(body: &str, delimiters: &[Delimiter]) -> String {
    let mut result = body.to_string();

    for delimiter in delimiters {
        if let Some(position) = delimiter.find(&result) {
            result.truncate(position);
        }
    }

    line_breaks_to_br(&result)
}

/// Replace each `\r?\n` with `<br>`.
pub fn line_breaks_to_br(text: &str) -> String {
    text.replace("\r\n", "<br>").replace('\n', "<br>")
}

/// Truncate an HTML body by removing the deepest element containing each
/// delimiter match together with everything to its right, up to `<body>`.
///
/// Returns the input unchanged when no delimiter matches, so untouched
/// documents round-trip byte for byte.
pub fn truncate_html(body: &str, delimiters: &[Delimiter]) -> String {
    if delimiters.is_empty() {
        return body.to_string();
    }

    let Ok(body_selector) = scraper::Selector::parse("body") else {
        return body.to_string();
    };

    let mut document = scraper::Html::parse_document(body);
    let mut mutated = false;

    for delimiter in delimiters {
        let Some(body_element) = document.select(&body_selector).next() else {
            break;
        };

        let body_text: String = body_element.text().collect();
        if !delimiter.matches(&body_text) {
            continue;
        }

        let body_id = body_element.id();
        let target_id = locate_deepest(body_element, delimiter).id();
        mutated = true;

        if target_id == body_id {
            // The match lives directly in the body: empty it.
            let children: Vec<_> = match document.tree.get(body_id) {
                Some(node) => node.children().map(|child| child.id()).collect(),
                None => Vec::new(),
            };
            for id in children {
                if let Some(mut node) = document.tree.get_mut(id) {
                    node.detach();
                }
            }
            continue;
        }

        // Remove the matched element and its right siblings, then climb to
        // the body pruning right siblings at each ancestor.
        let mut to_detach = Vec::new();
        let mut parent_id = None;
        if let Some(node) = document.tree.get(target_id) {
            to_detach.extend(node.next_siblings().map(|sibling| sibling.id()));
            to_detach.push(target_id);
            parent_id = node.parent().map(|parent| parent.id());
        }

        let mut cursor = parent_id;
        while let Some(ancestor_id) = cursor {
            if ancestor_id == body_id {
                break;
            }
            match document.tree.get(ancestor_id) {
                Some(node) => {
                    to_detach.extend(node.next_siblings().map(|sibling| sibling.id()));
                    cursor = node.parent().map(|parent| parent.id());
                }
                None => break,
            }
        }

        for id in to_detach {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    if !mutated {
        return body.to_string();
    }

    match document.select(&body_selector).next() {
        Some(_) => document.root_element().html(),
        None => body.to_string(),
    }
}

/// Descend to the deepest element whose text still contains a match.
fn locate_deepest<'a>(
    element: scraper::ElementRef<'a>,
    delimiter: &Delimiter,
) -> scraper::ElementRef<'a> {
    for child in element.children().filter_map(scraper::ElementRef::wrap) {
        let text: String = child.text().collect();
        if delimiter.matches(&text) {
            return locate_deepest(child, delimiter);
        }
    }

    element
}

/// The text attribute extraction runs against: the `<body>` content for HTML
/// documents, the raw string otherwise.
pub fn matchable_text(body: &str) -> String {
    if !body.trim_start().to_ascii_lowercase().starts_with("<html") {
        return body.to_string();
    }

    let Ok(body_selector) = scraper::Selector::parse("body") else {
        return body.to_string();
    };

    let document = scraper::Html::parse_document(body);
    match document.select(&body_selector).next() {
        Some(body_element) => body_element.text().collect(),
        None => body.to_string(),
    }
}

/// Compiled matchers for the permitted body attributes.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    /// One compiled pattern per permitted attribute.
    patterns: Vec<FieldPattern>,
}

/// A single compiled attribute matcher.
#[derive(Debug, Clone)]
struct FieldPattern {
    /// Field name the extracted value is stored under.
    name: String,

    /// Declared attribute type.
    kind: config_core::AttrType,

    /// Compiled recognition pattern.
    regex: regex::Regex,
}

/// Typed group matched after the key and separator.
const DATE_GROUP: &str = r"(\d{2})[-/](\d{2})[-/](\d{4})(?:\s+(\d{2}):(\d{2}))?";
const ID_GROUP: &str = r"([A-Z]{3}\d{12})";
const STRING_GROUP: &str = r"(\S+)";

impl FieldExtractor {
    /// Compile matchers for the configured permitted attributes.
    pub fn new(
        permitted: &BTreeMap<String, config_core::AttrType>,
    ) -> Result<Self, regex::Error> {
        let patterns = permitted
            .iter()
            .map(|(name, kind)| {
                let group = match kind {
                    config_core::AttrType::Date => DATE_GROUP,
                    config_core::AttrType::Id => ID_GROUP,
                    config_core::AttrType::String => STRING_GROUP,
                };
                // The key matches case-insensitively; the typed group keeps
                // its own case rules (ids are uppercase).
                let source = format!(r"(?i:{})[\s;:\-]*{}", regex::escape(name), group);
                Ok(FieldPattern {
                    name: name.clone(),
                    kind: *kind,
                    regex: regex::Regex::new(&source)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { patterns })
    }

    /// Extract permitted attribute values from the matchable body text.
    ///
    /// Dates are canonicalized to ISO local time; values that fail
    /// canonicalization are dropped.
    pub fn extract(&self, text: &str) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();

        for pattern in &self.patterns {
            let Some(captures) = pattern.regex.captures(text) else {
                continue;
            };

            let value = match pattern.kind {
                config_core::AttrType::Date => canonicalize_date(&captures),
                config_core::AttrType::Id | config_core::AttrType::String => {
                    captures.get(1).map(|group| group.as_str().to_string())
                }
            };

            if let Some(value) = value {
                fields.insert(pattern.name.clone(), value);
            }
        }

        fields
    }
}

/// Canonicalize captured `DD[-/]MM[-/]YYYY[ HH:MM]` groups to
/// `YYYY-MM-DDTHH:MM:SS`; a missing time becomes `23:59:59`.
fn canonicalize_date(captures: &regex::Captures<'_>) -> Option<String> {
    let day: u32 = captures.get(1)?.as_str().parse().ok()?;
    let month: u32 = captures.get(2)?.as_str().parse().ok()?;
    let year: i32 = captures.get(3)?.as_str().parse().ok()?;

    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;

    let (hour, minute, second) = match (captures.get(4), captures.get(5)) {
        (Some(hour), Some(minute)) => {
            let hour: u32 = hour.as_str().parse().ok()?;
            let minute: u32 = minute.as_str().parse().ok()?;
            (hour, minute, 0)
        }
        _ => (23, 59, 59),
    };

    let time = chrono::NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(format!("{}T{}", date.format("%Y-%m-%d"), time.format("%H:%M:%S")))
}
