//! Parse arXiv API responses into plain paper entries.
//!
//! The arXiv query API answers with an Atom document that mixes the Atom,
//! OpenSearch and arXiv namespaces. Elements are matched on their local name
//! only, so callers never deal with namespace prefixes.

use std::fmt;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

/// One `<entry>` element of an arXiv Atom feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Abstract page URL, e.g. `http://arxiv.org/abs/0704.0001v2`.
    pub id: String,
    /// Paper title with whitespace collapsed.
    pub title: String,
    /// Abstract text.
    pub summary: String,
    /// Author names in feed order.
    pub authors: Vec<String>,
    /// Publication timestamp as reported by the feed.
    #[serde(default)]
    pub published: Option<String>,
    /// Last update timestamp as reported by the feed.
    #[serde(default)]
    pub updated: Option<String>,
    /// Category terms; the primary category comes first when present.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Link to the PDF rendition.
    #[serde(default)]
    pub pdf_url: Option<String>,
}

impl Entry {
    /// Bare arXiv identifier without URL prefix or version suffix.
    pub fn short_id(&self) -> &str {
        strip_version(abs_path(&self.id))
    }

    /// Authors joined the way listings show them.
    pub fn authors_line(&self) -> String {
        self.authors.join(", ")
    }
}

/// Errors surfaced while reading a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The document is not well-formed XML.
    Xml {
        /// Byte offset reported by the reader.
        position: u64,
        /// Reader error message.
        message: String,
    },
    /// The document ended while an `<entry>` was still open.
    UnterminatedEntry,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Xml { position, message } => {
                write!(f, "malformed feed at byte {position}: {message}")
            }
            FeedError::UnterminatedEntry => write!(f, "feed ended inside an <entry> element"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Parses an Atom feed into its entries, in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<Entry>, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<Entry> = None;
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        let event = reader.read_event().map_err(|err| FeedError::Xml {
            position: reader.buffer_position() as u64,
            message: err.to_string(),
        })?;
        match event {
            Event::Start(el) => {
                let name = local_name(&el);
                if name == "entry" {
                    current = Some(Entry::default());
                } else if let Some(entry) = current.as_mut() {
                    apply_attributes(entry, &name, &el, reader.buffer_position() as u64)?;
                }
                path.push(name);
                text.clear();
            }
            Event::Empty(el) => {
                if let Some(entry) = current.as_mut() {
                    let name = local_name(&el);
                    apply_attributes(entry, &name, &el, reader.buffer_position() as u64)?;
                }
            }
            Event::Text(raw) => {
                let decoded = raw.unescape().map_err(|err| FeedError::Xml {
                    position: reader.buffer_position() as u64,
                    message: err.to_string(),
                })?;
                text.push_str(&decoded);
            }
            Event::CData(raw) => {
                text.push_str(&String::from_utf8_lossy(&raw));
            }
            Event::End(_) => {
                let name = path.pop().unwrap_or_default();
                if name == "entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                } else if let Some(entry) = current.as_mut() {
                    let parent = path.last().map(String::as_str);
                    apply_text(entry, &name, parent, &text);
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        return Err(FeedError::UnterminatedEntry);
    }
    Ok(entries)
}

fn apply_text(entry: &mut Entry, name: &str, parent: Option<&str>, text: &str) {
    match (name, parent) {
        ("id", Some("entry")) => entry.id = text.trim().to_string(),
        ("title", Some("entry")) => entry.title = collapse_whitespace(text),
        ("summary", Some("entry")) => entry.summary = text.trim().to_string(),
        ("published", Some("entry")) => entry.published = Some(text.trim().to_string()),
        ("updated", Some("entry")) => entry.updated = Some(text.trim().to_string()),
        ("name", Some("author")) => {
            let author = collapse_whitespace(text);
            if !author.is_empty() {
                entry.authors.push(author);
            }
        }
        _ => {}
    }
}

fn apply_attributes(
    entry: &mut Entry,
    name: &str,
    el: &BytesStart<'_>,
    position: u64,
) -> Result<(), FeedError> {
    match name {
        "category" | "primary_category" => {
            if let Some(term) = attribute(el, "term", position)? {
                if !entry.categories.contains(&term) {
                    if name == "primary_category" {
                        entry.categories.insert(0, term);
                    } else {
                        entry.categories.push(term);
                    }
                }
            }
        }
        "link" => {
            let is_pdf = attribute(el, "title", position)?.as_deref() == Some("pdf")
                || attribute(el, "type", position)?.as_deref() == Some("application/pdf");
            if is_pdf {
                entry.pdf_url = attribute(el, "href", position)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn attribute(el: &BytesStart<'_>, key: &str, position: u64) -> Result<Option<String>, FeedError> {
    for attr in el.attributes() {
        let attr = attr.map_err(|err| FeedError::Xml {
            position,
            message: err.to_string(),
        })?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            let value = attr.unescape_value().map_err(|err| FeedError::Xml {
                position,
                message: err.to_string(),
            })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn local_name(el: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(el.local_name().as_ref()).into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn abs_path(id: &str) -> &str {
    match id.find("/abs/") {
        Some(pos) => &id[pos + "/abs/".len()..],
        None => id,
    }
}

/// Drops a trailing `vN` version marker from an arXiv identifier.
pub fn strip_version(id: &str) -> &str {
    if let Some(pos) = id.rfind('v') {
        let digits = &id[pos + 1..];
        if pos > 0 && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return &id[..pos];
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::{parse_feed, strip_version, Entry, FeedError};
    use pretty_assertions::assert_eq;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/feed</id>
  <entry>
    <id>http://arxiv.org/abs/0704.0001v2</id>
    <updated>2008-11-13T00:00:00Z</updated>
    <published>2007-04-02T19:18:42Z</published>
    <title>Calculation of prompt diphoton
  production cross sections</title>
    <summary>  A fully differential calculation &amp; more.
</summary>
    <author><name>C. Bal\'azs</name></author>
    <author><name>E. L. Berger</name></author>
    <link href="http://arxiv.org/abs/0704.0001v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/0704.0001v2" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="hep-ph" scheme="http://arxiv.org/schemas/atom"/>
    <category term="hep-ph" scheme="http://arxiv.org/schemas/atom"/>
    <category term="hep-ex" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    #[test]
    fn parses_single_entry() {
        let entries = parse_feed(FEED).expect("parse");
        assert_eq!(
            entries,
            vec![Entry {
                id: "http://arxiv.org/abs/0704.0001v2".to_string(),
                title: "Calculation of prompt diphoton production cross sections".to_string(),
                summary: "A fully differential calculation & more.".to_string(),
                authors: vec!["C. Bal\\'azs".to_string(), "E. L. Berger".to_string()],
                published: Some("2007-04-02T19:18:42Z".to_string()),
                updated: Some("2008-11-13T00:00:00Z".to_string()),
                categories: vec!["hep-ph".to_string(), "hep-ex".to_string()],
                pdf_url: Some("http://arxiv.org/pdf/0704.0001v2".to_string()),
            }]
        );
    }

    #[test]
    fn feed_level_id_is_not_an_entry() {
        let entries = parse_feed(FEED).expect("parse");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].short_id(), "0704.0001");
        assert_eq!(entries[0].authors_line(), "C. Bal\\'azs, E. L. Berger");
    }

    #[test]
    fn empty_feed_has_no_entries() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>ArXiv Query</title></feed>"#;
        assert_eq!(parse_feed(xml).expect("parse"), Vec::<Entry>::new());
    }

    #[test]
    fn truncated_entry_is_rejected() {
        let xml = r#"<feed><entry><id>http://arxiv.org/abs/1</id>"#;
        assert!(parse_feed(xml).is_err());
    }

    #[test]
    fn mismatched_tags_are_reported() {
        let err = parse_feed("<feed><entry></feed>").expect_err("malformed");
        assert!(matches!(err, FeedError::Xml { .. }), "got {err:?}");
    }

    #[test]
    fn strips_version_suffixes() {
        assert_eq!(strip_version("0704.0001v12"), "0704.0001");
        assert_eq!(strip_version("hep-th/9901001v1"), "hep-th/9901001");
        assert_eq!(strip_version("solv-int/9901001"), "solv-int/9901001");
        assert_eq!(strip_version("2101.00001"), "2101.00001");
    }
}
