//! XML helpers for the Storage REST payloads
//!
//! The Blob and Queue services answer with small XML documents. They are
//! read with `quick_xml`'s pull parser, so entity and character references
//! (`&amp;`, `&#xD;`, `&#233;`) and self-closing elements decode the way
//! the service meant them.

use crate::error::ClientError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Leaf elements of one record, keyed by element name
pub type Record = BTreeMap<String, String>;

fn parse_error(e: quick_xml::Error) -> ClientError {
    ClientError::Parse(format!("invalid XML: {}", e))
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Escape text for use inside an XML element
///
/// Carriage returns become `&#xD;`; a literal CR would be normalized away
/// by the server's parser.
pub fn escape(text: &str) -> Cow<'_, str> {
    let escaped = quick_xml::escape::escape(text);
    if escaped.contains('\r') {
        Cow::Owned(escaped.replace('\r', "&#xD;"))
    } else {
        escaped
    }
}

/// Decode entity and character references
pub fn unescape(text: &str) -> Result<Cow<'_, str>, ClientError> {
    quick_xml::escape::unescape(text)
        .map_err(|e| ClientError::Parse(format!("invalid XML text: {}", e)))
}

/// Decoded text of the first `<element>` in `xml`
///
/// A self-closing `<element />` yields an empty string. Malformed XML
/// yields `None`.
pub fn extract_element(xml: &str, element: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut text: Option<String> = None;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if text.is_none() && local_name(&e) == element => {
                text = Some(String::new());
            }
            Event::Empty(e) if text.is_none() && local_name(&e) == element => {
                return Some(String::new());
            }
            Event::Text(t) => {
                if let Some(buf) = text.as_mut() {
                    buf.push_str(&t.unescape().ok()?);
                }
            }
            Event::CData(c) => {
                if let Some(buf) = text.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(e) if text.is_some() && e.local_name().as_ref() == element.as_bytes() => {
                return text;
            }
            Event::Eof => return None,
            _ => {}
        }
    }
}

/// Every `<element>` record in document order, with its leaf children
///
/// Child text is decoded. Self-closing children (`<MessageText />`) map to
/// an empty string.
pub fn records(xml: &str, element: &str) -> Result<Vec<Record>, ClientError> {
    let mut reader = Reader::from_str(xml);
    let mut found = Vec::new();
    let mut current: Option<Record> = None;
    let mut leaf: Option<(String, String)> = None;

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(e) => {
                let name = local_name(&e);
                if name == element {
                    current = Some(Record::new());
                } else if current.is_some() {
                    leaf = Some((name, String::new()));
                }
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                if name == element {
                    found.push(Record::new());
                } else if let Some(record) = current.as_mut() {
                    record.insert(name, String::new());
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = leaf.as_mut() {
                    text.push_str(&t.unescape().map_err(parse_error)?);
                }
            }
            Event::CData(c) => {
                if let Some((_, text)) = leaf.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == element {
                    if let Some(record) = current.take() {
                        found.push(record);
                    }
                } else if leaf.as_ref().is_some_and(|(open, _)| *open == name) {
                    if let (Some(record), Some((name, text))) = (current.as_mut(), leaf.take()) {
                        record.insert(name, text);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}
