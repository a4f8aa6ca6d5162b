//! Minimal SOAP envelope handling for the vSphere APIs.
//!
//! Responses are parsed into a small element tree keyed by local names, so
//! namespace prefixes chosen by the server do not matter.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;

use crate::storage::{Fault, FaultCategory, Result, StorageError};

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<soapenv:Envelope xmlns:soapenc="http://schemas.xmlsoap.org/soap/encoding/" "#,
    r#"xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
    r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
    r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#
);
const ENVELOPE_CLOSE: &str = "</soapenv:Body></soapenv:Envelope>";

/// Wraps a request body in a SOAP envelope.
///
/// `header` is emitted verbatim inside `soapenv:Header` when given.
pub fn envelope(header: Option<&str>, body: &str) -> String {
    let mut out = String::with_capacity(ENVELOPE_OPEN.len() + body.len() + 128);
    out.push_str(ENVELOPE_OPEN);
    if let Some(header) = header {
        out.push_str("<soapenv:Header>");
        out.push_str(header);
        out.push_str("</soapenv:Header>");
    }
    out.push_str("<soapenv:Body>");
    out.push_str(body);
    out.push_str(ENVELOPE_CLOSE);
    out
}

/// Header element carrying the vCenter session id to the CNS endpoint.
pub fn session_header(session_id: &str) -> String {
    format!("<vcSessionCookie>{}</vcSessionCookie>", escape(session_id))
}

/// Escapes text for use inside an element.
pub fn escape(text: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(text)
}

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Local name, without namespace prefix.
    pub name: String,
    /// Attributes keyed by local name.
    pub attrs: Vec<(String, String)>,
    /// Concatenated text content.
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<Element>,
}

impl Element {
    /// Value of attribute `name`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First child called `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Children called `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first element called `name`.
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Every element called `name` below this one, depth first.
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for c in &self.children {
            if c.name == name {
                out.push(c);
            }
            c.find_all(name, out);
        }
    }

    /// Trimmed text of the first child called `name`.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    /// Trimmed text content.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Parses the trimmed text of child `name` as a number.
    pub fn child_u64(&self, name: &str) -> Option<u64> {
        self.child_text(name).and_then(|t| t.parse().ok())
    }
}

fn local(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

fn protocol<E: std::fmt::Display>(err: E) -> StorageError {
    StorageError::Protocol(format!("malformed XML: {}", err))
}

fn open(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element {
        name: local(start.local_name().as_ref()),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(protocol)?;
        let value = attr.unescape_value().map_err(protocol)?;
        element
            .attrs
            .push((local(attr.key.local_name().as_ref()), value.into_owned()));
    }
    Ok(element)
}

/// Parses an XML document into its root element.
pub fn parse(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(protocol)? {
            Event::Start(e) => stack.push(open(&e)?),
            Event::Empty(e) => {
                let element = open(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| StorageError::Protocol("unbalanced XML".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(protocol)?);
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| StorageError::Protocol("empty XML document".into()))
}

/// Converts a `LocalizedMethodFault`-shaped element into a [`Fault`].
///
/// The fault type comes from the nested `fault` element's `xsi:type`; the
/// message from `localizedMessage`.
pub fn method_fault(element: &Element) -> Fault {
    let type_name = element
        .child("fault")
        .and_then(|f| f.attr("type"))
        .or_else(|| element.attr("type"))
        .unwrap_or("Fault");
    let message = element
        .child_text("localizedMessage")
        .filter(|m| !m.is_empty())
        .unwrap_or(type_name);
    Fault::new(FaultCategory::from_type_name(type_name), message)
}

/// Converts a SOAP `Fault` element into a [`Fault`].
fn soap_fault(element: &Element) -> Fault {
    let message = element.child_text("faultstring").unwrap_or("SOAP fault");
    let type_name = element
        .child("detail")
        .and_then(|d| d.children.first())
        .map(|d| d.attr("type").unwrap_or(d.name.as_str()))
        .unwrap_or("Fault");
    Fault::new(FaultCategory::from_type_name(type_name), message)
}

/// Parses a SOAP response and returns the first element inside `Body`.
///
/// A SOAP fault becomes [`StorageError::Fault`].
pub fn response_body(xml: &str) -> Result<Element> {
    let root = parse(xml)?;
    let body = root
        .find("Body")
        .ok_or_else(|| StorageError::Protocol("response has no SOAP Body".into()))?;
    let first = body
        .children
        .first()
        .ok_or_else(|| StorageError::Protocol("empty SOAP Body".into()))?;
    if first.name == "Fault" {
        return Err(StorageError::Fault(soap_fault(first)));
    }
    Ok(first.clone())
}
