//! Minimal SOAP plumbing for the vim25 API: request rendering and a small
//! element tree for reading responses.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::VsphereError;
use super::types::MoRef;

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
    r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
    r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
    "<soapenv:Body>"
);
const ENVELOPE_CLOSE: &str = "</soapenv:Body></soapenv:Envelope>";

pub(crate) fn moref_element(tag: &str, moref: &MoRef) -> String {
    format!(
        r#"<{tag} type="{}">{}</{tag}>"#,
        escape(moref.kind.as_str()),
        escape(moref.value.as_str())
    )
}

/// A vim25 method call on a managed object.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    method: &'static str,
    params: String,
}

impl Request {
    pub fn new(method: &'static str, this: &MoRef) -> Self {
        Self {
            method,
            params: moref_element("_this", this),
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn text(mut self, tag: &str, value: &str) -> Self {
        self.params
            .push_str(&format!("<{tag}>{}</{tag}>", escape(value)));
        self
    }

    pub fn flag(self, tag: &str, value: bool) -> Self {
        self.text(tag, if value { "true" } else { "false" })
    }

    /// Append pre-rendered XML. Callers escape their own values.
    pub fn raw(mut self, xml: &str) -> Self {
        self.params.push_str(xml);
        self
    }

    pub fn render(&self) -> String {
        format!(
            r#"{ENVELOPE_OPEN}<{m} xmlns="urn:vim25">{p}</{m}>{ENVELOPE_CLOSE}"#,
            m = self.method,
            p = self.params
        )
    }
}

/// Element of a parsed response, namespace prefixes stripped.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, VsphereError> {
        let mut element = XmlElement {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Attribute by name. An unprefixed attribute wins over a prefixed one,
    /// so `type` on a moref is not shadowed by `xsi:type`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        let local = |key: &str| key.rsplit(':').next() == Some(name);
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .or_else(|| self.attributes.iter().find(|(k, _)| local(k)))
            .map(|(_, v)| v.as_str())
    }

    /// Read `<x type="Kind">value</x>` as a managed object reference.
    pub fn to_moref(&self) -> Option<MoRef> {
        let kind = self.attr("type")?;
        let value = self.text.trim();
        if value.is_empty() {
            return None;
        }
        Some(MoRef::new(kind, value))
    }
}

pub(crate) fn parse(xml: &str) -> Result<XmlElement, VsphereError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(XmlElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| VsphereError::InvalidResponse("unbalanced XML".into()))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| VsphereError::InvalidResponse("empty XML document".into()))
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

/// Extract the method response from a SOAP envelope, turning a `Fault` body
/// into [`VsphereError::Fault`].
pub(crate) fn parse_response(xml: &str) -> Result<XmlElement, VsphereError> {
    let root = parse(xml)?;
    let body = root
        .children
        .into_iter()
        .find(|c| c.name == "Body")
        .ok_or_else(|| VsphereError::InvalidResponse("missing SOAP body".into()))?;

    if let Some(fault) = body.child("Fault") {
        return Err(fault_from(fault));
    }

    body.children
        .into_iter()
        .next()
        .ok_or_else(|| VsphereError::InvalidResponse("empty SOAP body".into()))
}

fn fault_from(fault: &XmlElement) -> VsphereError {
    let kind = fault
        .child("detail")
        .and_then(|detail| detail.children.first())
        .map(|detail| match detail.attr("type") {
            Some(kind) => kind.to_string(),
            None => detail.name.trim_end_matches("Fault").to_string(),
        });

    VsphereError::Fault {
        code: fault
            .child_text("faultcode")
            .unwrap_or("ServerFaultCode")
            .to_string(),
        message: fault.child_text("faultstring").unwrap_or_default().to_string(),
        kind,
    }
}
