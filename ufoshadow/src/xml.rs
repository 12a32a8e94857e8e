//! A small owned XML tree, enough to hold plist and glif documents.
//!
//! Parsing goes through quick-xml. Only elements, attributes and text are
//! kept; comments are dropped and the XML declaration is regenerated on
//! output.

use indexmap::IndexMap;
use log::{debug, warn};
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use crate::error::Error;

/// Attribute name to value, in document order.
pub type Attributes = IndexMap<String, String>;

/// Elements whose whitespace-only text is layout rather than content.
const CONTAINER_TAGS: &[&str] = &[
    "plist", "dict", "array", "glyph", "outline", "contour", "lib",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Attributes,
    /// `None` for `<tag/>`, `Some("")` for `<tag></tag>`.
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Element {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Element {
        Element {
            name: name.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_attributes(name: impl Into<String>, attributes: Attributes) -> Element {
        Element {
            name: name.into(),
            attributes,
            ..Default::default()
        }
    }

    pub fn with_children(name: impl Into<String>, children: Vec<Element>) -> Element {
        Element {
            name: name.into(),
            children,
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// The element text, or the empty string.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.text.is_none()
    }
}

/// A parsed document: one root element plus the prolog bits we reproduce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doctype: Option<String>,
    pub instructions: Vec<String>,
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Document {
        Document {
            doctype: None,
            instructions: Vec::new(),
            root,
        }
    }

    pub fn parse(xml: &str) -> Result<Document, Error> {
        let mut reader = Reader::from_str(xml);
        let mut doctype = None;
        let mut instructions = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Comment(comment) => warn!(
                    "Dropping xml comment '{}'",
                    String::from_utf8_lossy(&comment).trim()
                ),
                Event::DocType(text) => {
                    doctype = Some(String::from_utf8_lossy(&text).trim().to_string());
                }
                Event::PI(pi) => {
                    if stack.is_empty() {
                        instructions.push(String::from_utf8_lossy(&pi).into_owned());
                    } else {
                        debug!("Dropping processing instruction inside an element");
                    }
                }
                Event::Start(start) => stack.push(start_element(&start)?),
                Event::Empty(start) => {
                    let element = start_element(&start)?;
                    close(element, &mut stack, &mut root)?;
                }
                Event::End(_) => {
                    let Some(mut element) = stack.pop() else {
                        return Err(Error::StructuralError("unbalanced end tag".into()));
                    };
                    let whitespace = element.text().chars().all(char::is_whitespace);
                    if whitespace
                        && (!element.children.is_empty()
                            || CONTAINER_TAGS.contains(&element.name.as_str()))
                    {
                        element.text = None;
                    } else if element.text.is_none() {
                        element.text = Some(String::new());
                    }
                    close(element, &mut stack, &mut root)?;
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.text
                            .get_or_insert_with(String::new)
                            .push_str(&text.unescape().map_err(unescape_error)?);
                    }
                }
                Event::CData(cdata) => {
                    if let Some(top) = stack.last_mut() {
                        top.text
                            .get_or_insert_with(String::new)
                            .push_str(&String::from_utf8_lossy(&cdata));
                    }
                }
                Event::Eof => break,
                _ => (),
            }
        }

        if !stack.is_empty() {
            return Err(Error::StructuralError(format!(
                "unclosed element <{}>",
                stack[stack.len() - 1].name
            )));
        }
        let root = root.ok_or_else(|| Error::StructuralError("no root element".into()))?;
        Ok(Document {
            doctype,
            instructions,
            root,
        })
    }
}

fn start_element(start: &BytesStart) -> Result<Element, Error> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(unescape_error)?.into_owned();
        element.attributes.insert(key, value);
    }
    Ok(element)
}

fn unescape_error(e: impl std::fmt::Display) -> Error {
    Error::StructuralError(format!("bad escape: {e}"))
}

fn close(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), Error> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(Error::StructuralError(format!(
                "second root element <{}>",
                element.name
            )))
        }
    }
    Ok(())
}
