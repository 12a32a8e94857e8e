//! Canonical text for plist and glif documents.
//!
//! Output goes through two passes. [Serializer::normalize] rounds numbers and
//! sorts dict keys in place; [Serializer::format] turns the tree into text.
//! Neither touches the filesystem, and the same tree always yields the same
//! bytes.

use std::cmp::Ordering;

use crate::{
    config::{Config, FileFormat},
    xml::{Document, Element},
};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Plist,
    Glif,
}

/// Round `value` to `precision` decimals, dropping trailing zeros.
pub fn format_number(value: f64, precision: u32) -> String {
    let mut text = format!("{:.*}", precision as usize, value);
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

/// [format_number] for text, `None` if the text is not a finite number.
pub fn normalize_number(text: &str, precision: u32) -> Option<String> {
    let value: f64 = text.trim().parse().ok()?;
    value.is_finite().then(|| format_number(value, precision))
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            _ => out.push(c),
        }
    }
}

fn cdata(text: &str, out: &mut String) {
    out.push_str("<![CDATA[");
    out.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
    out.push_str("]]>");
}

/// Whether `element` is a `<dict>` made of `<key>`/value pairs.
fn is_keyed_dict(element: &Element) -> bool {
    element.name == "dict"
        && element.children.len() % 2 == 0
        && element.children.iter().step_by(2).all(|c| c.name == "key")
}

fn sort_dict(element: &mut Element) {
    let mut pairs: Vec<(Element, Element)> = Vec::with_capacity(element.children.len() / 2);
    let mut children = std::mem::take(&mut element.children).into_iter();
    while let (Some(key), Some(value)) = (children.next(), children.next()) {
        pairs.push((key, value));
    }
    pairs.sort_by(|(a, _), (b, _)| a.text().cmp(b.text()));
    element.children = pairs.into_iter().flat_map(|(k, v)| [k, v]).collect();
}

pub struct Serializer<'a> {
    config: &'a Config,
}

impl<'a> Serializer<'a> {
    pub fn new(config: &'a Config) -> Serializer<'a> {
        Serializer { config }
    }

    fn file_format(&self, file_type: FileType) -> &'a FileFormat {
        match file_type {
            FileType::Plist => &self.config.plist,
            FileType::Glif => &self.config.glif,
        }
    }

    /// Round numbers and sort dict keys, children before parents.
    pub fn normalize(&self, file_type: FileType, element: &mut Element) {
        let format = self.file_format(file_type);
        self.normalize_element(format, element);
    }

    fn normalize_element(&self, format: &FileFormat, element: &mut Element) {
        for child in element.children.iter_mut() {
            self.normalize_element(format, child);
        }
        let precision = self.config.precision;
        for (name, value) in element.attributes.iter_mut() {
            if !format.numeric_attributes.iter().any(|n| n == name) {
                continue;
            }
            if let Some(normalized) = normalize_number(value, precision) {
                *value = normalized;
            }
        }
        if element.children.is_empty() && format.numeric_elements.contains(&element.name) {
            if let Some(text) = element.text.as_mut() {
                if let Some(normalized) = normalize_number(text, precision) {
                    *text = normalized;
                }
            }
        }
        if self.config.sort_dict_keys && is_keyed_dict(element) {
            sort_dict(element);
        }
    }

    /// The text of `document`, without normalizing it first.
    pub fn format(&self, file_type: FileType, document: &Document) -> String {
        let format = self.file_format(file_type);
        let mut out = String::new();
        out.push_str(XML_DECLARATION);
        out.push('\n');
        if let Some(doctype) = &document.doctype {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype);
            out.push_str(">\n");
        }
        for instruction in document.instructions.iter() {
            out.push_str("<?");
            out.push_str(instruction);
            out.push_str("?>\n");
        }
        self.format_element(format, &document.root, 0, &mut out);
        out
    }

    /// Normalize a copy of `document` and format it.
    pub fn to_bytes(&self, file_type: FileType, document: &Document) -> Vec<u8> {
        let mut document = document.clone();
        self.normalize(file_type, &mut document.root);
        self.format(file_type, &document).into_bytes()
    }

    fn indent(format: &FileFormat, depth: usize, out: &mut String) {
        if depth == 0 {
            return;
        }
        out.push_str(&format.first_indent);
        for _ in 1..depth {
            out.push_str(&format.indent);
        }
    }

    fn attribute_rank(format: &FileFormat, name: &str) -> Option<usize> {
        format.attribute_order.iter().position(|n| n == name)
    }

    fn sorted_attributes<'e>(
        format: &FileFormat,
        element: &'e Element,
    ) -> Vec<(&'e str, &'e str)> {
        let mut attributes: Vec<_> = element
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        attributes.sort_by(|(a, _), (b, _)| {
            match (
                Self::attribute_rank(format, a),
                Self::attribute_rank(format, b),
            ) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            }
        });
        attributes
    }

    fn format_element(
        &self,
        format: &FileFormat,
        element: &Element,
        depth: usize,
        out: &mut String,
    ) {
        Self::indent(format, depth, out);
        out.push('<');
        out.push_str(&element.name);
        for (name, value) in Self::sorted_attributes(format, element) {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_attribute(value, out);
            out.push('"');
        }

        if element.children.is_empty() {
            match &element.text {
                None => out.push_str("/>\n"),
                Some(text) => {
                    out.push('>');
                    if format.cdata_elements.contains(&element.name) {
                        cdata(text, out);
                    } else {
                        escape_text(text, out);
                    }
                    out.push_str("</");
                    out.push_str(&element.name);
                    out.push_str(">\n");
                }
            }
            return;
        }

        out.push('>');
        if let Some(text) = element.text.as_deref().filter(|t| !t.trim().is_empty()) {
            escape_text(text, out);
        }
        out.push('\n');
        for child in element.children.iter() {
            self.format_element(format, child, depth + 1, out);
        }
        Self::indent(format, depth, out);
        out.push_str("</");
        out.push_str(&element.name);
        out.push_str(">\n");
    }
}
