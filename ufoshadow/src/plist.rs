//! Property lists as editable element maps.
//!
//! A [PlistMap] wraps a `<dict>` (alternating `<key>`/value siblings) or an
//! `<array>` (positional values) and rewrites the backing elements as it is
//! edited, so the XML is always the source of truth.

use indexmap::IndexMap;

use crate::{
    error::Error,
    shadow::ElementShadow,
    xml::{Attributes, Document, Element},
};

pub const PLIST_DOCTYPE: &str = r#"plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlistStyle {
    /// `<dict>`; keys are a set.
    Dict,
    /// `<array>`; keys are ordinals and order is data.
    Array,
}

impl PlistStyle {
    fn name(self) -> &'static str {
        match self {
            PlistStyle::Dict => "dict",
            PlistStyle::Array => "array",
        }
    }
}

/// The scalar plist types that can be written from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Integer,
    Real,
    Bool,
    Date,
    Data,
}

impl ValueType {
    /// Build the value element, checking that `value` fits the type.
    pub fn element(self, value: &str) -> Result<Element, Error> {
        let bad = || Error::StructuralError(format!("'{value}' is not a valid {self:?}"));
        Ok(match self {
            ValueType::String => Element::with_text("string", value),
            ValueType::Integer => {
                value.trim().parse::<i64>().map_err(|_| bad())?;
                Element::with_text("integer", value.trim())
            }
            ValueType::Real => {
                value.trim().parse::<f64>().map_err(|_| bad())?;
                Element::with_text("real", value.trim())
            }
            ValueType::Bool => match value {
                "true" | "1" => Element::new("true"),
                "false" | "0" => Element::new("false"),
                _ => return Err(bad()),
            },
            ValueType::Date => Element::with_text("date", value),
            ValueType::Data => Element::with_text("data", value),
        })
    }
}

/// A read-only view of a plist value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Date(String),
    Data(String),
    Array(Vec<Value>),
    Dict(IndexMap<String, Value>),
}

impl Value {
    pub fn from_element(element: &Element) -> Result<Value, Error> {
        let bad = |what: &str| {
            Error::StructuralError(format!("<{}> holds invalid {what}", element.name))
        };
        Ok(match element.name.as_str() {
            "string" => Value::String(element.text().to_string()),
            "integer" => Value::Integer(
                element
                    .text()
                    .trim()
                    .parse()
                    .map_err(|_| bad("integer"))?,
            ),
            "real" => Value::Real(element.text().trim().parse().map_err(|_| bad("real"))?),
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "date" => Value::Date(element.text().to_string()),
            "data" => Value::Data(element.text().to_string()),
            "array" => Value::Array(
                element
                    .children
                    .iter()
                    .map(Value::from_element)
                    .collect::<Result<_, _>>()?,
            ),
            "dict" => {
                let mut dict = IndexMap::new();
                for (key, value) in dict_pairs(element)? {
                    dict.insert(key.to_string(), Value::from_element(value)?);
                }
                Value::Dict(dict)
            }
            other => {
                return Err(Error::StructuralError(format!(
                    "<{other}> is not a plist value"
                )))
            }
        })
    }

    pub fn to_element(&self) -> Element {
        match self {
            Value::String(s) => Element::with_text("string", s.as_str()),
            Value::Integer(i) => Element::with_text("integer", i.to_string()),
            Value::Real(r) => Element::with_text("real", r.to_string()),
            Value::Bool(true) => Element::new("true"),
            Value::Bool(false) => Element::new("false"),
            Value::Date(d) => Element::with_text("date", d.as_str()),
            Value::Data(d) => Element::with_text("data", d.as_str()),
            Value::Array(values) => {
                Element::with_children("array", values.iter().map(Value::to_element).collect())
            }
            Value::Dict(dict) => Element::with_children(
                "dict",
                dict.iter()
                    .flat_map(|(k, v)| [Element::with_text("key", k.as_str()), v.to_element()])
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// Pair up the children of a `<dict>` element.
pub(crate) fn dict_pairs(element: &Element) -> Result<Vec<(&str, &Element)>, Error> {
    if element.children.len() % 2 != 0 {
        return Err(Error::StructuralError(format!(
            "<dict> has {} children, expected key/value pairs",
            element.children.len()
        )));
    }
    element
        .children
        .chunks(2)
        .map(|pair| {
            if pair[0].name != "key" {
                return Err(Error::StructuralError(format!(
                    "expected <key>, found <{}>",
                    pair[0].name
                )));
            }
            Ok((pair[0].text(), &pair[1]))
        })
        .collect()
}

/// An ordered map over the children of a `<dict>` or `<array>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct PlistMap {
    style: PlistStyle,
    shadow: ElementShadow,
    // dict style only: key -> position of its <key> element
    keys: IndexMap<String, usize>,
}

impl PlistMap {
    pub fn new(style: PlistStyle) -> PlistMap {
        PlistMap {
            style,
            shadow: ElementShadow::new(Element::new(style.name())),
            keys: IndexMap::new(),
        }
    }

    pub fn from_element(element: Element) -> Result<PlistMap, Error> {
        let style = match element.name.as_str() {
            "dict" => PlistStyle::Dict,
            "array" => PlistStyle::Array,
            other => {
                return Err(Error::StructuralError(format!(
                    "<{other}> is neither a dict nor an array"
                )))
            }
        };
        let mut map = PlistMap {
            style,
            shadow: ElementShadow::new(element),
            keys: IndexMap::new(),
        };
        map.rekey()?;
        Ok(map)
    }

    pub fn style(&self) -> PlistStyle {
        self.style
    }

    pub fn element(&self) -> &Element {
        self.shadow.element()
    }

    pub fn into_element(self) -> Element {
        self.shadow.into_element()
    }

    pub fn len(&self) -> usize {
        match self.style {
            PlistStyle::Dict => self.keys.len(),
            PlistStyle::Array => self.shadow.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dict keys in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// The value element for a dict key.
    pub fn get(&self, key: &str) -> Option<&Element> {
        self.keys
            .get(key)
            .and_then(|position| self.shadow.child(position + 1))
    }

    /// The `[key element, value element]` pair for a dict key.
    pub fn get_pair(&self, key: &str) -> Option<(&Element, &Element)> {
        let position = *self.keys.get(key)?;
        Some((self.shadow.child(position)?, self.shadow.child(position + 1)?))
    }

    /// The text of a `<string>` value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .filter(|e| e.name == "string")
            .map(Element::text)
    }

    pub fn value(&self, key: &str) -> Result<Option<Value>, Error> {
        self.get(key).map(Value::from_element).transpose()
    }

    /// Dict entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Element)> {
        self.keys.iter().filter_map(|(key, position)| {
            self.shadow
                .child(position + 1)
                .map(|value| (key.as_str(), value))
        })
    }

    /// Add a new scalar entry; the key must not exist yet.
    pub fn add(&mut self, key: &str, value_type: ValueType, value: &str) -> Result<(), Error> {
        let element = value_type.element(value)?;
        self.add_element(key, element)
    }

    /// Add or update a scalar entry.
    pub fn set(&mut self, key: &str, value_type: ValueType, value: &str) -> Result<(), Error> {
        let element = value_type.element(value)?;
        self.set_element(key, element)
    }

    pub fn add_element(&mut self, key: &str, element: Element) -> Result<(), Error> {
        self.require(PlistStyle::Dict)?;
        if self.keys.contains_key(key) {
            return Err(Error::DuplicateKey(key.to_string()));
        }
        let position = self.shadow.len();
        self.shadow.append(Element::with_text("key", key));
        self.shadow.append(element);
        self.keys.insert(key.to_string(), position);
        Ok(())
    }

    pub fn set_element(&mut self, key: &str, element: Element) -> Result<(), Error> {
        self.require(PlistStyle::Dict)?;
        match self.keys.get(key).copied() {
            Some(position) => {
                self.shadow.replace(position + 1, element)?;
                Ok(())
            }
            None => self.add_element(key, element),
        }
    }

    /// Remove a dict entry, both the key and the value element.
    pub fn remove(&mut self, key: &str) -> Option<Element> {
        let position = *self.keys.get(key)?;
        let value = self.shadow.remove(position + 1).ok()?;
        self.shadow.remove(position).ok()?;
        self.keys.shift_remove(key);
        for p in self.keys.values_mut().filter(|p| **p > position) {
            *p -= 2;
        }
        Some(value)
    }

    /// The value element at an array position.
    pub fn get_index(&self, index: usize) -> Option<&Element> {
        match self.style {
            PlistStyle::Array => self.shadow.child(index),
            PlistStyle::Dict => None,
        }
    }

    /// Array values in order.
    pub fn values(&self) -> impl Iterator<Item = &Element> {
        let array = self.style == PlistStyle::Array;
        self.shadow.children().iter().filter(move |_| array)
    }

    pub fn push(&mut self, value_type: ValueType, value: &str) -> Result<(), Error> {
        let element = value_type.element(value)?;
        self.push_element(element)
    }

    pub fn push_element(&mut self, element: Element) -> Result<(), Error> {
        self.require(PlistStyle::Array)?;
        self.shadow.append(element);
        Ok(())
    }

    pub fn insert_element(&mut self, index: usize, element: Element) -> Result<(), Error> {
        self.require(PlistStyle::Array)?;
        self.shadow.insert(index, element)
    }

    pub fn remove_index(&mut self, index: usize) -> Result<Element, Error> {
        self.require(PlistStyle::Array)?;
        self.shadow.remove(index)
    }

    fn require(&self, style: PlistStyle) -> Result<(), Error> {
        if self.style != style {
            return Err(Error::WrongPlistStyle {
                expected: style.name(),
                found: self.style.name(),
            });
        }
        Ok(())
    }

    fn rekey(&mut self) -> Result<(), Error> {
        self.keys.clear();
        if self.style == PlistStyle::Array {
            return Ok(());
        }
        let pairs = dict_pairs(self.shadow.element())?;
        let mut keys = IndexMap::with_capacity(pairs.len());
        for (i, (key, _)) in pairs.into_iter().enumerate() {
            if keys.insert(key.to_string(), i * 2).is_some() {
                return Err(Error::DuplicateKey(key.to_string()));
            }
        }
        self.keys = keys;
        Ok(())
    }
}

/// A whole plist document: `<plist>` around one dict or array.
#[derive(Debug, Clone, PartialEq)]
pub struct PlistFile {
    doctype: Option<String>,
    attributes: Attributes,
    map: PlistMap,
}

impl PlistFile {
    pub fn new(style: PlistStyle) -> PlistFile {
        PlistFile {
            doctype: Some(PLIST_DOCTYPE.to_string()),
            attributes: Attributes::from([("version".to_string(), "1.0".to_string())]),
            map: PlistMap::new(style),
        }
    }

    pub fn parse(xml: &str) -> Result<PlistFile, Error> {
        Self::from_document(Document::parse(xml)?)
    }

    pub fn from_document(document: Document) -> Result<PlistFile, Error> {
        let Document { doctype, root, .. } = document;
        if root.name != "plist" {
            return Err(Error::StructuralError(format!(
                "expected <plist>, found <{}>",
                root.name
            )));
        }
        let Element {
            attributes,
            mut children,
            ..
        } = root;
        if children.len() != 1 {
            return Err(Error::StructuralError(format!(
                "<plist> must hold exactly one value, found {}",
                children.len()
            )));
        }
        let map = PlistMap::from_element(children.remove(0))?;
        Ok(PlistFile {
            doctype,
            attributes,
            map,
        })
    }

    pub fn to_document(&self) -> Document {
        let mut root = Element::with_attributes("plist", self.attributes.clone());
        root.children.push(self.map.element().clone());
        Document {
            doctype: self.doctype.clone(),
            instructions: Vec::new(),
            root,
        }
    }

    pub fn map(&self) -> &PlistMap {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut PlistMap {
        &mut self.map
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn contents() -> PlistFile {
        PlistFile::parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>A</key>
	<string>A_.glif</string>
	<key>a</key>
	<string>a.glif</string>
</dict>
</plist>"#,
        )
        .unwrap()
    }

    fn child_names(map: &PlistMap) -> Vec<String> {
        map.element()
            .children
            .iter()
            .map(|c| format!("{}:{}", c.name, c.text()))
            .collect()
    }

    #[test]
    fn read_dict() {
        let file = contents();
        let map = file.map();
        assert_eq!(PlistStyle::Dict, map.style());
        assert_eq!(2, map.len());
        assert_eq!(Some("A_.glif"), map.get_str("A"));
        assert_eq!(vec!["A", "a"], map.keys().collect::<Vec<_>>());
        assert_eq!(None, map.get("b"));
    }

    #[test]
    fn add_duplicate_fails() {
        let mut file = contents();
        let result = file.map_mut().add("a", ValueType::String, "other.glif");
        assert!(matches!(result, Err(Error::DuplicateKey(k)) if k == "a"));
        assert_eq!(Some("a.glif"), file.map().get_str("a"));
    }

    #[test]
    fn add_appends_a_pair() {
        let mut file = contents();
        let map = file.map_mut();
        map.add("b", ValueType::String, "b.glif").unwrap();
        assert_eq!(
            vec![
                "key:A",
                "string:A_.glif",
                "key:a",
                "string:a.glif",
                "key:b",
                "string:b.glif"
            ],
            child_names(map)
        );
    }

    #[test]
    fn set_updates_in_place() {
        let mut file = contents();
        let map = file.map_mut();
        map.set("A", ValueType::String, "A_.alt.glif").unwrap();
        map.set("z", ValueType::Integer, "7").unwrap();
        assert_eq!(Some("A_.alt.glif"), map.get_str("A"));
        assert_eq!(Some(Value::Integer(7)), map.value("z").unwrap());
        assert_eq!("key:A", child_names(map)[0]);
    }

    #[test]
    fn remove_drops_both_elements() {
        let mut file = contents();
        let map = file.map_mut();
        let removed = map.remove("A").unwrap();
        assert_eq!("A_.glif", removed.text());
        assert_eq!(vec!["key:a", "string:a.glif"], child_names(map));
        assert_eq!(Some("a.glif"), map.get_str("a"));
        assert_eq!(None, map.remove("A"));
        // positions of later keys were shifted
        map.set("a", ValueType::String, "x.glif").unwrap();
        assert_eq!(vec!["key:a", "string:x.glif"], child_names(map));
    }

    #[test]
    fn reject_bad_scalar() {
        let mut map = PlistMap::new(PlistStyle::Dict);
        assert!(map.add("n", ValueType::Integer, "1.5").is_err());
        assert!(map.add("b", ValueType::Bool, "yes").is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn array_style_is_positional() {
        let file = PlistFile::parse(
            r#"<plist version="1.0">
<array>
	<array>
		<string>public.default</string>
		<string>glyphs</string>
	</array>
	<array>
		<string>public.background</string>
		<string>glyphs.public.background</string>
	</array>
</array>
</plist>"#,
        )
        .unwrap();
        let mut map = file.map().clone();
        assert_eq!(PlistStyle::Array, map.style());
        assert_eq!(2, map.len());
        let second = Value::from_element(map.get_index(1).unwrap()).unwrap();
        assert_eq!(
            Value::Array(vec![
                Value::String("public.background".into()),
                Value::String("glyphs.public.background".into()),
            ]),
            second
        );
        assert!(map.add("k", ValueType::String, "v").is_err());
        map.remove_index(0).unwrap();
        assert_eq!(1, map.len());
    }

    #[test]
    fn duplicate_keys_in_source_are_fatal() {
        let result = PlistFile::parse(
            "<plist><dict><key>a</key><string/><key>a</key><string/></dict></plist>",
        );
        assert!(matches!(result, Err(Error::DuplicateKey(_))));
    }

    #[test]
    fn values_round_trip_through_elements() {
        let value = Value::Dict(IndexMap::from([
            ("int".to_string(), Value::Integer(-3)),
            ("flag".to_string(), Value::Bool(true)),
            (
                "list".to_string(),
                Value::Array(vec![Value::String("x".into()), Value::Real(0.5)]),
            ),
        ]));
        assert_eq!(value, Value::from_element(&value.to_element()).unwrap());
    }
}
