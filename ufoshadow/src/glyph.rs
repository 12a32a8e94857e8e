//! The glyph record: one `.glif` file as typed, editable data.
//!
//! Children of `<glyph>` are read through an [ElementShadow] into a closed set
//! of kinds ([Kind]). Anything we don't model is kept verbatim and written
//! back after the known kinds.

use std::fmt::Display;

use log::{debug, warn};

use crate::{
    error::Error,
    layer::LayerId,
    plist::{PlistMap, PlistStyle},
    shadow::ElementShadow,
    types::GlyphName,
    xml::{Attributes, Document, Element},
};

/// On-disk glif encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum GlifFormat {
    /// Anchors are one-point `move` contours.
    One,
    /// Anchors are `<anchor>` elements.
    #[default]
    Two,
}

impl GlifFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            GlifFormat::One => "1",
            GlifFormat::Two => "2",
        }
    }

    pub fn parse(value: &str) -> Result<GlifFormat, Error> {
        match value.trim() {
            "1" => Ok(GlifFormat::One),
            "2" => Ok(GlifFormat::Two),
            other => Err(Error::UnsupportedGlifFormat(other.to_string())),
        }
    }
}

/// The children `<glyph>` may have, in the order they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Advance,
    Unicode,
    Note,
    Image,
    Guideline,
    Anchor,
    Outline,
    Lib,
}

impl Kind {
    pub const ALL: [Kind; 8] = [
        Kind::Advance,
        Kind::Unicode,
        Kind::Note,
        Kind::Image,
        Kind::Guideline,
        Kind::Anchor,
        Kind::Outline,
        Kind::Lib,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Kind::Advance => "advance",
            Kind::Unicode => "unicode",
            Kind::Note => "note",
            Kind::Image => "image",
            Kind::Guideline => "guideline",
            Kind::Anchor => "anchor",
            Kind::Outline => "outline",
            Kind::Lib => "lib",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Whether a glyph may hold more than one.
    pub fn is_repeatable(self) -> bool {
        matches!(self, Kind::Unicode | Kind::Guideline | Kind::Anchor)
    }

    pub fn valid_in(self, format: GlifFormat) -> bool {
        match self {
            Kind::Advance | Kind::Unicode | Kind::Outline | Kind::Lib => true,
            Kind::Note | Kind::Image | Kind::Guideline | Kind::Anchor => {
                format == GlifFormat::Two
            }
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Pulls typed values out of an element's attributes; what is left over is
/// preserved as-is.
struct AttrReader {
    element: &'static str,
    attributes: Attributes,
}

impl AttrReader {
    fn new(element: &'static str, source: &Element) -> AttrReader {
        AttrReader {
            element,
            attributes: source.attributes.clone(),
        }
    }

    fn string(&mut self, name: &str) -> Option<String> {
        self.attributes.shift_remove(name)
    }

    fn required_string(&mut self, name: &'static str) -> Result<String, Error> {
        self.string(name).ok_or(Error::MissingAttribute {
            element: self.element,
            attribute: name,
        })
    }

    fn number(&mut self, name: &str) -> Result<Option<f64>, Error> {
        let Some(raw) = self.attributes.get(name) else {
            return Ok(None);
        };
        let value = raw.trim().parse::<f64>().map_err(|_| {
            Error::StructuralError(format!(
                "<{}> {name}=\"{raw}\" is not a number",
                self.element
            ))
        })?;
        self.attributes.shift_remove(name);
        Ok(Some(value))
    }

    fn required_number(&mut self, name: &'static str) -> Result<f64, Error> {
        self.number(name)?.ok_or(Error::MissingAttribute {
            element: self.element,
            attribute: name,
        })
    }

    fn smooth(&mut self) -> Result<Option<bool>, Error> {
        let smooth = match self.attributes.get("smooth").map(String::as_str) {
            None => return Ok(None),
            Some("yes") => true,
            Some("no") => false,
            Some(other) => {
                return Err(Error::StructuralError(format!(
                    "smooth=\"{other}\", expected yes or no"
                )))
            }
        };
        self.attributes.shift_remove("smooth");
        Ok(Some(smooth))
    }

    fn finish(self) -> Attributes {
        self.attributes
    }
}

fn number_text(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

/// Builds attributes in a fixed order, then appends preserved extras.
#[derive(Default)]
struct AttrWriter(Attributes);

impl AttrWriter {
    fn string(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.0.insert(name.to_string(), value.to_string());
        }
        self
    }

    fn number(mut self, name: &str, value: Option<f64>) -> Self {
        if let Some(value) = value {
            self.0.insert(name.to_string(), number_text(value));
        }
        self
    }

    fn finish(mut self, extra: &Attributes) -> Attributes {
        for (k, v) in extra.iter() {
            self.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self.0
    }
}

/// A glif child with a typed form.
pub trait GlifElement: Sized {
    const TAG: &'static str;

    fn from_element(element: &Element) -> Result<Self, Error>;

    fn to_element(&self) -> Element;
}

/// An affine transform as glif spells it; identity members are omitted on write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub x_scale: f64,
    pub xy_scale: f64,
    pub yx_scale: f64,
    pub y_scale: f64,
    pub x_offset: f64,
    pub y_offset: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            x_scale: 1.0,
            xy_scale: 0.0,
            yx_scale: 0.0,
            y_scale: 1.0,
            x_offset: 0.0,
            y_offset: 0.0,
        }
    }
}

impl Transform {
    fn read(reader: &mut AttrReader) -> Result<Transform, Error> {
        let identity = Transform::default();
        Ok(Transform {
            x_scale: reader.number("xScale")?.unwrap_or(identity.x_scale),
            xy_scale: reader.number("xyScale")?.unwrap_or(identity.xy_scale),
            yx_scale: reader.number("yxScale")?.unwrap_or(identity.yx_scale),
            y_scale: reader.number("yScale")?.unwrap_or(identity.y_scale),
            x_offset: reader.number("xOffset")?.unwrap_or(identity.x_offset),
            y_offset: reader.number("yOffset")?.unwrap_or(identity.y_offset),
        })
    }

    fn write(&self, writer: AttrWriter) -> AttrWriter {
        let identity = Transform::default();
        let differs = |value: f64, default: f64| (value != default).then_some(value);
        writer
            .number("xScale", differs(self.x_scale, identity.x_scale))
            .number("xyScale", differs(self.xy_scale, identity.xy_scale))
            .number("yxScale", differs(self.yx_scale, identity.yx_scale))
            .number("yScale", differs(self.y_scale, identity.y_scale))
            .number("xOffset", differs(self.x_offset, identity.x_offset))
            .number("yOffset", differs(self.y_offset, identity.y_offset))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Advance {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub extra: Attributes,
}

impl GlifElement for Advance {
    const TAG: &'static str = "advance";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut reader = AttrReader::new(Self::TAG, element);
        Ok(Advance {
            width: reader.number("width")?,
            height: reader.number("height")?,
            extra: reader.finish(),
        })
    }

    fn to_element(&self) -> Element {
        let attributes = AttrWriter::default()
            .number("width", self.width)
            .number("height", self.height)
            .finish(&self.extra);
        Element::with_attributes(Self::TAG, attributes)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Unicode {
    /// As written, e.g. `0041`.
    pub hex: String,
    pub extra: Attributes,
}

impl Unicode {
    pub fn new(code_point: u32) -> Unicode {
        Unicode {
            hex: format!("{code_point:04X}"),
            extra: Attributes::new(),
        }
    }

    pub fn code_point(&self) -> Option<u32> {
        u32::from_str_radix(self.hex.trim(), 16).ok()
    }
}

impl GlifElement for Unicode {
    const TAG: &'static str = "unicode";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut reader = AttrReader::new(Self::TAG, element);
        Ok(Unicode {
            hex: reader.required_string("hex")?,
            extra: reader.finish(),
        })
    }

    fn to_element(&self) -> Element {
        let attributes = AttrWriter::default()
            .string("hex", Some(&self.hex))
            .finish(&self.extra);
        Element::with_attributes(Self::TAG, attributes)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Image {
    pub file_name: String,
    pub transform: Transform,
    pub color: Option<String>,
    pub extra: Attributes,
}

impl GlifElement for Image {
    const TAG: &'static str = "image";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut reader = AttrReader::new(Self::TAG, element);
        Ok(Image {
            file_name: reader.required_string("fileName")?,
            transform: Transform::read(&mut reader)?,
            color: reader.string("color"),
            extra: reader.finish(),
        })
    }

    fn to_element(&self) -> Element {
        let writer = AttrWriter::default().string("fileName", Some(&self.file_name));
        let attributes = self
            .transform
            .write(writer)
            .string("color", self.color.as_deref())
            .finish(&self.extra);
        Element::with_attributes(Self::TAG, attributes)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Guideline {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub angle: Option<f64>,
    pub name: Option<String>,
    pub color: Option<String>,
    pub identifier: Option<String>,
    pub extra: Attributes,
}

impl GlifElement for Guideline {
    const TAG: &'static str = "guideline";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut reader = AttrReader::new(Self::TAG, element);
        Ok(Guideline {
            x: reader.number("x")?,
            y: reader.number("y")?,
            angle: reader.number("angle")?,
            name: reader.string("name"),
            color: reader.string("color"),
            identifier: reader.string("identifier"),
            extra: reader.finish(),
        })
    }

    fn to_element(&self) -> Element {
        let attributes = AttrWriter::default()
            .number("x", self.x)
            .number("y", self.y)
            .number("angle", self.angle)
            .string("name", self.name.as_deref())
            .string("color", self.color.as_deref())
            .string("identifier", self.identifier.as_deref())
            .finish(&self.extra);
        Element::with_attributes(Self::TAG, attributes)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
    pub name: Option<String>,
    pub color: Option<String>,
    pub identifier: Option<String>,
    pub extra: Attributes,
}

impl Anchor {
    pub fn new(name: impl Into<String>, x: f64, y: f64) -> Anchor {
        Anchor {
            x,
            y,
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

impl GlifElement for Anchor {
    const TAG: &'static str = "anchor";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut reader = AttrReader::new(Self::TAG, element);
        Ok(Anchor {
            x: reader.required_number("x")?,
            y: reader.required_number("y")?,
            name: reader.string("name"),
            color: reader.string("color"),
            identifier: reader.string("identifier"),
            extra: reader.finish(),
        })
    }

    fn to_element(&self) -> Element {
        let attributes = AttrWriter::default()
            .number("x", Some(self.x))
            .number("y", Some(self.y))
            .string("name", self.name.as_deref())
            .string("color", self.color.as_deref())
            .string("identifier", self.identifier.as_deref())
            .finish(&self.extra);
        Element::with_attributes(Self::TAG, attributes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    Move,
    Line,
    OffCurve,
    Curve,
    QCurve,
}

impl PointType {
    fn as_str(self) -> &'static str {
        match self {
            PointType::Move => "move",
            PointType::Line => "line",
            PointType::OffCurve => "offcurve",
            PointType::Curve => "curve",
            PointType::QCurve => "qcurve",
        }
    }

    fn parse(value: &str) -> Result<PointType, Error> {
        Ok(match value {
            "move" => PointType::Move,
            "line" => PointType::Line,
            "offcurve" => PointType::OffCurve,
            "curve" => PointType::Curve,
            "qcurve" => PointType::QCurve,
            other => {
                return Err(Error::StructuralError(format!(
                    "unknown point type '{other}'"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    /// `None` when the attribute is absent, which means offcurve.
    pub point_type: Option<PointType>,
    pub smooth: Option<bool>,
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub extra: Attributes,
}

impl GlifElement for Point {
    const TAG: &'static str = "point";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut reader = AttrReader::new(Self::TAG, element);
        Ok(Point {
            x: reader.required_number("x")?,
            y: reader.required_number("y")?,
            point_type: reader
                .string("type")
                .map(|t| PointType::parse(&t))
                .transpose()?,
            smooth: reader.smooth()?,
            name: reader.string("name"),
            identifier: reader.string("identifier"),
            extra: reader.finish(),
        })
    }

    fn to_element(&self) -> Element {
        let attributes = AttrWriter::default()
            .number("x", Some(self.x))
            .number("y", Some(self.y))
            .string("type", self.point_type.map(PointType::as_str))
            .string(
                "smooth",
                self.smooth.map(|s| if s { "yes" } else { "no" }),
            )
            .string("name", self.name.as_deref())
            .string("identifier", self.identifier.as_deref())
            .finish(&self.extra);
        Element::with_attributes(Self::TAG, attributes)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Contour {
    pub identifier: Option<String>,
    pub points: Vec<Point>,
    pub extra: Attributes,
    pub unrecognized: Vec<Element>,
}

impl Contour {
    /// A single `move` point: how format 1 spells an anchor.
    pub fn is_legacy_anchor(&self) -> bool {
        matches!(self.points.as_slice(), [p] if p.point_type == Some(PointType::Move))
    }
}

impl GlifElement for Contour {
    const TAG: &'static str = "contour";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut reader = AttrReader::new(Self::TAG, element);
        let identifier = reader.string("identifier");
        let mut points = Vec::new();
        let mut unrecognized = Vec::new();
        for child in element.children.iter() {
            if child.name == Point::TAG {
                points.push(Point::from_element(child)?);
            } else {
                warn!("Preserving unrecognized <{}> in <contour>", child.name);
                unrecognized.push(child.clone());
            }
        }
        Ok(Contour {
            identifier,
            points,
            extra: reader.finish(),
            unrecognized,
        })
    }

    fn to_element(&self) -> Element {
        let attributes = AttrWriter::default()
            .string("identifier", self.identifier.as_deref())
            .finish(&self.extra);
        let mut element = Element::with_attributes(Self::TAG, attributes);
        element
            .children
            .extend(self.points.iter().map(Point::to_element));
        element.children.extend(self.unrecognized.iter().cloned());
        element
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Component {
    pub base: GlyphName,
    pub transform: Transform,
    pub identifier: Option<String>,
    pub extra: Attributes,
}

impl GlifElement for Component {
    const TAG: &'static str = "component";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut reader = AttrReader::new(Self::TAG, element);
        Ok(Component {
            base: reader.required_string("base")?.into(),
            transform: Transform::read(&mut reader)?,
            identifier: reader.string("identifier"),
            extra: reader.finish(),
        })
    }

    fn to_element(&self) -> Element {
        let writer = AttrWriter::default().string("base", Some(self.base.as_str()));
        let attributes = self
            .transform
            .write(writer)
            .string("identifier", self.identifier.as_deref())
            .finish(&self.extra);
        Element::with_attributes(Self::TAG, attributes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutlineItem {
    Component(Component),
    Contour(Contour),
}

/// Components and contours in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outline {
    pub items: Vec<OutlineItem>,
    pub extra: Attributes,
    pub unrecognized: Vec<Element>,
}

impl Outline {
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.items.iter().filter_map(|item| match item {
            OutlineItem::Component(c) => Some(c),
            OutlineItem::Contour(_) => None,
        })
    }

    pub fn contours(&self) -> impl Iterator<Item = &Contour> {
        self.items.iter().filter_map(|item| match item {
            OutlineItem::Contour(c) => Some(c),
            OutlineItem::Component(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.unrecognized.is_empty()
    }
}

impl GlifElement for Outline {
    const TAG: &'static str = "outline";

    fn from_element(element: &Element) -> Result<Self, Error> {
        let mut items = Vec::new();
        let mut unrecognized = Vec::new();
        for child in element.children.iter() {
            match child.name.as_str() {
                "component" => {
                    items.push(OutlineItem::Component(Component::from_element(child)?))
                }
                "contour" => items.push(OutlineItem::Contour(Contour::from_element(child)?)),
                other => {
                    warn!("Preserving unrecognized <{other}> in <outline>");
                    unrecognized.push(child.clone());
                }
            }
        }
        Ok(Outline {
            items,
            extra: element.attributes.clone(),
            unrecognized,
        })
    }

    fn to_element(&self) -> Element {
        let mut element = Element::with_attributes(Self::TAG, self.extra.clone());
        element.children.extend(self.items.iter().map(|item| match item {
            OutlineItem::Component(c) => c.to_element(),
            OutlineItem::Contour(c) => c.to_element(),
        }));
        element.children.extend(self.unrecognized.iter().cloned());
        element
    }
}

fn lib_from_element(element: &Element) -> Result<PlistMap, Error> {
    match element.children.as_slice() {
        [] => Ok(PlistMap::new(PlistStyle::Dict)),
        [dict] if dict.name == "dict" => PlistMap::from_element(dict.clone()),
        _ => Err(Error::StructuralError(
            "<lib> must hold a single <dict>".to_string(),
        )),
    }
}

fn lib_to_element(lib: &PlistMap) -> Element {
    Element::with_children(Kind::Lib.tag(), vec![lib.element().clone()])
}

/// One child of `<glyph>`, by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum GlyphChild {
    Advance(Advance),
    Unicode(Unicode),
    Note(String),
    Image(Image),
    Guideline(Guideline),
    Anchor(Anchor),
    Outline(Outline),
    Lib(PlistMap),
}

impl GlyphChild {
    pub fn kind(&self) -> Kind {
        match self {
            GlyphChild::Advance(_) => Kind::Advance,
            GlyphChild::Unicode(_) => Kind::Unicode,
            GlyphChild::Note(_) => Kind::Note,
            GlyphChild::Image(_) => Kind::Image,
            GlyphChild::Guideline(_) => Kind::Guideline,
            GlyphChild::Anchor(_) => Kind::Anchor,
            GlyphChild::Outline(_) => Kind::Outline,
            GlyphChild::Lib(_) => Kind::Lib,
        }
    }

    pub fn from_element(kind: Kind, element: &Element) -> Result<GlyphChild, Error> {
        Ok(match kind {
            Kind::Advance => GlyphChild::Advance(Advance::from_element(element)?),
            Kind::Unicode => GlyphChild::Unicode(Unicode::from_element(element)?),
            Kind::Note => GlyphChild::Note(element.text().to_string()),
            Kind::Image => GlyphChild::Image(Image::from_element(element)?),
            Kind::Guideline => GlyphChild::Guideline(Guideline::from_element(element)?),
            Kind::Anchor => GlyphChild::Anchor(Anchor::from_element(element)?),
            Kind::Outline => GlyphChild::Outline(Outline::from_element(element)?),
            Kind::Lib => GlyphChild::Lib(lib_from_element(element)?),
        })
    }
}

/// One glyph of one layer.
///
/// Name and file name are owned by the layer; change them through
/// [crate::layer::LayerEditor].
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRecord {
    name: GlyphName,
    file_name: String,
    format: GlifFormat,
    layer: Option<LayerId>,
    pub advance: Option<Advance>,
    pub unicodes: Vec<Unicode>,
    pub note: Option<String>,
    pub image: Option<Image>,
    pub guidelines: Vec<Guideline>,
    pub anchors: Vec<Anchor>,
    pub outline: Option<Outline>,
    pub lib: Option<PlistMap>,
    /// Attributes of `<glyph>` other than name and format.
    pub attributes: Attributes,
    /// Children kept verbatim, written after the known kinds.
    pub unrecognized: Vec<Element>,
    shadow: ElementShadow,
}

impl GlyphRecord {
    pub fn new(name: impl Into<GlyphName>) -> GlyphRecord {
        let mut glyph = GlyphRecord {
            name: name.into(),
            file_name: String::new(),
            format: GlifFormat::Two,
            layer: None,
            advance: None,
            unicodes: Vec::new(),
            note: None,
            image: None,
            guidelines: Vec::new(),
            anchors: Vec::new(),
            outline: None,
            lib: None,
            attributes: Attributes::new(),
            unrecognized: Vec::new(),
            shadow: ElementShadow::default(),
        };
        glyph.rebuild_tree();
        glyph
    }

    /// Read a glif document.
    ///
    /// Format 1 anchors (one-point move contours) are surfaced as
    /// [Anchor]s; the record remembers it came from format 1 and writes
    /// them back the same way.
    pub fn parse(xml: &str) -> Result<GlyphRecord, Error> {
        let document = Document::parse(xml)?;
        if document.root.name != "glyph" {
            return Err(Error::StructuralError(format!(
                "expected <glyph>, found <{}>",
                document.root.name
            )));
        }
        let shadow = ElementShadow::new(document.root);
        let root = shadow.element();
        let mut attributes = root.attributes.clone();
        let name = attributes
            .shift_remove("name")
            .ok_or(Error::MissingAttribute {
                element: "glyph",
                attribute: "name",
            })?;
        let format = attributes
            .shift_remove("format")
            .ok_or(Error::MissingAttribute {
                element: "glyph",
                attribute: "format",
            })?;
        let format = GlifFormat::parse(&format)?;

        let mut glyph = GlyphRecord {
            name: GlyphName::new(&name),
            file_name: String::new(),
            format,
            layer: None,
            advance: None,
            unicodes: Vec::new(),
            note: None,
            image: None,
            guidelines: Vec::new(),
            anchors: Vec::new(),
            outline: None,
            lib: None,
            attributes,
            unrecognized: Vec::new(),
            shadow: ElementShadow::default(),
        };

        let mut consumed = vec![false; shadow.len()];
        for kind in Kind::ALL {
            if !kind.valid_in(format) {
                continue;
            }
            let positions = shadow.positions_of(kind.tag());
            let take = if kind.is_repeatable() {
                positions.len()
            } else {
                positions.len().min(1)
            };
            for &position in positions.iter().take(take) {
                let Some(element) = shadow.child(position) else {
                    continue;
                };
                glyph.put(GlyphChild::from_element(kind, element)?);
                consumed[position] = true;
            }
        }
        for (position, child) in shadow.children().iter().enumerate() {
            if !consumed[position] {
                warn!(
                    "Preserving unrecognized <{}> in glyph '{name}' (format {})",
                    child.name,
                    format.as_str()
                );
                glyph.unrecognized.push(child.clone());
            }
        }
        glyph.shadow = shadow;

        if format == GlifFormat::One {
            glyph.convert_from_older_format();
            glyph.format = GlifFormat::One;
        }
        Ok(glyph)
    }

    pub fn name(&self) -> &GlyphName {
        &self.name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn format(&self) -> GlifFormat {
        self.format
    }

    /// The layer this record belongs to, once added to one.
    pub fn layer(&self) -> Option<LayerId> {
        self.layer
    }

    pub(crate) fn set_name(&mut self, name: GlyphName) {
        self.name = name;
    }

    pub(crate) fn set_file_name(&mut self, file_name: impl Into<String>) {
        self.file_name = file_name.into();
    }

    pub(crate) fn set_layer(&mut self, layer: LayerId) {
        self.layer = Some(layer);
    }

    pub fn lib_mut(&mut self) -> &mut PlistMap {
        self.lib
            .get_or_insert_with(|| PlistMap::new(PlistStyle::Dict))
    }

    // no format check; used while reading
    fn put(&mut self, child: GlyphChild) {
        match child {
            GlyphChild::Advance(a) => self.advance = Some(a),
            GlyphChild::Unicode(u) => self.unicodes.push(u),
            GlyphChild::Note(n) => self.note = Some(n),
            GlyphChild::Image(i) => self.image = Some(i),
            GlyphChild::Guideline(g) => self.guidelines.push(g),
            GlyphChild::Anchor(a) => self.anchors.push(a),
            GlyphChild::Outline(o) => self.outline = Some(o),
            GlyphChild::Lib(l) => self.lib = Some(l),
        }
    }

    /// Add a child; a singleton kind replaces the current value.
    pub fn add_child(&mut self, child: GlyphChild) -> Result<(), Error> {
        let kind = child.kind();
        if !kind.valid_in(self.format) {
            return Err(Error::InvalidForFormat {
                kind,
                format: self.format.as_str(),
            });
        }
        self.put(child);
        Ok(())
    }

    /// Add a child of `kind` built from `attributes`.
    pub fn add(&mut self, kind: Kind, attributes: Attributes) -> Result<(), Error> {
        let element = Element::with_attributes(kind.tag(), attributes);
        let child = GlyphChild::from_element(kind, &element)?;
        self.add_child(child)
    }

    pub fn add_component(&mut self, attributes: Attributes) -> Result<(), Error> {
        let element = Element::with_attributes(Component::TAG, attributes);
        let component = Component::from_element(&element)?;
        self.outline
            .get_or_insert_with(Outline::default)
            .items
            .push(OutlineItem::Component(component));
        Ok(())
    }

    pub fn add_contour(&mut self, contour: Contour) {
        self.outline
            .get_or_insert_with(Outline::default)
            .items
            .push(OutlineItem::Contour(contour));
    }

    /// Number of children of a kind currently present.
    pub fn count(&self, kind: Kind) -> usize {
        match kind {
            Kind::Advance => self.advance.is_some() as usize,
            Kind::Unicode => self.unicodes.len(),
            Kind::Note => self.note.is_some() as usize,
            Kind::Image => self.image.is_some() as usize,
            Kind::Guideline => self.guidelines.len(),
            Kind::Anchor => self.anchors.len(),
            Kind::Outline => self.outline.is_some() as usize,
            Kind::Lib => self.lib.is_some() as usize,
        }
    }

    /// Remove the `index`th child of `kind`; singletons only have index 0.
    pub fn remove(&mut self, kind: Kind, index: usize) -> Result<GlyphChild, Error> {
        let len = self.count(kind);
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        let removed = match kind {
            Kind::Advance => self.advance.take().map(GlyphChild::Advance),
            Kind::Unicode => Some(GlyphChild::Unicode(self.unicodes.remove(index))),
            Kind::Note => self.note.take().map(GlyphChild::Note),
            Kind::Image => self.image.take().map(GlyphChild::Image),
            Kind::Guideline => Some(GlyphChild::Guideline(self.guidelines.remove(index))),
            Kind::Anchor => Some(GlyphChild::Anchor(self.anchors.remove(index))),
            Kind::Outline => self.outline.take().map(GlyphChild::Outline),
            Kind::Lib => self.lib.take().map(GlyphChild::Lib),
        };
        removed.ok_or(Error::IndexOutOfRange { index, len })
    }

    /// Move anchors into the outline as one-point move contours, name sorted.
    pub fn convert_to_older_format(&mut self) {
        self.format = GlifFormat::One;
        if self.anchors.is_empty() {
            return;
        }
        let mut anchors = std::mem::take(&mut self.anchors);
        anchors.sort_by(|a, b| a.name.cmp(&b.name));
        let outline = self.outline.get_or_insert_with(Outline::default);
        for anchor in anchors {
            outline.items.push(OutlineItem::Contour(Contour {
                points: vec![Point {
                    x: anchor.x,
                    y: anchor.y,
                    point_type: Some(PointType::Move),
                    name: anchor.name,
                    ..Default::default()
                }],
                ..Default::default()
            }));
        }
    }

    /// Turn one-point move contours into anchors.
    ///
    /// A genuine single point open contour is indistinguishable from a format
    /// 1 anchor and is converted too.
    pub fn convert_from_older_format(&mut self) {
        self.format = GlifFormat::Two;
        let Some(outline) = self.outline.as_mut() else {
            return;
        };
        let mut kept = Vec::with_capacity(outline.items.len());
        for item in std::mem::take(&mut outline.items) {
            match item {
                OutlineItem::Contour(contour) if contour.is_legacy_anchor() => {
                    let mut points = contour.points;
                    let point = points.remove(0);
                    debug!(
                        "Glyph '{}': move contour {:?} becomes an anchor",
                        self.name, point.name
                    );
                    self.anchors.push(Anchor {
                        x: point.x,
                        y: point.y,
                        name: point.name,
                        ..Default::default()
                    });
                }
                other => kept.push(other),
            }
        }
        outline.items = kept;
    }

    /// The `<glyph>` element for the current field values.
    ///
    /// Kinds are written in schema order, kinds invalid for the format are
    /// skipped and an empty lib is dropped.
    pub fn to_element(&self, preserve_unrecognized: bool) -> Element {
        if self.format == GlifFormat::One && !self.anchors.is_empty() {
            let mut legacy = self.clone();
            legacy.convert_to_older_format();
            return legacy.to_element(preserve_unrecognized);
        }
        let attributes = AttrWriter::default()
            .string("name", Some(self.name.as_str()))
            .string("format", Some(self.format.as_str()))
            .finish(&self.attributes);
        let mut glyph = Element::with_attributes("glyph", attributes);
        for kind in Kind::ALL {
            if !kind.valid_in(self.format) {
                continue;
            }
            match kind {
                Kind::Advance => glyph
                    .children
                    .extend(self.advance.iter().map(Advance::to_element)),
                Kind::Unicode => glyph
                    .children
                    .extend(self.unicodes.iter().map(Unicode::to_element)),
                Kind::Note => glyph.children.extend(
                    self.note
                        .iter()
                        .map(|note| Element::with_text(Kind::Note.tag(), note.as_str())),
                ),
                Kind::Image => glyph
                    .children
                    .extend(self.image.iter().map(Image::to_element)),
                Kind::Guideline => glyph
                    .children
                    .extend(self.guidelines.iter().map(Guideline::to_element)),
                Kind::Anchor => glyph
                    .children
                    .extend(self.anchors.iter().map(Anchor::to_element)),
                Kind::Outline => glyph
                    .children
                    .extend(self.outline.iter().map(Outline::to_element)),
                Kind::Lib => glyph.children.extend(
                    self.lib
                        .iter()
                        .filter(|lib| !lib.is_empty())
                        .map(lib_to_element),
                ),
            }
        }
        if preserve_unrecognized {
            glyph.children.extend(self.unrecognized.iter().cloned());
        }
        glyph
    }

    /// Regenerate the backing element tree from the fields and return it.
    pub fn rebuild_tree(&mut self) -> &Element {
        self.shadow = ElementShadow::new(self.to_element(true));
        self.shadow.element()
    }

    pub fn to_document(&self, preserve_unrecognized: bool) -> Document {
        Document::new(self.to_element(preserve_unrecognized))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::{
        config::Config,
        plist::ValueType,
        serialize::{FileType, Serializer},
    };

    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn format(glyph: &GlyphRecord) -> String {
        let config = Config::default();
        String::from_utf8(
            Serializer::new(&config).to_bytes(FileType::Glif, &glyph.to_document(true)),
        )
        .unwrap()
    }

    const GLIF_2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<glyph name="Aacute" format="2">
  <advance width="600"/>
  <unicode hex="00C1"/>
  <anchor x="300" y="700" name="top"/>
  <anchor x="300" y="0" name="bottom"/>
  <outline>
    <component base="A"/>
    <component base="acutecomb" xOffset="150" yOffset="200"/>
  </outline>
  <lib>
    <dict>
      <key>com.example.mark</key>
      <integer>1</integer>
    </dict>
  </lib>
  <mystery flavour="odd"/>
</glyph>
"#;

    const GLIF_1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<glyph name="a" format="1">
  <advance width="500"/>
  <unicode hex="0061"/>
  <outline>
    <contour>
      <point x="0" y="0" type="line"/>
      <point x="100" y="0" type="line"/>
      <point x="100" y="100" type="line" smooth="no"/>
    </contour>
    <contour>
      <point x="10" y="20" type="move" name="top"/>
    </contour>
  </outline>
</glyph>
"#;

    #[test]
    fn kinds_are_in_schema_order() {
        let tags: Vec<_> = Kind::ALL.iter().map(|k| k.tag()).collect();
        assert_eq!(
            vec!["advance", "unicode", "note", "image", "guideline", "anchor", "outline", "lib"],
            tags
        );
    }

    #[rstest]
    #[case(Kind::Advance, true, false)]
    #[case(Kind::Unicode, true, true)]
    #[case(Kind::Note, false, false)]
    #[case(Kind::Image, false, false)]
    #[case(Kind::Guideline, false, true)]
    #[case(Kind::Anchor, false, true)]
    #[case(Kind::Outline, true, false)]
    #[case(Kind::Lib, true, false)]
    fn kind_rules(#[case] kind: Kind, #[case] in_format_1: bool, #[case] repeatable: bool) {
        assert_eq!(in_format_1, kind.valid_in(GlifFormat::One));
        assert!(kind.valid_in(GlifFormat::Two));
        assert_eq!(repeatable, kind.is_repeatable());
        assert_eq!(Some(kind), Kind::from_tag(kind.tag()));
    }

    #[test]
    fn read_format_2() {
        let glyph = GlyphRecord::parse(GLIF_2).unwrap();
        assert_eq!("Aacute", glyph.name().as_str());
        assert_eq!(GlifFormat::Two, glyph.format());
        assert_eq!(Some(600.0), glyph.advance.as_ref().unwrap().width);
        assert_eq!(Some(0xC1), glyph.unicodes[0].code_point());
        assert_eq!(2, glyph.anchors.len());
        let outline = glyph.outline.as_ref().unwrap();
        let bases: Vec<_> = outline.components().map(|c| c.base.as_str()).collect();
        assert_eq!(vec!["A", "acutecomb"], bases);
        assert_eq!(150.0, outline.components().nth(1).unwrap().transform.x_offset);
        assert_eq!(1, glyph.lib.as_ref().unwrap().len());
        assert_eq!(1, glyph.unrecognized.len());
        assert_eq!("mystery", glyph.unrecognized[0].name);
    }

    #[test]
    fn format_2_round_trips() {
        let glyph = GlyphRecord::parse(GLIF_2).unwrap();
        assert_eq!(GLIF_2, format(&glyph));
    }

    #[test]
    fn format_1_anchors_are_surfaced() {
        let glyph = GlyphRecord::parse(GLIF_1).unwrap();
        assert_eq!(GlifFormat::One, glyph.format());
        assert_eq!(vec![Anchor::new("top", 10.0, 20.0)], glyph.anchors);
        assert_eq!(1, glyph.outline.as_ref().unwrap().contours().count());
        // and written back as move contours
        assert_eq!(GLIF_1, format(&glyph));
    }

    #[test]
    fn legacy_conversion_round_trip() {
        let mut glyph = GlyphRecord::parse(GLIF_2).unwrap();
        let mut expected = glyph.anchors.clone();
        expected.sort_by(|a, b| a.name.cmp(&b.name));

        glyph.convert_to_older_format();
        assert!(glyph.anchors.is_empty());
        let outline = glyph.outline.as_ref().unwrap();
        assert_eq!(2, outline.contours().filter(|c| c.is_legacy_anchor()).count());

        glyph.convert_from_older_format();
        assert_eq!(GlifFormat::Two, glyph.format());
        assert_eq!(expected, glyph.anchors);
        assert_eq!(0, glyph.outline.as_ref().unwrap().contours().count());
    }

    #[test]
    fn format_1_drops_format_2_kinds_from_output() {
        let mut glyph = GlyphRecord::parse(GLIF_2).unwrap();
        glyph.note = Some("hello".to_string());
        glyph.convert_to_older_format();
        let element = glyph.to_element(true);
        let tags: Vec<_> = element.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["advance", "unicode", "outline", "lib", "mystery"], tags);
        assert!(!glyph.to_element(false).children.iter().any(|c| c.name == "mystery"));
    }

    #[test]
    fn add_checks_format_and_replaces_singletons() {
        let mut glyph = GlyphRecord::new("a");
        glyph
            .add(Kind::Advance, attrs(&[("width", "500")]))
            .unwrap();
        glyph
            .add(Kind::Advance, attrs(&[("width", "550")]))
            .unwrap();
        assert_eq!(Some(550.0), glyph.advance.as_ref().unwrap().width);

        glyph.add(Kind::Unicode, attrs(&[("hex", "0061")])).unwrap();
        glyph.add(Kind::Unicode, attrs(&[("hex", "0251")])).unwrap();
        assert_eq!(2, glyph.count(Kind::Unicode));

        assert!(matches!(
            glyph.add(Kind::Anchor, attrs(&[("name", "top")])),
            Err(Error::MissingAttribute { element: "anchor", attribute: "x" })
        ));

        glyph.convert_to_older_format();
        assert!(matches!(
            glyph.add(Kind::Note, Attributes::new()),
            Err(Error::InvalidForFormat { kind: Kind::Note, format: "1" })
        ));
    }

    #[test]
    fn remove_by_kind_and_index() {
        let mut glyph = GlyphRecord::parse(GLIF_2).unwrap();
        let removed = glyph.remove(Kind::Anchor, 1).unwrap();
        assert_eq!(
            GlyphChild::Anchor(Anchor::new("bottom", 300.0, 0.0)),
            removed
        );
        assert!(matches!(
            glyph.remove(Kind::Note, 0),
            Err(Error::IndexOutOfRange { index: 0, len: 0 })
        ));
        assert!(glyph.remove(Kind::Advance, 0).is_ok());
        assert!(glyph.advance.is_none());
    }

    #[test]
    fn components_and_contours() {
        let mut glyph = GlyphRecord::new("b");
        glyph
            .add_component(attrs(&[("base", "a"), ("xScale", "0.5")]))
            .unwrap();
        assert!(glyph.add_component(Attributes::new()).is_err());
        glyph.add_contour(Contour {
            points: vec![
                Point {
                    x: 0.0,
                    y: 0.0,
                    point_type: Some(PointType::Line),
                    ..Default::default()
                },
                Point {
                    x: 10.0,
                    y: 0.0,
                    point_type: Some(PointType::Line),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        let element = glyph.rebuild_tree().clone();
        let outline = &element.children[0];
        assert_eq!("outline", outline.name);
        assert_eq!(Some("0.5"), outline.children[0].attribute("xScale"));
        assert_eq!(None, outline.children[0].attribute("yScale"));
        assert_eq!(2, outline.children[1].children.len());
    }

    #[test]
    fn rebuilt_tree_follows_edits() {
        let mut glyph = GlyphRecord::parse(GLIF_2).unwrap();
        glyph.remove(Kind::Anchor, 0).unwrap();
        glyph.add(Kind::Unicode, attrs(&[("hex", "01FA")])).unwrap();
        let element = glyph.rebuild_tree();
        let anchors: Vec<_> = element
            .children
            .iter()
            .filter(|c| c.name == "anchor")
            .filter_map(|c| c.attribute("name"))
            .collect();
        assert_eq!(vec!["bottom"], anchors);
        let unicodes: Vec<_> = element
            .children
            .iter()
            .filter(|c| c.name == "unicode")
            .filter_map(|c| c.attribute("hex"))
            .collect();
        assert_eq!(vec!["00C1", "01FA"], unicodes);
    }

    #[test]
    fn empty_lib_is_dropped() {
        let mut glyph = GlyphRecord::new("a");
        glyph.lib_mut();
        assert!(glyph.to_element(true).children.is_empty());
        glyph
            .lib_mut()
            .add("public.markColor", ValueType::String, "1,0,0,1")
            .unwrap();
        assert_eq!("lib", glyph.to_element(true).children[0].name);
    }

    #[test]
    fn format_1_unknown_format_2_children_are_kept() {
        let glyph = GlyphRecord::parse(
            r#"<glyph name="a" format="1"><note>hi</note><advance width="1"/></glyph>"#,
        )
        .unwrap();
        assert_eq!(None, glyph.note);
        assert_eq!(1, glyph.unrecognized.len());
        let element = glyph.to_element(true);
        assert_eq!("advance", element.children[0].name);
        assert_eq!("note", element.children[1].name);
    }

    #[test]
    fn bad_input() {
        assert!(matches!(
            GlyphRecord::parse(r#"<glyph name="a" format="3"/>"#),
            Err(Error::UnsupportedGlifFormat(..))
        ));
        assert!(matches!(
            GlyphRecord::parse(r#"<glyph format="2"/>"#),
            Err(Error::MissingAttribute { .. })
        ));
        assert!(GlyphRecord::parse(r#"<notglyph/>"#).is_err());
        assert!(GlyphRecord::parse(
            r#"<glyph name="a" format="2"><advance width="wide"/></glyph>"#
        )
        .is_err());
    }
}
