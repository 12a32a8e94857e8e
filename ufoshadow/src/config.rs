//! Settings for writing a bundle back to disk.

use serde::{Deserialize, Serialize};

use crate::font::FormatGeneration;

/// How one kind of file is laid out on output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct FileFormat {
    /// Indent of the root element's children.
    #[serde(default)]
    pub first_indent: String,
    /// Added per level below the first.
    #[serde(default)]
    pub indent: String,
    /// Attributes listed here come first, in this order; the rest follow alphabetically.
    #[serde(default)]
    pub attribute_order: Vec<String>,
    /// Attributes whose values are rounded to [Config::precision].
    #[serde(default)]
    pub numeric_attributes: Vec<String>,
    /// Leaf elements whose text is rounded to [Config::precision].
    #[serde(default)]
    pub numeric_elements: Vec<String>,
    /// Leaf elements whose text is written as CDATA.
    #[serde(default)]
    pub cdata_elements: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl FileFormat {
    pub fn plist() -> FileFormat {
        FileFormat {
            first_indent: String::new(),
            indent: "\t".to_string(),
            numeric_elements: strings(&["real"]),
            ..Default::default()
        }
    }

    pub fn glif() -> FileFormat {
        FileFormat {
            first_indent: "  ".to_string(),
            indent: "  ".to_string(),
            attribute_order: strings(&[
                "base",
                "fileName",
                "xScale",
                "xyScale",
                "yxScale",
                "yScale",
                "xOffset",
                "yOffset",
                "x",
                "y",
                "angle",
                "type",
                "smooth",
                "name",
                "format",
                "color",
                "identifier",
                "width",
                "height",
                "hex",
            ]),
            numeric_attributes: strings(&[
                "x", "y", "width", "height", "angle", "xScale", "xyScale", "yxScale", "yScale",
                "xOffset", "yOffset",
            ]),
            // the lib of a glif is a plist
            numeric_elements: strings(&["real"]),
            cdata_elements: Vec::new(),
        }
    }
}

/// Everything that affects how a bundle is written.
///
/// Built once per save and passed down to the serializer and writer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Decimal places kept for numeric values.
    pub precision: u32,
    pub sort_dict_keys: bool,
    /// Write this generation instead of the one the bundle was read as.
    pub format_generation: Option<FormatGeneration>,
    /// Derive every glyph file name from its glyph name again.
    pub recompute_file_names: bool,
    /// Keep glif children and attributes we don't model.
    pub preserve_unrecognized: bool,
    /// Stamped into metainfo.plist.
    pub creator: String,
    pub plist: FileFormat,
    pub glif: FileFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            precision: 10,
            sort_dict_keys: true,
            format_generation: None,
            recompute_file_names: false,
            preserve_unrecognized: true,
            creator: "com.github.ufoshadow".to_string(),
            plist: FileFormat::plist(),
            glif: FileFormat::glif(),
        }
    }
}
