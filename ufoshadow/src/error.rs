use std::{io, path::PathBuf};

use quick_xml::events::attributes::AttrError;
use thiserror::Error;

use crate::{glyph::Kind, types::GlyphName};

#[derive(Debug, Error)]
pub enum Error {
    #[error("io failed for '{path}': '{source}'")]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("'{0}' does not exist")]
    MissingPath(PathBuf),
    #[error("'{0}' exists but is not a directory")]
    ExpectedDirectory(PathBuf),
    #[error("Missing required file '{0}'")]
    MissingRequiredFile(PathBuf),
    #[error("Unable to parse {0}: {1}")]
    ParseError(PathBuf, String),
    #[error("Invalid xml: '{0}'")]
    Xml(#[from] quick_xml::Error),
    #[error("Invalid xml attribute: '{0}'")]
    XmlAttribute(#[from] AttrError),
    #[error("Unexpected structure: {0}")]
    StructuralError(String),
    #[error("Unsupported format version '{0}'")]
    UnsupportedFormatVersion(String),
    #[error("Format version {version} is inconsistent with the bundle: {reason}")]
    InconsistentFormatVersion { version: u32, reason: &'static str },
    #[error("No default layer")]
    NoDefaultLayer,
    #[error("No such layer '{0}'")]
    NoSuchLayer(String),
    #[error("A layer named '{0}' already exists")]
    DuplicateLayer(String),
    #[error("Duplicate key '{0}'")]
    DuplicateKey(String),
    #[error("No key '{0}'")]
    NoSuchKey(String),
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Expected a {expected} plist, found {found}")]
    WrongPlistStyle {
        expected: &'static str,
        found: &'static str,
    },
    #[error("'{path}' declares glyph '{actual}' but contents maps it to '{expected}'")]
    GlyphNameMismatch {
        path: PathBuf,
        expected: GlyphName,
        actual: GlyphName,
    },
    #[error("Glyph names must not be empty")]
    EmptyGlyphName,
    #[error("A glyph named '{0}' already exists")]
    DuplicateGlyph(GlyphName),
    #[error("No glyph named '{0}'")]
    NoSuchGlyph(GlyphName),
    #[error("Unsupported glif format '{0}'")]
    UnsupportedGlifFormat(String),
    #[error("'{kind}' is not valid in glif format {format}")]
    InvalidForFormat { kind: Kind, format: &'static str },
    #[error("Missing required attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::FileIo {
            path: path.into(),
            source,
        }
    }
}
