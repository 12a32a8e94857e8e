//! Reading, editing and minimally rewriting UFO font source bundles.
//!
//! A [FontBundle] is opened from disk, edited in memory, and saved. Saving
//! renders every file in a normalized form and then only writes the files
//! whose bytes differ from what is already there, deleting what the edits
//! made obsolete.

pub mod config;
pub mod error;
pub mod filenames;
pub mod font;
pub mod glyph;
pub mod layer;
pub mod plist;
pub mod serialize;
pub mod shadow;
pub mod snapshot;
pub mod sync;
pub mod types;
pub mod xml;

pub use config::Config;
pub use error::Error;
pub use font::{FontBundle, FormatGeneration, LoadState};
pub use glyph::GlyphRecord;
pub use layer::{LayerEditor, LayerId, LayerIndex};
pub use plist::PlistMap;
pub use sync::WriteReport;
pub use types::GlyphName;
